//! crates/quill_core/src/documents.rs
//!
//! Ownership-checked document operations.

use uuid::Uuid;

use crate::domain::Document;
use crate::ports::{DatabaseService, PortError, PortResult};

/// Title given to documents created without one.
pub const UNTITLED: &str = "Untitled";

/// Loads a document, failing with `NotAuthorized` if `user_id` does not own it.
pub async fn load_owned(
    db: &dyn DatabaseService,
    user_id: Uuid,
    document_id: Uuid,
) -> PortResult<Document> {
    let document = db.get_document(document_id).await?;
    if document.user_id != user_id {
        return Err(PortError::NotAuthorized);
    }
    Ok(document)
}

pub async fn create(db: &dyn DatabaseService, user_id: Uuid, title: &str) -> PortResult<Document> {
    let title = title.trim();
    let title = if title.is_empty() { UNTITLED } else { title };
    db.create_document(user_id, title).await
}

pub async fn list(db: &dyn DatabaseService, user_id: Uuid) -> PortResult<Vec<Document>> {
    db.list_documents(user_id).await
}

/// Renames a document. Empty or unchanged titles are skipped; returns whether
/// a write happened.
pub async fn rename(
    db: &dyn DatabaseService,
    user_id: Uuid,
    document_id: Uuid,
    title: &str,
) -> PortResult<bool> {
    let document = load_owned(db, user_id, document_id).await?;
    if !title_needs_write(&document.title, title) {
        return Ok(false);
    }
    db.update_document_title(document_id, title).await?;
    Ok(true)
}

/// Soft delete: the record stays, flagged as archived.
pub async fn archive(db: &dyn DatabaseService, user_id: Uuid, document_id: Uuid) -> PortResult<()> {
    load_owned(db, user_id, document_id).await?;
    db.archive_document(document_id).await
}

pub(crate) fn title_needs_write(current: &str, proposed: &str) -> bool {
    !proposed.trim().is_empty() && proposed != current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;

    #[tokio::test]
    async fn foreign_documents_are_not_authorized() {
        let store = InMemoryStore::new();
        let owner = Uuid::new_v4();
        let document = create(&store, owner, "Draft").await.unwrap();

        let result = load_owned(&store, Uuid::new_v4(), document.id).await;
        assert!(matches!(result, Err(PortError::NotAuthorized)));

        let result = archive(&store, Uuid::new_v4(), document.id).await;
        assert!(matches!(result, Err(PortError::NotAuthorized)));
        assert!(!store.get_document(document.id).await.unwrap().is_archived);
    }

    #[tokio::test]
    async fn missing_documents_are_not_found() {
        let store = InMemoryStore::new();
        let result = load_owned(&store, Uuid::new_v4(), Uuid::new_v4()).await;
        assert!(matches!(result, Err(PortError::NotFound(_))));
    }

    #[tokio::test]
    async fn new_documents_start_empty() {
        let store = InMemoryStore::new();
        let document = create(&store, Uuid::new_v4(), "   ").await.unwrap();
        assert_eq!(document.title, UNTITLED);
        assert_eq!(document.content, "");
        assert_eq!(document.word_count, 0);
        assert!(!document.is_archived);
    }

    #[tokio::test]
    async fn rename_skips_empty_and_unchanged_titles() {
        let store = InMemoryStore::new();
        let owner = Uuid::new_v4();
        let document = create(&store, owner, "Draft").await.unwrap();

        assert!(!rename(&store, owner, document.id, "").await.unwrap());
        assert!(!rename(&store, owner, document.id, "  ").await.unwrap());
        assert!(!rename(&store, owner, document.id, "Draft").await.unwrap());
        assert!(rename(&store, owner, document.id, "Chapter One").await.unwrap());

        assert_eq!(store.title_writes().len(), 1);
        assert_eq!(store.get_document(document.id).await.unwrap().title, "Chapter One");
    }

    #[tokio::test]
    async fn archived_documents_leave_the_list() {
        let store = InMemoryStore::new();
        let owner = Uuid::new_v4();
        let kept = create(&store, owner, "Kept").await.unwrap();
        let gone = create(&store, owner, "Gone").await.unwrap();

        archive(&store, owner, gone.id).await.unwrap();

        let listed = list(&store, owner).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, kept.id);
        assert!(store.get_document(gone.id).await.unwrap().is_archived);
    }
}
