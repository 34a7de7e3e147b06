//! crates/quill_core/src/session.rs
//!
//! The editing session coordinator: one per open document.
//!
//! Editor changes land in a local buffer synchronously. Content persistence is
//! debounced, and every document write for the session goes through a single
//! gate so an older save can never land after a newer one. Finishing the
//! session flushes whatever is still buffered and then credits the session's
//! words to the daily stats and the XP ledger, in that order.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::documents;
use crate::domain::{ActivityDelta, Document};
use crate::gamification::{calculate_session_xp, LevelUpdate};
use crate::ledger;
use crate::ports::{DatabaseService, PortResult};
use crate::stats;

/// Quiet period after the last change before content is saved.
pub const DEFAULT_SAVE_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub save_debounce: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            save_debounce: DEFAULT_SAVE_DEBOUNCE,
        }
    }
}

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// The document has not been loaded yet.
    Loading,
    /// Everything the editor produced has been persisted.
    Idle,
    /// Buffered content is waiting for the debounce timer (or a retry).
    Dirty,
    /// A content write is in flight.
    Saving,
    /// The session is ending and flushing its buffer.
    Flushing,
    /// Stats and XP have been recorded; further changes are ignored.
    Closed,
}

/// What the UI shows after each change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    /// Words added since the document was first loaded, never negative.
    pub session_words: u32,
    pub word_count: u32,
    /// XP the session would award if it ended now.
    pub pending_xp: u32,
    pub has_unsaved_changes: bool,
}

/// What finishing a session recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub words_written: u32,
    pub minutes_written: u32,
    pub xp_earned: u32,
    /// `None` when no XP was awarded.
    pub level: Option<LevelUpdate>,
}

#[derive(Debug, Clone)]
struct PendingContent {
    content: String,
    word_count: u32,
    revision: u64,
}

#[derive(Default)]
struct Buffer {
    title: String,
    content: String,
    word_count: u32,
    /// Captured on the first load only.
    initial_word_count: Option<u32>,
    session_words: u32,
    pending: Option<PendingContent>,
    revision: u64,
    debounce: Option<CancellationToken>,
    stats_recorded: bool,
    summary: Option<SessionSummary>,
}

/// The part of the session shared with debounce tasks.
#[derive(Clone)]
struct Persister {
    db: Arc<dyn DatabaseService>,
    document_id: Uuid,
    buffer: Arc<Mutex<Buffer>>,
    write_gate: Arc<tokio::sync::Mutex<()>>,
    phase: Arc<watch::Sender<SessionPhase>>,
}

impl Persister {
    fn buffer(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    /// Moves to `next` unless the session is already ending.
    fn transition(&self, next: SessionPhase) {
        self.phase.send_if_modified(|phase| {
            if matches!(*phase, SessionPhase::Flushing | SessionPhase::Closed) || *phase == next {
                return false;
            }
            *phase = next;
            true
        });
    }

    fn force(&self, next: SessionPhase) {
        self.phase.send_replace(next);
    }

    /// Writes the buffered content, if any. Returns whether a write happened.
    ///
    /// On failure the content stays buffered for the next attempt.
    async fn flush(&self) -> PortResult<bool> {
        let _gate = self.write_gate.lock().await;

        let pending = self.buffer().pending.clone();
        let Some(pending) = pending else {
            return Ok(false);
        };

        self.transition(SessionPhase::Saving);
        let result = self
            .db
            .update_document_content(self.document_id, &pending.content, pending.word_count)
            .await;

        let still_dirty = {
            let mut buffer = self.buffer();
            let unchanged = buffer
                .pending
                .as_ref()
                .is_some_and(|p| p.revision == pending.revision);
            if result.is_ok() && unchanged {
                buffer.pending = None;
            }
            buffer.pending.is_some()
        };
        self.transition(if still_dirty {
            SessionPhase::Dirty
        } else {
            SessionPhase::Idle
        });

        result?;
        debug!(
            "Saved document {} ({} words, revision {})",
            self.document_id, pending.word_count, pending.revision
        );
        Ok(true)
    }
}

/// Coordinates persistence for one document while a user edits it.
///
/// Must be used inside a tokio runtime: debounced saves run as spawned tasks.
pub struct EditingSession {
    user_id: Uuid,
    started_at: Instant,
    config: SessionConfig,
    persister: Persister,
}

impl EditingSession {
    /// Creates a session in the `Loading` phase. Call [`EditingSession::load`] next.
    pub fn new(
        db: Arc<dyn DatabaseService>,
        user_id: Uuid,
        document_id: Uuid,
        config: SessionConfig,
    ) -> Self {
        let (phase, _) = watch::channel(SessionPhase::Loading);
        Self {
            user_id,
            started_at: Instant::now(),
            config,
            persister: Persister {
                db,
                document_id,
                buffer: Arc::new(Mutex::new(Buffer::default())),
                write_gate: Arc::new(tokio::sync::Mutex::new(())),
                phase: Arc::new(phase),
            },
        }
    }

    /// Creates a session and loads its document.
    pub async fn open(
        db: Arc<dyn DatabaseService>,
        user_id: Uuid,
        document_id: Uuid,
        config: SessionConfig,
    ) -> PortResult<Self> {
        let session = Self::new(db, user_id, document_id, config);
        session.load().await?;
        Ok(session)
    }

    /// Loads (or refreshes) the document.
    ///
    /// The word-count baseline and the local content are taken from the first
    /// load only; later refreshes just pick up the persisted title.
    pub async fn load(&self) -> PortResult<Document> {
        let document = documents::load_owned(
            self.persister.db.as_ref(),
            self.user_id,
            self.persister.document_id,
        )
        .await?;

        let first_load = {
            let mut buffer = self.persister.buffer();
            buffer.title = document.title.clone();
            if buffer.initial_word_count.is_none() {
                buffer.initial_word_count = Some(document.word_count);
                if buffer.pending.is_none() {
                    buffer.content = document.content.clone();
                    buffer.word_count = document.word_count;
                }
                true
            } else {
                false
            }
        };
        if first_load {
            self.persister.transition(SessionPhase::Idle);
            info!(
                "Editing session opened for document {} by user {} ({} words)",
                document.id, self.user_id, document.word_count
            );
        }
        Ok(document)
    }

    pub fn document_id(&self) -> Uuid {
        self.persister.document_id
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn phase(&self) -> SessionPhase {
        self.persister.phase()
    }

    /// Follows phase changes, e.g. to drive a saving indicator.
    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.persister.phase.subscribe()
    }

    /// The content the editor last produced.
    pub fn content(&self) -> String {
        self.persister.buffer().content.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let phase = self.phase();
        let buffer = self.persister.buffer();
        snapshot_of(&buffer, phase)
    }

    /// Handles one editor change event. Never waits on storage.
    ///
    /// The latest content replaces whatever was buffered and the save timer
    /// restarts, so a burst of changes produces a single write.
    pub fn on_change(&self, content: String, word_count: u32) -> SessionSnapshot {
        if self.phase() == SessionPhase::Closed {
            warn!(
                "Ignoring change to document {} after its session closed",
                self.persister.document_id
            );
            return self.snapshot();
        }

        let token = CancellationToken::new();
        {
            let mut buffer = self.persister.buffer();
            if let Some(initial) = buffer.initial_word_count {
                buffer.session_words = word_count.saturating_sub(initial);
            }
            buffer.revision += 1;
            buffer.pending = Some(PendingContent {
                content: content.clone(),
                word_count,
                revision: buffer.revision,
            });
            buffer.content = content;
            buffer.word_count = word_count;
            if let Some(previous) = buffer.debounce.replace(token.clone()) {
                previous.cancel();
            }
        }
        self.persister.transition(SessionPhase::Dirty);
        self.schedule_save(token);

        self.snapshot()
    }

    fn schedule_save(&self, token: CancellationToken) {
        let persister = self.persister.clone();
        let delay = self.config.save_debounce;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = persister.flush().await {
                        warn!(
                            "Auto-save of document {} failed, content stays buffered: {}",
                            persister.document_id, e
                        );
                    }
                }
            }
        });
    }

    /// Persists a new title right away. Empty or unchanged titles are skipped;
    /// returns whether a write happened.
    pub async fn rename(&self, title: &str) -> PortResult<bool> {
        let current = self.persister.buffer().title.clone();
        if !documents::title_needs_write(&current, title) {
            return Ok(false);
        }
        {
            let _gate = self.persister.write_gate.lock().await;
            self.persister
                .db
                .update_document_title(self.persister.document_id, title)
                .await?;
        }
        self.persister.buffer().title = title.to_string();
        Ok(true)
    }

    /// Ends the session: flushes buffered content, then records the session's
    /// words for `today` and awards its XP.
    ///
    /// Safe to retry after an error: buffered content survives a failed flush,
    /// and stats already recorded are not recorded again. Once it succeeds,
    /// later calls return the same summary.
    pub async fn finish(&self, today: NaiveDate) -> PortResult<SessionSummary> {
        {
            let mut buffer = self.persister.buffer();
            if let Some(summary) = buffer.summary {
                return Ok(summary);
            }
            if let Some(token) = buffer.debounce.take() {
                token.cancel();
            }
        }

        self.persister.force(SessionPhase::Flushing);
        let result = self.settle(today).await;
        match &result {
            Ok(summary) => {
                self.persister.buffer().summary = Some(*summary);
                self.persister.force(SessionPhase::Closed);
                info!(
                    "Editing session for document {} closed: {} words, {} min, {} XP",
                    self.persister.document_id,
                    summary.words_written,
                    summary.minutes_written,
                    summary.xp_earned
                );
            }
            Err(e) => {
                let unsaved = self.persister.buffer().pending.is_some();
                self.persister.force(if unsaved {
                    SessionPhase::Dirty
                } else {
                    SessionPhase::Idle
                });
                error!(
                    "Failed to close editing session for document {}: {}",
                    self.persister.document_id, e
                );
            }
        }
        result
    }

    async fn settle(&self, today: NaiveDate) -> PortResult<SessionSummary> {
        self.persister.flush().await?;

        let (words_written, stats_recorded) = {
            let buffer = self.persister.buffer();
            (buffer.session_words, buffer.stats_recorded)
        };
        let minutes_written = elapsed_minutes(self.started_at.elapsed());
        let xp_earned = calculate_session_xp(words_written);

        if words_written == 0 {
            return Ok(SessionSummary {
                words_written,
                minutes_written,
                xp_earned: 0,
                level: None,
            });
        }

        let db = self.persister.db.as_ref();
        if !stats_recorded {
            stats::record_activity(
                db,
                self.user_id,
                today,
                ActivityDelta {
                    words_written,
                    minutes_written,
                    xp_earned,
                },
            )
            .await?;
            self.persister.buffer().stats_recorded = true;
        }

        let level = if xp_earned > 0 {
            Some(ledger::add_xp(db, self.user_id, xp_earned).await?)
        } else {
            None
        };

        Ok(SessionSummary {
            words_written,
            minutes_written,
            xp_earned,
            level,
        })
    }
}

impl Drop for EditingSession {
    fn drop(&mut self) {
        let unsaved = {
            let mut buffer = self.persister.buffer();
            if let Some(token) = buffer.debounce.take() {
                token.cancel();
            }
            buffer.pending.is_some()
        };
        if !unsaved {
            return;
        }

        let document_id = self.persister.document_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let persister = self.persister.clone();
                handle.spawn(async move {
                    if let Err(e) = persister.flush().await {
                        error!("Final save of document {} failed: {}", document_id, e);
                    }
                });
            }
            Err(_) => error!(
                "Editing session for document {} dropped outside a runtime with unsaved content",
                document_id
            ),
        }
    }
}

fn snapshot_of(buffer: &Buffer, phase: SessionPhase) -> SessionSnapshot {
    SessionSnapshot {
        phase,
        session_words: buffer.session_words,
        word_count: buffer.word_count,
        pending_xp: calculate_session_xp(buffer.session_words),
        has_unsaved_changes: buffer.pending.is_some(),
    }
}

/// Whole minutes, rounded half up.
fn elapsed_minutes(elapsed: Duration) -> u32 {
    let minutes = (elapsed.as_millis() + 30_000) / 60_000;
    u32::try_from(minutes).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::ports::PortError;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    async fn setup(initial_words: u32) -> (Arc<InMemoryStore>, Uuid, Uuid) {
        let store = Arc::new(InMemoryStore::new());
        let user = Uuid::new_v4();
        store.get_or_create_profile(user).await.unwrap();
        let document = store.create_document(user, "Draft").await.unwrap();
        if initial_words > 0 {
            store
                .update_document_content(document.id, "seed", initial_words)
                .await
                .unwrap();
        }
        (store, user, document.id)
    }

    async fn open(store: &Arc<InMemoryStore>, user: Uuid, document: Uuid) -> EditingSession {
        EditingSession::open(store.clone(), user, document, SessionConfig::default())
            .await
            .unwrap()
    }

    fn writes_of(store: &InMemoryStore, document: Uuid) -> Vec<(String, u32)> {
        store
            .content_writes()
            .into_iter()
            .filter(|w| w.document_id == document)
            .map(|w| (w.content, w.word_count))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_changes_saves_once_with_last_content() {
        let (store, user, document) = setup(0).await;
        let session = open(&store, user, document).await;

        for i in 1..=10u32 {
            session.on_change(format!("draft {}", i), i);
            tokio::time::sleep(Duration::from_millis(40)).await;
        }
        assert!(writes_of(&store, document).is_empty());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(writes_of(&store, document), vec![("draft 10".to_string(), 10)]);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(writes_of(&store, document).len(), 1);
        assert_eq!(session.phase(), SessionPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn finish_flushes_before_the_timer_fires() {
        let (store, user, document) = setup(0).await;
        let session = open(&store, user, document).await;

        session.on_change("one two three".to_string(), 3);
        let summary = session.finish(date("2024-01-01")).await.unwrap();

        assert_eq!(writes_of(&store, document), vec![("one two three".to_string(), 3)]);
        assert_eq!(summary.words_written, 3);
        assert_eq!(summary.xp_earned, 0);
        assert_eq!(summary.level, None);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(writes_of(&store, document).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deleting_text_never_credits_negative_words() {
        let (store, user, document) = setup(100).await;
        let session = open(&store, user, document).await;

        let snapshot = session.on_change("short".to_string(), 40);
        assert_eq!(snapshot.session_words, 0);
        assert_eq!(snapshot.pending_xp, 0);

        let summary = session.finish(date("2024-01-01")).await.unwrap();
        assert_eq!(summary.words_written, 0);
        assert!(store
            .get_daily_stat(user, date("2024-01-01"))
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.get_profile(user).await.unwrap().xp, 0);
        assert_eq!(store.get_document(document).await.unwrap().word_count, 40);
    }

    #[tokio::test(start_paused = true)]
    async fn reloading_keeps_the_first_baseline() {
        let (store, user, document) = setup(100).await;
        let session = open(&store, user, document).await;

        session.on_change("more".to_string(), 150);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(store.get_document(document).await.unwrap().word_count, 150);

        session.load().await.unwrap();
        let snapshot = session.on_change("even more".to_string(), 160);
        assert_eq!(snapshot.session_words, 60);
    }

    #[tokio::test(start_paused = true)]
    async fn finish_records_stats_then_xp() {
        let (store, user, document) = setup(0).await;
        let session = open(&store, user, document).await;

        session.on_change("words".to_string(), 120);
        tokio::time::sleep(Duration::from_secs(180)).await;
        let summary = session.finish(date("2024-05-01")).await.unwrap();

        assert_eq!(summary.words_written, 120);
        assert_eq!(summary.minutes_written, 3);
        assert_eq!(summary.xp_earned, 12);
        assert_eq!(summary.level.map(|l| l.xp), Some(12));

        let stat = store
            .get_daily_stat(user, date("2024-05-01"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stat.words_written, 120);
        assert_eq!(stat.minutes_written, 3);
        assert_eq!(stat.xp_earned, 12);
        assert_eq!(stat.sessions_count, 1);
        assert_eq!(store.get_profile(user).await.unwrap().xp, 12);
        assert_eq!(session.phase(), SessionPhase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn session_xp_is_capped() {
        let (store, user, document) = setup(0).await;
        let session = open(&store, user, document).await;

        session.on_change("novel".to_string(), 2_000);
        let summary = session.finish(date("2024-05-01")).await.unwrap();
        assert_eq!(summary.xp_earned, 50);
        assert_eq!(store.get_profile(user).await.unwrap().xp, 50);
    }

    #[tokio::test(start_paused = true)]
    async fn finishing_twice_records_once() {
        let (store, user, document) = setup(0).await;
        let session = open(&store, user, document).await;

        session.on_change("words".to_string(), 30);
        let first = session.finish(date("2024-05-01")).await.unwrap();
        let second = session.finish(date("2024-05-01")).await.unwrap();

        assert_eq!(first, second);
        let stat = store
            .get_daily_stat(user, date("2024-05-01"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stat.sessions_count, 1);
        assert_eq!(store.get_profile(user).await.unwrap().xp, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_auto_save_is_retried_on_next_change() {
        let (store, user, document) = setup(0).await;
        let session = open(&store, user, document).await;
        store.fail_next_content_writes(1);

        session.on_change("a".to_string(), 1);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(writes_of(&store, document).is_empty());
        assert!(session.snapshot().has_unsaved_changes);
        assert_eq!(session.phase(), SessionPhase::Dirty);
        assert_eq!(session.content(), "a");

        session.on_change("a b".to_string(), 2);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(writes_of(&store, document), vec![("a b".to_string(), 2)]);
        assert!(!session.snapshot().has_unsaved_changes);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_final_flush_keeps_content_for_retry() {
        let (store, user, document) = setup(0).await;
        let session = open(&store, user, document).await;
        store.fail_next_content_writes(1);

        session.on_change("kept".to_string(), 20);
        let result = session.finish(date("2024-05-01")).await;
        assert!(matches!(result, Err(PortError::Unexpected(_))));
        assert_eq!(session.phase(), SessionPhase::Dirty);
        assert!(store
            .get_daily_stat(user, date("2024-05-01"))
            .await
            .unwrap()
            .is_none());

        let summary = session.finish(date("2024-05-01")).await.unwrap();
        assert_eq!(summary.words_written, 20);
        assert_eq!(writes_of(&store, document), vec![("kept".to_string(), 20)]);
    }

    #[tokio::test(start_paused = true)]
    async fn writes_never_overlap() {
        let (store, user, document) = setup(0).await;
        store.set_write_latency(Duration::from_millis(1_000));
        let session = open(&store, user, document).await;

        session.on_change("first".to_string(), 1);
        // The first save starts at 500ms and holds the gate until 1500ms.
        tokio::time::sleep(Duration::from_millis(510)).await;
        session.on_change("second".to_string(), 2);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(store.max_writes_in_flight(), 1);
        assert_eq!(
            writes_of(&store, document),
            vec![("first".to_string(), 1), ("second".to_string(), 2)]
        );
        assert_eq!(store.get_document(document).await.unwrap().content, "second");
        assert_eq!(session.phase(), SessionPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn titles_persist_immediately_unless_empty_or_unchanged() {
        let (store, user, document) = setup(0).await;
        let session = open(&store, user, document).await;

        assert!(!session.rename("").await.unwrap());
        assert!(!session.rename("Draft").await.unwrap());
        assert!(session.rename("Chapter 1").await.unwrap());
        assert!(!session.rename("Chapter 1").await.unwrap());

        assert_eq!(store.title_writes(), vec![(document, "Chapter 1".to_string())]);
    }

    #[tokio::test]
    async fn opening_a_foreign_document_is_refused() {
        let (store, _owner, document) = setup(0).await;
        let result =
            EditingSession::open(store.clone(), Uuid::new_v4(), document, SessionConfig::default())
                .await;
        assert!(matches!(result, Err(PortError::NotAuthorized)));
    }

    #[tokio::test(start_paused = true)]
    async fn phases_are_published() {
        let (store, user, document) = setup(0).await;
        let session = EditingSession::new(store.clone(), user, document, SessionConfig::default());
        let phases = session.subscribe();
        assert_eq!(*phases.borrow(), SessionPhase::Loading);

        session.load().await.unwrap();
        assert_eq!(*phases.borrow(), SessionPhase::Idle);

        session.on_change("x".to_string(), 1);
        assert_eq!(*phases.borrow(), SessionPhase::Dirty);

        session.finish(date("2024-05-01")).await.unwrap();
        assert_eq!(*phases.borrow(), SessionPhase::Closed);

        let snapshot = session.on_change("ignored".to_string(), 5);
        assert_eq!(snapshot.word_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_a_session_still_saves() {
        let (store, user, document) = setup(0).await;
        let session = open(&store, user, document).await;

        session.on_change("last words".to_string(), 2);
        drop(session);
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(writes_of(&store, document), vec![("last words".to_string(), 2)]);
    }

    #[test]
    fn minutes_round_half_up() {
        assert_eq!(elapsed_minutes(Duration::from_secs(29)), 0);
        assert_eq!(elapsed_minutes(Duration::from_secs(30)), 1);
        assert_eq!(elapsed_minutes(Duration::from_secs(89)), 1);
        assert_eq!(elapsed_minutes(Duration::from_secs(90)), 2);
    }
}
