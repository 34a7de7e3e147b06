//! crates/quill_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific storage implementations.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::domain::{
    ActivityDelta, DailyStat, Document, Profile, StreakFields, User, UserCredentials,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port and core operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    /// No identity was supplied for an operation that needs one.
    #[error("Not authenticated")]
    NotAuthenticated,
    /// An identity was supplied but does not own the target entity.
    #[error("Unauthorized")]
    NotAuthorized,
    #[error("Item not found: {0}")]
    NotFound(String),
    /// A concurrent writer kept winning the race for the same record.
    #[error("Concurrent update lost: {0}")]
    ConcurrentUpdateLost(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// `(xp, level)` as stored on a profile.
pub type XpState = (u32, u32);

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Auth Methods ---
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    /// Resolves a live auth session to its user. Expired sessions are `NotAuthenticated`.
    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid>;

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()>;

    // --- Profiles ---
    async fn get_or_create_profile(&self, user_id: Uuid) -> PortResult<Profile>;

    async fn get_profile(&self, user_id: Uuid) -> PortResult<Profile>;

    /// Writes `new` only if the stored `(xp, level)` still equals `expected`.
    /// Returns whether the write happened.
    async fn compare_and_set_xp(
        &self,
        user_id: Uuid,
        expected: XpState,
        new: XpState,
    ) -> PortResult<bool>;

    // --- Daily Stats ---
    async fn get_daily_stat(&self, user_id: Uuid, date: NaiveDate)
        -> PortResult<Option<DailyStat>>;

    /// Atomically adds `delta` to the `(user_id, date)` record, creating it when absent.
    /// Increments `sessions_count` and sets `checked_in`.
    async fn accumulate_daily_stat(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        delta: ActivityDelta,
    ) -> PortResult<DailyStat>;

    /// Checks the user in for `date`: sets `checked_in` on the `(user_id, date)`
    /// record (creating an empty one when absent) and writes the streak fields
    /// `advance` derives from the stored profile. Both writes land or neither does.
    ///
    /// Returns the profile as it was before the write, or `None` when the day
    /// was already checked in (nothing is written then).
    async fn check_in_day(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        advance: &(dyn for<'p> Fn(&'p Profile) -> StreakFields + Send + Sync),
    ) -> PortResult<Option<Profile>>;

    /// Records with `start <= date <= end`, ordered by date.
    async fn query_daily_stats(
        &self,
        user_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> PortResult<Vec<DailyStat>>;

    async fn list_daily_stats(&self, user_id: Uuid) -> PortResult<Vec<DailyStat>>;

    // --- Document Management ---
    async fn create_document(&self, user_id: Uuid, title: &str) -> PortResult<Document>;

    async fn get_document(&self, document_id: Uuid) -> PortResult<Document>;

    /// Non-archived documents, most recently updated first.
    async fn list_documents(&self, user_id: Uuid) -> PortResult<Vec<Document>>;

    async fn update_document_content(
        &self,
        document_id: Uuid,
        content: &str,
        word_count: u32,
    ) -> PortResult<()>;

    async fn update_document_title(&self, document_id: Uuid, title: &str) -> PortResult<()>;

    async fn archive_document(&self, document_id: Uuid) -> PortResult<()>;
}
