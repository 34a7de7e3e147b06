//! crates/quill_core/src/memory.rs
//!
//! An in-process implementation of the `DatabaseService` port.
//!
//! Every operation runs under a single lock, which gives the same per-key
//! atomicity the Postgres adapter gets from its upserts. The store also lets
//! callers observe and disturb document writes (latency, injected failures),
//! which the editing-session tests rely on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::domain::{
    ActivityDelta, AuthSession, DailyStat, Document, Profile, StreakFields, User,
    UserCredentials,
};
use crate::ports::{DatabaseService, PortError, PortResult, XpState};

/// A content write that reached the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentWrite {
    pub document_id: Uuid,
    pub content: String,
    pub word_count: u32,
}

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, UserCredentials>,
    auth_sessions: HashMap<String, AuthSession>,
    profiles: HashMap<Uuid, Profile>,
    daily_stats: HashMap<(Uuid, NaiveDate), DailyStat>,
    documents: HashMap<Uuid, Document>,
    content_writes: Vec<ContentWrite>,
    title_writes: Vec<(Uuid, String)>,
    failing_content_writes: usize,
    failing_check_ins: usize,
    write_latency: Option<Duration>,
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    writes_in_flight: AtomicUsize,
    max_writes_in_flight: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every content write that succeeded, oldest first.
    pub fn content_writes(&self) -> Vec<ContentWrite> {
        self.tables().content_writes.clone()
    }

    /// Every title write that succeeded, oldest first.
    pub fn title_writes(&self) -> Vec<(Uuid, String)> {
        self.tables().title_writes.clone()
    }

    /// Makes the next `count` content writes fail.
    pub fn fail_next_content_writes(&self, count: usize) {
        self.tables().failing_content_writes = count;
    }

    /// Makes the next `count` check-ins fail after the streak was computed but
    /// before anything is written.
    pub fn fail_next_check_ins(&self, count: usize) {
        self.tables().failing_check_ins = count;
    }

    /// Delays every document write by `latency` (tokio time, so paused clocks apply).
    pub fn set_write_latency(&self, latency: Duration) {
        self.tables().write_latency = Some(latency);
    }

    /// The highest number of document writes that were ever running at once.
    pub fn max_writes_in_flight(&self) -> usize {
        self.max_writes_in_flight.load(Ordering::SeqCst)
    }

    async fn begin_document_write(&self) -> WriteGuard<'_> {
        let now = self.writes_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_writes_in_flight.fetch_max(now, Ordering::SeqCst);
        let latency = self.tables().write_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        WriteGuard { store: self }
    }
}

struct WriteGuard<'a> {
    store: &'a InMemoryStore,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.store.writes_in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

fn new_daily_stat(user_id: Uuid, date: NaiveDate) -> DailyStat {
    DailyStat {
        id: Uuid::new_v4(),
        user_id,
        date,
        words_written: 0,
        sessions_count: 0,
        minutes_written: 0,
        xp_earned: 0,
        checked_in: false,
    }
}

fn document_mut<'a>(tables: &'a mut Tables, document_id: Uuid) -> PortResult<&'a mut Document> {
    tables
        .documents
        .get_mut(&document_id)
        .ok_or_else(|| PortError::NotFound(format!("Document {} not found", document_id)))
}

#[async_trait]
impl DatabaseService for InMemoryStore {
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<User> {
        let mut tables = self.tables();
        if tables.users.values().any(|u| u.email == email) {
            return Err(PortError::InvalidInput(format!(
                "Email {} is already registered",
                email
            )));
        }
        let user_id = Uuid::new_v4();
        tables.users.insert(
            user_id,
            UserCredentials {
                user_id,
                email: email.to_string(),
                hashed_password: hashed_password.to_string(),
            },
        );
        Ok(User {
            user_id,
            email: Some(email.to_string()),
        })
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        self.tables()
            .users
            .values()
            .find(|u| u.email == email)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("User {} not found", email)))
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        self.tables().auth_sessions.insert(
            session_id.to_string(),
            AuthSession {
                id: session_id.to_string(),
                user_id,
                expires_at,
            },
        );
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        match self.tables().auth_sessions.get(session_id) {
            Some(session) if session.expires_at > Utc::now() => Ok(session.user_id),
            _ => Err(PortError::NotAuthenticated),
        }
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        self.tables().auth_sessions.remove(session_id);
        Ok(())
    }

    async fn get_or_create_profile(&self, user_id: Uuid) -> PortResult<Profile> {
        let mut tables = self.tables();
        let profile = tables
            .profiles
            .entry(user_id)
            .or_insert_with(|| Profile::new(user_id, Utc::now()));
        Ok(profile.clone())
    }

    async fn get_profile(&self, user_id: Uuid) -> PortResult<Profile> {
        self.tables()
            .profiles
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Profile {} not found", user_id)))
    }

    async fn compare_and_set_xp(
        &self,
        user_id: Uuid,
        expected: XpState,
        new: XpState,
    ) -> PortResult<bool> {
        let mut tables = self.tables();
        let profile = tables
            .profiles
            .get_mut(&user_id)
            .ok_or_else(|| PortError::NotFound(format!("Profile {} not found", user_id)))?;
        if (profile.xp, profile.level) != expected {
            return Ok(false);
        }
        profile.xp = new.0;
        profile.level = new.1;
        profile.updated_at = Utc::now();
        Ok(true)
    }

    async fn get_daily_stat(
        &self,
        user_id: Uuid,
        date: NaiveDate,
    ) -> PortResult<Option<DailyStat>> {
        Ok(self.tables().daily_stats.get(&(user_id, date)).cloned())
    }

    async fn accumulate_daily_stat(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        delta: ActivityDelta,
    ) -> PortResult<DailyStat> {
        let mut tables = self.tables();
        let stat = tables
            .daily_stats
            .entry((user_id, date))
            .or_insert_with(|| new_daily_stat(user_id, date));
        stat.words_written = stat.words_written.saturating_add(delta.words_written);
        stat.minutes_written = stat.minutes_written.saturating_add(delta.minutes_written);
        stat.xp_earned = stat.xp_earned.saturating_add(delta.xp_earned);
        stat.sessions_count = stat.sessions_count.saturating_add(1);
        stat.checked_in = true;
        Ok(stat.clone())
    }

    async fn check_in_day(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        advance: &(dyn for<'p> Fn(&'p Profile) -> StreakFields + Send + Sync),
    ) -> PortResult<Option<Profile>> {
        let mut tables = self.tables();
        let already = tables
            .daily_stats
            .get(&(user_id, date))
            .is_some_and(|stat| stat.checked_in);
        if already {
            return Ok(None);
        }

        let before = tables
            .profiles
            .get(&user_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Profile {} not found", user_id)))?;
        let fields = advance(&before);

        if tables.failing_check_ins > 0 {
            tables.failing_check_ins -= 1;
            return Err(PortError::Unexpected("injected check-in failure".to_string()));
        }

        tables
            .daily_stats
            .entry((user_id, date))
            .or_insert_with(|| new_daily_stat(user_id, date))
            .checked_in = true;
        if let Some(profile) = tables.profiles.get_mut(&user_id) {
            profile.current_streak = fields.current_streak;
            profile.longest_streak = fields.longest_streak;
            profile.last_check_in_date = Some(fields.last_check_in_date);
            profile.updated_at = Utc::now();
        }
        Ok(Some(before))
    }

    async fn query_daily_stats(
        &self,
        user_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> PortResult<Vec<DailyStat>> {
        let mut stats: Vec<DailyStat> = self
            .tables()
            .daily_stats
            .values()
            .filter(|s| s.user_id == user_id && s.date >= start && s.date <= end)
            .cloned()
            .collect();
        stats.sort_by_key(|s| s.date);
        Ok(stats)
    }

    async fn list_daily_stats(&self, user_id: Uuid) -> PortResult<Vec<DailyStat>> {
        let mut stats: Vec<DailyStat> = self
            .tables()
            .daily_stats
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        stats.sort_by_key(|s| s.date);
        Ok(stats)
    }

    async fn create_document(&self, user_id: Uuid, title: &str) -> PortResult<Document> {
        let now = Utc::now();
        let document = Document {
            id: Uuid::new_v4(),
            user_id,
            title: title.to_string(),
            content: String::new(),
            word_count: 0,
            is_archived: false,
            created_at: now,
            updated_at: now,
        };
        self.tables().documents.insert(document.id, document.clone());
        Ok(document)
    }

    async fn get_document(&self, document_id: Uuid) -> PortResult<Document> {
        self.tables()
            .documents
            .get(&document_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Document {} not found", document_id)))
    }

    async fn list_documents(&self, user_id: Uuid) -> PortResult<Vec<Document>> {
        let mut documents: Vec<Document> = self
            .tables()
            .documents
            .values()
            .filter(|d| d.user_id == user_id && !d.is_archived)
            .cloned()
            .collect();
        documents.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(documents)
    }

    async fn update_document_content(
        &self,
        document_id: Uuid,
        content: &str,
        word_count: u32,
    ) -> PortResult<()> {
        let _write = self.begin_document_write().await;
        let mut tables = self.tables();
        if tables.failing_content_writes > 0 {
            tables.failing_content_writes -= 1;
            return Err(PortError::Unexpected("injected content write failure".to_string()));
        }
        let document = document_mut(&mut tables, document_id)?;
        document.content = content.to_string();
        document.word_count = word_count;
        document.updated_at = Utc::now();
        tables.content_writes.push(ContentWrite {
            document_id,
            content: content.to_string(),
            word_count,
        });
        Ok(())
    }

    async fn update_document_title(&self, document_id: Uuid, title: &str) -> PortResult<()> {
        let _write = self.begin_document_write().await;
        let mut tables = self.tables();
        let document = document_mut(&mut tables, document_id)?;
        document.title = title.to_string();
        document.updated_at = Utc::now();
        tables.title_writes.push((document_id, title.to_string()));
        Ok(())
    }

    async fn archive_document(&self, document_id: Uuid) -> PortResult<()> {
        let mut tables = self.tables();
        let document = document_mut(&mut tables, document_id)?;
        document.is_archived = true;
        document.updated_at = Utc::now();
        Ok(())
    }
}
