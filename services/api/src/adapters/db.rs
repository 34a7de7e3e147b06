//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! Every read-modify-write the core relies on is a single statement here
//! (`INSERT .. ON CONFLICT DO UPDATE`, conditional `UPDATE`) or a single
//! transaction, so concurrent callers on the same row cannot lose each
//! other's updates.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use quill_core::domain::{
    ActivityDelta, DailyStat, Document, Profile, StreakFields, User, UserCredentials,
};
use quill_core::ports::{DatabaseService, PortError, PortResult, XpState};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn not_found_or_unexpected(e: sqlx::Error, what: String) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(what),
        _ => unexpected(e),
    }
}

/// Counters are `INTEGER` columns; values beyond `i32` are refused rather than wrapped.
fn to_column(value: u32, field: &str) -> PortResult<i32> {
    i32::try_from(value)
        .map_err(|_| PortError::InvalidInput(format!("{} {} is out of range", field, value)))
}

fn from_column(value: i32) -> u32 {
    value.max(0) as u32
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    user_id: Uuid,
    email: String,
    hashed_password: String,
}
impl UserRecord {
    fn to_credentials(self) -> UserCredentials {
        UserCredentials {
            user_id: self.user_id,
            email: self.email,
            hashed_password: self.hashed_password,
        }
    }
}

#[derive(FromRow)]
struct ProfileRecord {
    user_id: Uuid,
    xp: i32,
    level: i32,
    current_streak: i32,
    longest_streak: i32,
    last_check_in_date: Option<NaiveDate>,
    streak_freezes: i32,
    badges: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl ProfileRecord {
    fn to_domain(self) -> Profile {
        Profile {
            user_id: self.user_id,
            xp: from_column(self.xp),
            level: from_column(self.level).max(1),
            current_streak: from_column(self.current_streak),
            longest_streak: from_column(self.longest_streak),
            last_check_in_date: self.last_check_in_date,
            streak_freezes: from_column(self.streak_freezes),
            badges: self.badges.into_iter().collect(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(FromRow)]
struct DailyStatRecord {
    id: Uuid,
    user_id: Uuid,
    date: NaiveDate,
    words_written: i32,
    sessions_count: i32,
    minutes_written: i32,
    xp_earned: i32,
    checked_in: bool,
}
impl DailyStatRecord {
    fn to_domain(self) -> DailyStat {
        DailyStat {
            id: self.id,
            user_id: self.user_id,
            date: self.date,
            words_written: from_column(self.words_written),
            sessions_count: from_column(self.sessions_count),
            minutes_written: from_column(self.minutes_written),
            xp_earned: from_column(self.xp_earned),
            checked_in: self.checked_in,
        }
    }
}

#[derive(FromRow)]
struct DocumentRecord {
    id: Uuid,
    user_id: Uuid,
    title: String,
    content: String,
    word_count: i32,
    is_archived: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl DocumentRecord {
    fn to_domain(self) -> Document {
        Document {
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            content: self.content,
            word_count: from_column(self.word_count),
            is_archived: self.is_archived,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

const PROFILE_COLUMNS: &str = "user_id, xp, level, current_streak, longest_streak, \
     last_check_in_date, streak_freezes, badges, created_at, updated_at";

const DAILY_STAT_COLUMNS: &str =
    "id, user_id, date, words_written, sessions_count, minutes_written, xp_earned, checked_in";

const DOCUMENT_COLUMNS: &str =
    "id, user_id, title, content, word_count, is_archived, created_at, updated_at";

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn create_user_with_email(
        &self,
        email: &str,
        hashed_password: &str,
    ) -> PortResult<User> {
        let user_id = Uuid::new_v4();
        sqlx::query("INSERT INTO users (user_id, email, hashed_password) VALUES ($1, $2, $3)")
            .bind(user_id)
            .bind(email)
            .bind(hashed_password)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                    PortError::InvalidInput(format!("Email {} is already registered", email))
                }
                _ => unexpected(e),
            })?;

        Ok(User {
            user_id,
            email: Some(email.to_string()),
        })
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT user_id, email, hashed_password FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found_or_unexpected(e, format!("User {} not found", email)))?;
        Ok(record.to_credentials())
    }

    async fn create_auth_session(
        &self,
        session_id: &str,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(session_id)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn validate_auth_session(&self, session_id: &str) -> PortResult<Uuid> {
        let user_id: Option<Uuid> = sqlx::query_scalar(
            "SELECT user_id FROM auth_sessions WHERE id = $1 AND expires_at > now()",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        user_id.ok_or(PortError::NotAuthenticated)
    }

    async fn delete_auth_session(&self, session_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn get_or_create_profile(&self, user_id: Uuid) -> PortResult<Profile> {
        sqlx::query(
            "INSERT INTO profiles (user_id, streak_freezes) VALUES ($1, $2) \
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(to_column(Profile::STARTING_STREAK_FREEZES, "streak_freezes")?)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        self.get_profile(user_id).await
    }

    async fn get_profile(&self, user_id: Uuid) -> PortResult<Profile> {
        let sql = format!("SELECT {} FROM profiles WHERE user_id = $1", PROFILE_COLUMNS);
        let record = sqlx::query_as::<_, ProfileRecord>(&sql)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| not_found_or_unexpected(e, format!("Profile {} not found", user_id)))?;
        Ok(record.to_domain())
    }

    async fn compare_and_set_xp(
        &self,
        user_id: Uuid,
        expected: XpState,
        new: XpState,
    ) -> PortResult<bool> {
        let result = sqlx::query(
            "UPDATE profiles SET xp = $1, level = $2, updated_at = now() \
             WHERE user_id = $3 AND xp = $4 AND level = $5",
        )
        .bind(to_column(new.0, "xp")?)
        .bind(to_column(new.1, "level")?)
        .bind(user_id)
        .bind(to_column(expected.0, "xp")?)
        .bind(to_column(expected.1, "level")?)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_daily_stat(
        &self,
        user_id: Uuid,
        date: NaiveDate,
    ) -> PortResult<Option<DailyStat>> {
        let sql = format!(
            "SELECT {} FROM daily_stats WHERE user_id = $1 AND date = $2",
            DAILY_STAT_COLUMNS
        );
        let record = sqlx::query_as::<_, DailyStatRecord>(&sql)
            .bind(user_id)
            .bind(date)
            .fetch_optional(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(record.map(DailyStatRecord::to_domain))
    }

    async fn accumulate_daily_stat(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        delta: ActivityDelta,
    ) -> PortResult<DailyStat> {
        let sql = format!(
            "INSERT INTO daily_stats \
               (id, user_id, date, words_written, sessions_count, minutes_written, xp_earned, checked_in) \
             VALUES ($1, $2, $3, $4, 1, $5, $6, TRUE) \
             ON CONFLICT (user_id, date) DO UPDATE SET \
               words_written = daily_stats.words_written + EXCLUDED.words_written, \
               sessions_count = daily_stats.sessions_count + 1, \
               minutes_written = daily_stats.minutes_written + EXCLUDED.minutes_written, \
               xp_earned = daily_stats.xp_earned + EXCLUDED.xp_earned, \
               checked_in = TRUE \
             RETURNING {}",
            DAILY_STAT_COLUMNS
        );
        let record = sqlx::query_as::<_, DailyStatRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(date)
            .bind(to_column(delta.words_written, "words_written")?)
            .bind(to_column(delta.minutes_written, "minutes_written")?)
            .bind(to_column(delta.xp_earned, "xp_earned")?)
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn check_in_day(
        &self,
        user_id: Uuid,
        date: NaiveDate,
        advance: &(dyn for<'p> Fn(&'p Profile) -> StreakFields + Send + Sync),
    ) -> PortResult<Option<Profile>> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        // The conflict branch only updates (and returns a row) when the day was
        // not checked in yet, so exactly one caller sees `Some`.
        let claimed: Option<Uuid> = sqlx::query_scalar(
            "INSERT INTO daily_stats \
               (id, user_id, date, words_written, sessions_count, minutes_written, xp_earned, checked_in) \
             VALUES ($1, $2, $3, 0, 0, 0, 0, TRUE) \
             ON CONFLICT (user_id, date) DO UPDATE SET checked_in = TRUE \
             WHERE daily_stats.checked_in = FALSE \
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(date)
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?;
        if claimed.is_none() {
            tx.rollback().await.map_err(unexpected)?;
            return Ok(None);
        }

        let sql = format!(
            "SELECT {} FROM profiles WHERE user_id = $1 FOR UPDATE",
            PROFILE_COLUMNS
        );
        let before = sqlx::query_as::<_, ProfileRecord>(&sql)
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| not_found_or_unexpected(e, format!("Profile {} not found", user_id)))?
            .to_domain();
        let fields = advance(&before);

        sqlx::query(
            "UPDATE profiles SET current_streak = $1, longest_streak = $2, \
             last_check_in_date = $3, updated_at = now() WHERE user_id = $4",
        )
        .bind(to_column(fields.current_streak, "current_streak")?)
        .bind(to_column(fields.longest_streak, "longest_streak")?)
        .bind(fields.last_check_in_date)
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        // Dropping `tx` on any early return above rolls the claim back.
        tx.commit().await.map_err(unexpected)?;
        Ok(Some(before))
    }

    async fn query_daily_stats(
        &self,
        user_id: Uuid,
        start: NaiveDate,
        end: NaiveDate,
    ) -> PortResult<Vec<DailyStat>> {
        let sql = format!(
            "SELECT {} FROM daily_stats WHERE user_id = $1 AND date BETWEEN $2 AND $3 ORDER BY date ASC",
            DAILY_STAT_COLUMNS
        );
        let records = sqlx::query_as::<_, DailyStatRecord>(&sql)
            .bind(user_id)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn list_daily_stats(&self, user_id: Uuid) -> PortResult<Vec<DailyStat>> {
        let sql = format!(
            "SELECT {} FROM daily_stats WHERE user_id = $1 ORDER BY date ASC",
            DAILY_STAT_COLUMNS
        );
        let records = sqlx::query_as::<_, DailyStatRecord>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn create_document(&self, user_id: Uuid, title: &str) -> PortResult<Document> {
        let sql = format!(
            "INSERT INTO documents (id, user_id, title) VALUES ($1, $2, $3) RETURNING {}",
            DOCUMENT_COLUMNS
        );
        let record = sqlx::query_as::<_, DocumentRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(title)
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn get_document(&self, document_id: Uuid) -> PortResult<Document> {
        let sql = format!("SELECT {} FROM documents WHERE id = $1", DOCUMENT_COLUMNS);
        let record = sqlx::query_as::<_, DocumentRecord>(&sql)
            .bind(document_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                not_found_or_unexpected(e, format!("Document {} not found", document_id))
            })?;
        Ok(record.to_domain())
    }

    async fn list_documents(&self, user_id: Uuid) -> PortResult<Vec<Document>> {
        let sql = format!(
            "SELECT {} FROM documents WHERE user_id = $1 AND is_archived = FALSE \
             ORDER BY updated_at DESC",
            DOCUMENT_COLUMNS
        );
        let records = sqlx::query_as::<_, DocumentRecord>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn update_document_content(
        &self,
        document_id: Uuid,
        content: &str,
        word_count: u32,
    ) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE documents SET content = $1, word_count = $2, updated_at = now() WHERE id = $3",
        )
        .bind(content)
        .bind(to_column(word_count, "word_count")?)
        .bind(document_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Document {} not found", document_id)));
        }
        Ok(())
    }

    async fn update_document_title(&self, document_id: Uuid, title: &str) -> PortResult<()> {
        let result =
            sqlx::query("UPDATE documents SET title = $1, updated_at = now() WHERE id = $2")
                .bind(title)
                .bind(document_id)
                .execute(&self.pool)
                .await
                .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Document {} not found", document_id)));
        }
        Ok(())
    }

    async fn archive_document(&self, document_id: Uuid) -> PortResult<()> {
        let result = sqlx::query(
            "UPDATE documents SET is_archived = TRUE, updated_at = now() WHERE id = $1",
        )
        .bind(document_id)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Document {} not found", document_id)));
        }
        Ok(())
    }
}
