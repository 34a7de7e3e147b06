//! crates/quill_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

/// A user's gamification state: XP, level and streak bookkeeping.
///
/// `xp` is the progress inside the current level, so it always stays below
/// `xp_for_level(level)` once a ledger update has been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub user_id: Uuid,
    pub xp: u32,
    pub level: u32,
    pub current_streak: u32,
    pub longest_streak: u32,
    /// `None` until the first check-in ever.
    pub last_check_in_date: Option<NaiveDate>,
    pub streak_freezes: u32,
    pub badges: BTreeSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// Streak freezes granted to a brand-new profile.
    pub const STARTING_STREAK_FREEZES: u32 = 1;

    /// The profile a user gets on first authenticated use.
    pub fn new(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            xp: 0,
            level: 1,
            current_streak: 0,
            longest_streak: 0,
            last_check_in_date: None,
            streak_freezes: Self::STARTING_STREAK_FREEZES,
            badges: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// The streak fields written by a novel check-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakFields {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_check_in_date: NaiveDate,
}

/// Per-user-per-day aggregate of writing activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyStat {
    pub id: Uuid,
    pub user_id: Uuid,
    pub date: NaiveDate,
    pub words_written: u32,
    pub sessions_count: u32,
    pub minutes_written: u32,
    pub xp_earned: u32,
    pub checked_in: bool,
}

/// One session's contribution to a day's record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivityDelta {
    pub words_written: u32,
    pub minutes_written: u32,
    pub xp_earned: u32,
}

/// Lifetime sums over every daily record of a user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DailyTotals {
    pub total_words: u64,
    pub total_sessions: u64,
    pub total_minutes: u64,
    pub total_xp: u64,
    pub days_active: u64,
}

/// A writing project owned by one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub content: String,
    pub word_count: u32,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Represents a user - used throughout app
#[derive(Debug, Clone)]
pub struct User {
    pub user_id: Uuid,
    pub email: Option<String>,
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user_id: Uuid,
    pub email: String,
    pub hashed_password: String,
}

// Represents a browser login session (auth cookie)
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub id: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}
