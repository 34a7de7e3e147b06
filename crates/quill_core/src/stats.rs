//! crates/quill_core/src/stats.rs
//!
//! Per-user-per-day activity accounting.

use chrono::NaiveDate;
use uuid::Uuid;

use crate::domain::{ActivityDelta, DailyStat, DailyTotals};
use crate::ports::{DatabaseService, PortError, PortResult};

/// Adds one session's activity to the `(user_id, date)` record.
///
/// Calls accumulate: the day's `words_written` is the sum of every call's words,
/// and each call counts as one session.
pub async fn record_activity(
    db: &dyn DatabaseService,
    user_id: Uuid,
    date: NaiveDate,
    activity: ActivityDelta,
) -> PortResult<DailyStat> {
    db.accumulate_daily_stat(user_id, date, activity).await
}

pub async fn stats_for_day(
    db: &dyn DatabaseService,
    user_id: Uuid,
    date: NaiveDate,
) -> PortResult<Option<DailyStat>> {
    db.get_daily_stat(user_id, date).await
}

/// Records dated within `[start, end]`, inclusive on both ends.
pub async fn stats_range(
    db: &dyn DatabaseService,
    user_id: Uuid,
    start: NaiveDate,
    end: NaiveDate,
) -> PortResult<Vec<DailyStat>> {
    if start > end {
        return Err(PortError::InvalidInput(format!(
            "range start {} is after end {}",
            start, end
        )));
    }
    db.query_daily_stats(user_id, start, end).await
}

pub async fn totals(db: &dyn DatabaseService, user_id: Uuid) -> PortResult<DailyTotals> {
    let stats = db.list_daily_stats(user_id).await?;
    Ok(DailyTotals::from_stats(&stats))
}

impl DailyTotals {
    pub fn from_stats(stats: &[DailyStat]) -> Self {
        stats.iter().fold(Self::default(), |acc, s| Self {
            total_words: acc.total_words + u64::from(s.words_written),
            total_sessions: acc.total_sessions + u64::from(s.sessions_count),
            total_minutes: acc.total_minutes + u64::from(s.minutes_written),
            total_xp: acc.total_xp + u64::from(s.xp_earned),
            days_active: acc.days_active + 1,
        })
    }
}
