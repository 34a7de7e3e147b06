//! crates/quill_core/src/streak.rs
//!
//! Daily check-ins and the streak they maintain. Dates are compared as
//! calendar days, never as instants.

use chrono::NaiveDate;
use tracing::info;
use uuid::Uuid;

use crate::domain::{Profile, StreakFields};
use crate::ports::{DatabaseService, PortResult};

/// How a check-in relates to the previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreakTransition {
    /// First check-in ever.
    NoHistory,
    /// Already checked in on this calendar day.
    SameDay,
    /// The previous check-in was yesterday.
    Consecutive,
    /// A gap of more than one day, or a date earlier than the last check-in.
    Broken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreakUpdate {
    pub current_streak: u32,
    pub longest_streak: u32,
    pub transition: StreakTransition,
}

/// Computes the streak after checking in on `today`.
pub fn next_streak(
    last_check_in: Option<NaiveDate>,
    today: NaiveDate,
    current_streak: u32,
    longest_streak: u32,
) -> StreakUpdate {
    let (current_streak, transition) = match last_check_in {
        None => (1, StreakTransition::NoHistory),
        Some(last) => match (today - last).num_days() {
            0 => (current_streak, StreakTransition::SameDay),
            1 => (current_streak.saturating_add(1), StreakTransition::Consecutive),
            _ => (1, StreakTransition::Broken),
        },
    };

    StreakUpdate {
        current_streak,
        longest_streak: longest_streak.max(current_streak),
        transition,
    }
}

/// What a check-in call reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckInOutcome {
    pub streak: u32,
    pub longest_streak: u32,
    pub is_new_check_in: bool,
    /// `None` when the day was already checked in.
    pub transition: Option<StreakTransition>,
}

/// Checks `user_id` in for `today`. Idempotent per calendar day.
///
/// Claiming the day and writing the advanced streak are one store operation,
/// so concurrent check-ins advance the streak once and a failed check-in
/// leaves the day unclaimed for the retry.
pub async fn check_in(
    db: &dyn DatabaseService,
    user_id: Uuid,
    today: NaiveDate,
) -> PortResult<CheckInOutcome> {
    db.get_or_create_profile(user_id).await?;

    let advance = |profile: &Profile| {
        let update = advance_profile(profile, today);
        StreakFields {
            current_streak: update.current_streak,
            longest_streak: update.longest_streak,
            last_check_in_date: today,
        }
    };

    let Some(before) = db.check_in_day(user_id, today, &advance).await? else {
        let profile = db.get_profile(user_id).await?;
        return Ok(CheckInOutcome {
            streak: profile.current_streak,
            longest_streak: profile.longest_streak,
            is_new_check_in: false,
            transition: None,
        });
    };

    let update = advance_profile(&before, today);
    info!(
        "User {} checked in on {} ({:?}), streak is now {}",
        user_id, today, update.transition, update.current_streak
    );

    Ok(CheckInOutcome {
        streak: update.current_streak,
        longest_streak: update.longest_streak,
        is_new_check_in: true,
        transition: Some(update.transition),
    })
}

fn advance_profile(profile: &Profile, today: NaiveDate) -> StreakUpdate {
    next_streak(
        profile.last_check_in_date,
        today,
        profile.current_streak,
        profile.longest_streak,
    )
}
