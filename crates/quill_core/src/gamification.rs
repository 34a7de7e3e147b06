//! crates/quill_core/src/gamification.rs
//!
//! XP and leveling formulas. Everything here is pure arithmetic.

/// Words that earn one unit of XP.
pub const WORDS_PER_XP: u32 = 10;

/// XP granted per unit of words.
pub const XP_PER_UNIT: u32 = 1;

/// Maximum XP a single writing session can earn.
pub const MAX_SESSION_XP: u32 = 50;

/// XP needed per level, multiplied by the level number.
pub const XP_PER_LEVEL: u32 = 100;

/// XP earned for a session of `words_written` words, capped at [`MAX_SESSION_XP`].
pub fn calculate_session_xp(words_written: u32) -> u32 {
    let raw = (words_written / WORDS_PER_XP).saturating_mul(XP_PER_UNIT);
    raw.min(MAX_SESSION_XP)
}

/// XP required to complete `level`.
pub fn xp_for_level(level: u32) -> u64 {
    u64::from(level.max(1)) * u64::from(XP_PER_LEVEL)
}

/// The result of adding XP to a profile's `(xp, level)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelUpdate {
    pub xp: u32,
    pub level: u32,
    pub leveled_up: bool,
}

/// Adds `delta` to `current_xp` and consumes level thresholds until the
/// remainder no longer reaches the next one.
///
/// Thresholds grow linearly with the level, so the loop runs at most about
/// `sqrt(2 * (current_xp + delta) / 100)` times; with `u32` inputs that is a
/// few thousand iterations in the worst case.
pub fn apply_xp(current_xp: u32, current_level: u32, delta: u32) -> LevelUpdate {
    let start_level = current_level.max(1);
    let mut level = start_level;
    let mut remaining = u64::from(current_xp) + u64::from(delta);

    while level < u32::MAX && remaining >= xp_for_level(level) {
        remaining -= xp_for_level(level);
        level += 1;
    }

    LevelUpdate {
        // remaining < xp_for_level(level) unless the level saturated.
        xp: u32::try_from(remaining).unwrap_or(u32::MAX),
        level,
        leveled_up: level > start_level,
    }
}

/// How far `current_xp` is through `level`, rounded and clamped to `0..=100`.
pub fn xp_progress_percent(current_xp: u32, level: u32) -> u8 {
    let required = xp_for_level(level);
    let scaled = u64::from(current_xp) * 100;
    let rounded = (scaled + required / 2) / required;
    rounded.min(100) as u8
}

/// What the XP bar shows for a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelProgress {
    pub level: u32,
    pub xp: u32,
    pub xp_for_next_level: u64,
    pub xp_remaining: u64,
    pub percent: u8,
}

impl LevelProgress {
    pub fn new(xp: u32, level: u32) -> Self {
        let required = xp_for_level(level);
        Self {
            level: level.max(1),
            xp,
            xp_for_next_level: required,
            xp_remaining: required.saturating_sub(u64::from(xp)),
            percent: xp_progress_percent(xp, level),
        }
    }

    pub fn for_profile(profile: &crate::domain::Profile) -> Self {
        Self::new(profile.xp, profile.level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_xp_matches_formula() {
        for words in (0..2_000).step_by(7) {
            assert_eq!(calculate_session_xp(words), (words / 10).min(50));
        }
        assert_eq!(calculate_session_xp(0), 0);
        assert_eq!(calculate_session_xp(9), 0);
        assert_eq!(calculate_session_xp(10), 1);
        assert_eq!(calculate_session_xp(500), 50);
        assert_eq!(calculate_session_xp(10_000), 50);
        assert_eq!(calculate_session_xp(u32::MAX), 50);
    }

    #[test]
    fn session_xp_is_non_decreasing() {
        let mut previous = 0;
        for words in 0..1_000 {
            let xp = calculate_session_xp(words);
            assert!(xp >= previous);
            previous = xp;
        }
    }

    #[test]
    fn level_thresholds_grow_strictly() {
        assert_eq!(xp_for_level(1), 100);
        assert_eq!(xp_for_level(7), 700);
        for level in 1..500 {
            assert!(xp_for_level(level + 1) > xp_for_level(level));
        }
    }

    #[test]
    fn apply_xp_levels_up_once() {
        let update = apply_xp(95, 1, 10);
        assert_eq!(
            update,
            LevelUpdate {
                xp: 5,
                level: 2,
                leveled_up: true
            }
        );
    }

    #[test]
    fn apply_xp_stops_when_remainder_is_below_next_threshold() {
        let update = apply_xp(0, 1, 250);
        assert_eq!(update.xp, 150);
        assert_eq!(update.level, 2);
        assert!(update.leveled_up);
    }

    #[test]
    fn apply_xp_can_cross_several_levels() {
        // 100 + 200 + 300 = 600 consumed, 50 left at level 4.
        let update = apply_xp(0, 1, 650);
        assert_eq!(update.level, 4);
        assert_eq!(update.xp, 50);
    }

    #[test]
    fn apply_xp_without_crossing_keeps_level() {
        let update = apply_xp(10, 3, 20);
        assert_eq!(update.xp, 30);
        assert_eq!(update.level, 3);
        assert!(!update.leveled_up);
    }

    #[test]
    fn apply_xp_terminates_on_huge_delta() {
        let update = apply_xp(u32::MAX, 1, u32::MAX);
        assert!(update.leveled_up);
        assert!(u64::from(update.xp) < xp_for_level(update.level));
    }

    #[test]
    fn progress_percent_stays_in_range() {
        for level in 1..20 {
            for xp in 0..(level * 100) {
                assert!(xp_progress_percent(xp, level) <= 100);
            }
        }
        assert_eq!(xp_progress_percent(0, 1), 0);
        assert_eq!(xp_progress_percent(50, 1), 50);
        assert_eq!(xp_progress_percent(1, 3), 0);
        assert_eq!(xp_progress_percent(2, 3), 1);
        assert_eq!(xp_progress_percent(5_000, 1), 100);
    }

    #[test]
    fn level_progress_reports_remaining_xp() {
        let progress = LevelProgress::new(150, 2);
        assert_eq!(progress.xp_for_next_level, 200);
        assert_eq!(progress.xp_remaining, 50);
        assert_eq!(progress.percent, 75);
    }
}
