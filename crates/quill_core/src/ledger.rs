//! crates/quill_core/src/ledger.rs
//!
//! The only writer of a profile's `xp` and `level`.

use tracing::{info, warn};
use uuid::Uuid;

use crate::gamification::{apply_xp, LevelUpdate};
use crate::ports::{DatabaseService, PortError, PortResult};

/// Attempts before giving up on a contended profile.
pub const MAX_XP_WRITE_ATTEMPTS: usize = 5;

/// Adds `amount` XP to the user's profile, leveling up as often as the
/// thresholds allow. XP only grows through here; `u32` keeps negative
/// amounts unrepresentable.
///
/// The write is a compare-and-set on the `(xp, level)` pair that was read, so
/// two concurrent awards never overwrite each other.
pub async fn add_xp(
    db: &dyn DatabaseService,
    user_id: Uuid,
    amount: u32,
) -> PortResult<LevelUpdate> {
    for attempt in 1..=MAX_XP_WRITE_ATTEMPTS {
        let profile = db.get_profile(user_id).await?;
        let update = apply_xp(profile.xp, profile.level, amount);

        let written = db
            .compare_and_set_xp(
                user_id,
                (profile.xp, profile.level),
                (update.xp, update.level),
            )
            .await?;
        if written {
            if update.leveled_up {
                info!("User {} reached level {}", user_id, update.level);
            }
            return Ok(update);
        }
        warn!(
            "XP write for user {} lost a race (attempt {}/{})",
            user_id, attempt, MAX_XP_WRITE_ATTEMPTS
        );
    }

    Err(PortError::ConcurrentUpdateLost(format!(
        "xp of user {} changed on every attempt",
        user_id
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn add_xp_levels_up() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        store.get_or_create_profile(user).await.unwrap();
        store.compare_and_set_xp(user, (0, 1), (95, 1)).await.unwrap();

        let update = add_xp(&store, user, 10).await.unwrap();
        assert!(update.leveled_up);

        let profile = store.get_profile(user).await.unwrap();
        assert_eq!((profile.xp, profile.level), (5, 2));
    }

    #[tokio::test]
    async fn add_xp_requires_a_profile() {
        let store = InMemoryStore::new();
        let result = add_xp(&store, Uuid::new_v4(), 10).await;
        assert!(matches!(result, Err(PortError::NotFound(_))));
    }

    #[tokio::test]
    async fn zero_xp_changes_nothing() {
        let store = InMemoryStore::new();
        let user = Uuid::new_v4();
        store.get_or_create_profile(user).await.unwrap();

        let update = add_xp(&store, user, 0).await.unwrap();
        assert!(!update.leveled_up);
        assert_eq!((update.xp, update.level), (0, 1));
    }

    #[tokio::test]
    async fn concurrent_awards_are_all_applied() {
        let store = Arc::new(InMemoryStore::new());
        let user = Uuid::new_v4();
        store.get_or_create_profile(user).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move { add_xp(&*store, user, 50).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // 200 XP total: level 1 consumes 100, leaving 100 at level 2.
        let profile = store.get_profile(user).await.unwrap();
        assert_eq!((profile.xp, profile.level), (100, 2));
    }
}
