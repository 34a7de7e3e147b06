pub mod documents;
pub mod domain;
pub mod gamification;
pub mod ledger;
pub mod memory;
pub mod ports;
pub mod session;
pub mod stats;
pub mod streak;

pub use domain::{
    ActivityDelta, AuthSession, DailyStat, DailyTotals, Document, Profile, StreakFields, User,
    UserCredentials,
};
pub use gamification::{LevelProgress, LevelUpdate};
pub use ports::{DatabaseService, PortError, PortResult};
pub use session::{EditingSession, SessionConfig, SessionPhase, SessionSnapshot, SessionSummary};
pub use streak::{CheckInOutcome, StreakTransition};
