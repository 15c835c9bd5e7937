//! # Greenleaf Core
//!
//! Core traits and types for turning backend row changes into gamification
//! rewards.
//!
//! ## Core Concepts
//!
//! - **Row event**: an immutable notification that a row was inserted or updated
//! - **Event source**: publishes row events to subscriptions
//! - **Reward ledger**: owns experience, counters, streaks and achievements
//! - **Row counter / current user**: read-side lookups used by award conditions
//! - **Environment**: injected dependencies via traits
//!
//! ## Architecture Principles
//!
//! - Dependency injection, no ambient context
//! - Dyn-compatible capability traits (`Arc<dyn RewardLedger>`)
//! - Thresholds decided on atomically returned ledger values
//! - Idempotency keys at the ledger boundary
//!
//! ## Example
//!
//! ```ignore
//! use greenleaf_core::ledger::{ExperienceGrant, RewardLedger};
//!
//! async fn reward(ledger: &dyn RewardLedger) -> Result<(), LedgerError> {
//!     let outcome = ledger
//!         .add_experience(ExperienceGrant::new(20, "Growth milestone recorded"))
//!         .await?;
//!     if outcome.leveled_up {
//!         println!("Now level {}", outcome.level);
//!     }
//!     Ok(())
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, NaiveDate, Utc};
pub use serde::{Deserialize, Serialize};

pub mod event;
pub mod event_source;
pub mod filter;
pub mod ledger;
pub mod query;
pub mod reward;
pub mod rows;

/// Environment module - Dependency injection traits
///
/// All external dependencies are abstracted behind traits and injected
/// into handlers explicitly.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use greenleaf_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use event::{ChangeKind, EventId, RowEvent};
pub use event_source::{
    EventSource, EventSourceError, Subscription, SubscriptionId, SubscriptionSpec,
};
pub use filter::RowFilter;
pub use ledger::{LedgerError, RewardLedger};
pub use reward::{AchievementId, Counter, IdempotencyKey};

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
