//! Reward ledger capability.
//!
//! The reward ledger owns a user's experience points, level, counters,
//! activity streak and unlocked achievements. Event handlers never read or
//! cache that state; they only *request* mutations through [`RewardLedger`]
//! and act on the values the ledger returns.
//!
//! # Atomicity
//!
//! Counter thresholds are evaluated on the value returned by
//! [`RewardLedger::increment_counter`], which implementations must compute
//! atomically. Two concurrent increments from 4 therefore observe 5 and 6,
//! never 5 and 5.
//!
//! # Idempotency
//!
//! Mutating requests may carry an [`IdempotencyKey`]. A ledger that has
//! already applied a key returns the current state with `applied = false`
//! instead of applying the request again.

use crate::reward::{AchievementId, Counter, IdempotencyKey};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors returned by reward ledger implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The ledger backend could not be reached (may succeed on retry)
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// The request timed out (may succeed on retry)
    #[error("Ledger request timed out after {0}ms")]
    Timeout(u64),

    /// No authenticated user to attribute rewards to
    #[error("No authenticated user")]
    Unauthenticated,

    /// The ledger refused the request
    #[error("Ledger rejected request: {0}")]
    Rejected(String),
}

impl LedgerError {
    /// Whether retrying the same request could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout(_))
    }
}

/// Boxed future returned by ledger operations.
pub type LedgerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, LedgerError>> + Send + 'a>>;

/// Request to add experience points.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperienceGrant {
    /// Points to add
    pub amount: u32,
    /// Human readable reason shown to the user
    pub reason: Option<String>,
    /// Deduplication key
    pub idempotency_key: Option<IdempotencyKey>,
}

impl ExperienceGrant {
    /// Grant `amount` points for `reason`.
    #[must_use]
    pub fn new(amount: u32, reason: impl Into<String>) -> Self {
        Self {
            amount,
            reason: Some(reason.into()),
            idempotency_key: None,
        }
    }

    /// Attach an idempotency key.
    #[must_use]
    pub fn with_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }
}

/// Result of an [`ExperienceGrant`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperienceOutcome {
    /// Experience total after the grant
    pub total_xp: u64,
    /// Level after the grant
    pub level: u32,
    /// Whether the grant crossed a level boundary
    pub leveled_up: bool,
    /// `false` when the idempotency key had already been applied
    pub applied: bool,
}

/// Request to bump a counter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterIncrement {
    /// Counter to bump
    pub counter: Counter,
    /// Amount to add
    pub delta: u32,
    /// Deduplication key
    pub idempotency_key: Option<IdempotencyKey>,
}

impl CounterIncrement {
    /// Increment `counter` by `delta`.
    #[must_use]
    pub const fn new(counter: Counter, delta: u32) -> Self {
        Self {
            counter,
            delta,
            idempotency_key: None,
        }
    }

    /// Attach an idempotency key.
    #[must_use]
    pub fn with_key(mut self, key: IdempotencyKey) -> Self {
        self.idempotency_key = Some(key);
        self
    }
}

/// Counter values around an increment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterUpdate {
    /// Counter that was bumped
    pub counter: Counter,
    /// Value before this increment
    pub previous: u64,
    /// Value after this increment
    pub current: u64,
    /// `false` when the idempotency key had already been applied
    pub applied: bool,
}

impl CounterUpdate {
    /// Whether this increment moved the counter onto `threshold`.
    #[must_use]
    pub const fn reached(&self, threshold: u64) -> bool {
        self.applied && self.previous < threshold && self.current >= threshold
    }
}

/// Request to unlock an achievement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementAward {
    /// Achievement to unlock
    pub achievement: AchievementId,
    /// Entity (plant) the achievement refers to, if any
    pub entity: Option<String>,
}

impl AchievementAward {
    /// Unscoped award.
    #[must_use]
    pub const fn new(achievement: AchievementId) -> Self {
        Self {
            achievement,
            entity: None,
        }
    }

    /// Award scoped to an entity.
    #[must_use]
    pub fn scoped(achievement: AchievementId, entity: impl Into<String>) -> Self {
        Self {
            achievement,
            entity: Some(entity.into()),
        }
    }
}

/// Result of an [`AchievementAward`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AwardOutcome {
    /// Newly unlocked; carries the definition's XP reward
    Awarded {
        /// Bonus experience granted with the achievement
        xp_reward: u32,
    },
    /// The user already holds the achievement
    AlreadyEarned,
    /// No definition with that id exists
    Unknown,
}

/// Result of recording a day of activity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakUpdate {
    /// Consecutive active days, including the recorded one
    pub current: u32,
    /// Longest streak ever reached
    pub longest: u32,
    /// `false` when the day had already been recorded
    pub changed: bool,
}

impl StreakUpdate {
    /// Whether this update moved the streak onto `days`.
    #[must_use]
    pub const fn reached(&self, days: u32) -> bool {
        self.changed && self.current == days
    }
}

/// Trait for reward ledger implementations.
///
/// # Dyn Compatibility
///
/// Methods return [`LedgerFuture`] so the ledger can be injected as
/// `Arc<dyn RewardLedger>`.
pub trait RewardLedger: Send + Sync {
    /// Add experience points.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the grant could not be recorded.
    fn add_experience(&self, grant: ExperienceGrant) -> LedgerFuture<'_, ExperienceOutcome>;

    /// Atomically increment a counter and return the values around the increment.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the increment could not be recorded.
    fn increment_counter(&self, increment: CounterIncrement) -> LedgerFuture<'_, CounterUpdate>;

    /// Unlock an achievement unless already held.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the award could not be recorded.
    fn award_achievement(&self, award: AchievementAward) -> LedgerFuture<'_, AwardOutcome>;

    /// Record activity on `day` and update the streak.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the activity could not be recorded.
    fn record_activity(&self, day: NaiveDate) -> LedgerFuture<'_, StreakUpdate>;

    /// Current value of a counter.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError`] if the ledger could not be read.
    fn counter_value(&self, counter: Counter) -> LedgerFuture<'_, u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors() {
        assert!(LedgerError::Unavailable("503".into()).is_transient());
        assert!(LedgerError::Timeout(5_000).is_transient());
        assert!(!LedgerError::Unauthenticated.is_transient());
        assert!(!LedgerError::Rejected("bad amount".into()).is_transient());
    }

    #[test]
    fn counter_update_reached_threshold() {
        let update = CounterUpdate {
            counter: Counter::PlantsAdded,
            previous: 4,
            current: 5,
            applied: true,
        };
        assert!(update.reached(5));
        assert!(!update.reached(4));
        assert!(!update.reached(6));

        let replay = CounterUpdate {
            applied: false,
            ..update
        };
        assert!(!replay.reached(5));
    }

    #[test]
    fn streak_reached_only_when_changed() {
        let update = StreakUpdate {
            current: 7,
            longest: 7,
            changed: true,
        };
        assert!(update.reached(7));
        assert!(!StreakUpdate { changed: false, ..update }.reached(7));
    }

    #[test]
    fn scoped_award_carries_entity() {
        let award = AchievementAward::scoped(AchievementId::FIRST_PLANT, "plant-1");
        assert_eq!(award.entity.as_deref(), Some("plant-1"));
        assert_eq!(AchievementAward::new(AchievementId::TEN_PLANTS).entity, None);
    }
}
