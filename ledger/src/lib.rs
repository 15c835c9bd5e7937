//! # Greenleaf Ledger
//!
//! An in-process implementation of the
//! [`RewardLedger`](greenleaf_core::ledger::RewardLedger) capability.
//!
//! ## Rules
//!
//! - Level is `floor(sqrt(total_xp / 100)) + 1`; the next level starts at
//!   `level² × 100` experience.
//! - Unlocking an achievement grants its definition's XP reward and bumps
//!   `achievements_earned`. Each achievement is unlocked at most once per user.
//! - Activity on consecutive days extends the streak; a gap resets it to 1.
//! - Requests carrying an idempotency key that was already applied are no-ops.
//!
//! Every visible change is broadcast as a [`RewardNotification`].

pub mod catalog;
pub mod memory;
pub mod notification;
pub mod progress;

pub use catalog::{AchievementCatalog, AchievementDefinition};
pub use memory::{DEFAULT_KEY_WINDOW, EarnedAchievement, InMemoryLedger, UserStats};
pub use notification::RewardNotification;
pub use progress::{level_for_xp, xp_for_next_level};
