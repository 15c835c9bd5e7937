//! User-facing reward notifications.
//!
//! The ledger broadcasts one notification per visible change; the front end
//! renders them as toasts. `Display` produces the toast text.

use greenleaf_core::AchievementId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Something the user should be told about.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RewardNotification {
    /// Experience granted with a reason, without a level change
    ExperienceGained {
        /// Points granted
        amount: u32,
        /// Why
        reason: String,
    },
    /// A new level was reached
    LevelUp {
        /// The new level
        level: u32,
    },
    /// An achievement was unlocked
    AchievementUnlocked {
        /// Which achievement
        achievement: AchievementId,
        /// Display title
        title: String,
        /// Icon name
        icon: String,
    },
}

impl fmt::Display for RewardNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExperienceGained { amount, reason } => write!(f, "+{amount} XP: {reason}"),
            Self::LevelUp { level } => write!(f, "🎉 Level Up! You're now level {level}!"),
            Self::AchievementUnlocked { title, .. } => write!(f, "Achievement Unlocked! {title}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toast_texts() {
        assert_eq!(
            RewardNotification::ExperienceGained {
                amount: 30,
                reason: "Plant added to collection".into()
            }
            .to_string(),
            "+30 XP: Plant added to collection"
        );
        assert_eq!(
            RewardNotification::LevelUp { level: 3 }.to_string(),
            "🎉 Level Up! You're now level 3!"
        );
        assert_eq!(
            RewardNotification::AchievementUnlocked {
                achievement: AchievementId::FIRST_BLOOM,
                title: "First Bloom".into(),
                icon: "Flower2".into(),
            }
            .to_string(),
            "Achievement Unlocked! First Bloom"
        );
    }
}
