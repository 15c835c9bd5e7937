//! Names of the things a reward ledger keeps track of.

use crate::event::EventId;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Identifier of an achievement definition (e.g. `first_bloom`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AchievementId(Cow<'static, str>);

impl AchievementId {
    /// Logged a flowering milestone.
    pub const FIRST_BLOOM: Self = Self::from_static("first_bloom");
    /// Ten milestones recorded for one plant.
    pub const GROWTH_TRACKER: Self = Self::from_static("growth_tracker");
    /// First plant added.
    pub const FIRST_PLANT: Self = Self::from_static("first_plant");
    /// Five plants added.
    pub const FIVE_PLANTS: Self = Self::from_static("five_plants");
    /// Ten plants added.
    pub const TEN_PLANTS: Self = Self::from_static("ten_plants");
    /// First care task completed.
    pub const FIRST_TASK: Self = Self::from_static("first_task");
    /// Ten care tasks completed.
    pub const TEN_TASKS: Self = Self::from_static("ten_tasks");
    /// Fifty care tasks completed.
    pub const FIFTY_TASKS: Self = Self::from_static("fifty_tasks");
    /// Task completed before 08:00.
    pub const EARLY_BIRD: Self = Self::from_static("early_bird");
    /// Task completed at or after 22:00.
    pub const NIGHT_OWL: Self = Self::from_static("night_owl");
    /// Seven consecutive days of activity.
    pub const SEVEN_DAY_STREAK: Self = Self::from_static("seven_day_streak");
    /// Thirty consecutive days of activity.
    pub const THIRTY_DAY_STREAK: Self = Self::from_static("thirty_day_streak");

    /// Identifier backed by a static string.
    #[must_use]
    pub const fn from_static(id: &'static str) -> Self {
        Self(Cow::Borrowed(id))
    }

    /// Identifier from an owned string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(Cow::Owned(id.into()))
    }

    /// Borrow the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AchievementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-user statistic counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Counter {
    /// Plants added to the collection
    PlantsAdded,
    /// Care tasks completed
    TasksCompleted,
    /// Achievements unlocked
    AchievementsEarned,
    /// Weeks with every task done on time
    PerfectWeeks,
    /// Diseases successfully treated
    DiseasesTreated,
}

impl Counter {
    /// Column name of the counter (`plants_added`, ...).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PlantsAdded => "plants_added",
            Self::TasksCompleted => "tasks_completed",
            Self::AchievementsEarned => "achievements_earned",
            Self::PerfectWeeks => "perfect_weeks",
            Self::DiseasesTreated => "diseases_treated",
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key that makes a ledger mutation safe to repeat.
///
/// Built from the reacting channel, the event delivery id and the step, so a
/// redelivered event produces the same keys as its first delivery.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Key for one step of one event's reaction.
    #[must_use]
    pub fn for_step(channel: &str, event: &EventId, step: &str) -> Self {
        Self(format!("{channel}/{event}/{step}"))
    }

    /// Borrow the key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn static_and_owned_ids_compare_equal() {
        assert_eq!(AchievementId::new("first_bloom"), AchievementId::FIRST_BLOOM);
    }

    #[test]
    fn achievement_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&AchievementId::TEN_PLANTS).unwrap();
        assert_eq!(json, "\"ten_plants\"");

        let back: AchievementId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AchievementId::TEN_PLANTS);
    }

    #[test]
    fn counter_names_match_serde_names() {
        for counter in [
            Counter::PlantsAdded,
            Counter::TasksCompleted,
            Counter::AchievementsEarned,
            Counter::PerfectWeeks,
            Counter::DiseasesTreated,
        ] {
            let json = serde_json::to_string(&counter).unwrap();
            assert_eq!(json, format!("\"{}\"", counter.as_str()));
        }
    }

    #[test]
    fn idempotency_key_is_stable_per_step() {
        let event = EventId::new("user_plants:p-1:4");
        let a = IdempotencyKey::for_step("plant_additions", &event, "xp");
        let b = IdempotencyKey::for_step("plant_additions", &event, "xp");
        let c = IdempotencyKey::for_step("plant_additions", &event, "counter");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str(), "plant_additions/user_plants:p-1:4/xp");
    }
}
