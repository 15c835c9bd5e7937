//! Achievement definitions.

use greenleaf_core::AchievementId;
use serde::{Deserialize, Serialize};

/// Static description of an unlockable achievement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementDefinition {
    /// Identifier referenced by reactions
    pub id: AchievementId,
    /// Display title
    pub title: String,
    /// One-line description
    pub description: String,
    /// Icon name understood by the front end
    pub icon: String,
    /// Grouping (`collection`, `care`, `milestone`, `streak`, `timing`)
    pub achievement_type: String,
    /// Accent color class
    pub color: String,
    /// Bonus experience granted on unlock
    pub xp_reward: u32,
    /// Count required, for count-based achievements
    pub requirement_count: Option<u32>,
}

impl AchievementDefinition {
    #[allow(clippy::too_many_arguments)]
    fn new(
        id: AchievementId,
        title: &str,
        description: &str,
        icon: &str,
        achievement_type: &str,
        color: &str,
        xp_reward: u32,
        requirement_count: Option<u32>,
    ) -> Self {
        Self {
            id,
            title: title.to_string(),
            description: description.to_string(),
            icon: icon.to_string(),
            achievement_type: achievement_type.to_string(),
            color: color.to_string(),
            xp_reward,
            requirement_count,
        }
    }
}

/// The set of achievements a ledger can award, ordered by XP reward.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementCatalog {
    definitions: Vec<AchievementDefinition>,
}

impl AchievementCatalog {
    /// Build a catalog from arbitrary definitions.
    #[must_use]
    pub fn new(mut definitions: Vec<AchievementDefinition>) -> Self {
        definitions.sort_by_key(|d| d.xp_reward);
        Self { definitions }
    }

    /// Look up a definition.
    #[must_use]
    pub fn get(&self, id: &AchievementId) -> Option<&AchievementDefinition> {
        self.definitions.iter().find(|d| &d.id == id)
    }

    /// All definitions, cheapest first.
    pub fn iter(&self) -> impl Iterator<Item = &AchievementDefinition> {
        self.definitions.iter()
    }

    /// Number of definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl Default for AchievementCatalog {
    fn default() -> Self {
        use AchievementDefinition as Def;

        Self::new(vec![
            Def::new(
                AchievementId::FIRST_TASK,
                "First Steps",
                "Completed your first care task",
                "CheckCircle",
                "care",
                "text-green-500",
                25,
                Some(1),
            ),
            Def::new(
                AchievementId::FIRST_PLANT,
                "Green Beginnings",
                "Added your first plant",
                "Sprout",
                "collection",
                "text-emerald-500",
                50,
                Some(1),
            ),
            Def::new(
                AchievementId::EARLY_BIRD,
                "Early Bird",
                "Completed a task before 8 AM",
                "Sunrise",
                "timing",
                "text-amber-500",
                50,
                None,
            ),
            Def::new(
                AchievementId::NIGHT_OWL,
                "Night Owl",
                "Completed a task after 10 PM",
                "Moon",
                "timing",
                "text-indigo-500",
                50,
                None,
            ),
            Def::new(
                AchievementId::FIRST_BLOOM,
                "First Bloom",
                "Witnessed your first flowering",
                "Flower2",
                "milestone",
                "text-yellow-500",
                100,
                None,
            ),
            Def::new(
                AchievementId::FIVE_PLANTS,
                "Growing Collection",
                "Added five plants",
                "Leaf",
                "collection",
                "text-lime-500",
                100,
                Some(5),
            ),
            Def::new(
                AchievementId::SEVEN_DAY_STREAK,
                "Week Warrior",
                "Cared for your plants 7 days in a row",
                "Flame",
                "streak",
                "text-orange-500",
                150,
                Some(7),
            ),
            Def::new(
                AchievementId::TEN_TASKS,
                "Dedicated Gardener",
                "Completed ten care tasks",
                "ListChecks",
                "care",
                "text-teal-500",
                150,
                Some(10),
            ),
            Def::new(
                AchievementId::GROWTH_TRACKER,
                "Growth Tracker",
                "Recorded ten milestones for one plant",
                "TrendingUp",
                "milestone",
                "text-sky-500",
                200,
                Some(10),
            ),
            Def::new(
                AchievementId::TEN_PLANTS,
                "Green Thumb",
                "Added ten plants",
                "Award",
                "collection",
                "text-blue-500",
                250,
                Some(10),
            ),
            Def::new(
                AchievementId::FIFTY_TASKS,
                "Care Master",
                "Completed fifty care tasks",
                "Star",
                "care",
                "text-purple-500",
                300,
                Some(50),
            ),
            Def::new(
                AchievementId::THIRTY_DAY_STREAK,
                "30-Day Streak",
                "Consistent care for 30 days",
                "Zap",
                "streak",
                "text-red-500",
                500,
                Some(30),
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_covers_every_reaction_achievement() {
        let catalog = AchievementCatalog::default();
        for id in [
            AchievementId::FIRST_BLOOM,
            AchievementId::GROWTH_TRACKER,
            AchievementId::FIRST_PLANT,
            AchievementId::FIVE_PLANTS,
            AchievementId::TEN_PLANTS,
            AchievementId::FIRST_TASK,
            AchievementId::TEN_TASKS,
            AchievementId::FIFTY_TASKS,
            AchievementId::EARLY_BIRD,
            AchievementId::NIGHT_OWL,
            AchievementId::SEVEN_DAY_STREAK,
            AchievementId::THIRTY_DAY_STREAK,
        ] {
            assert!(catalog.get(&id).is_some(), "missing definition for {id}");
        }
        assert_eq!(catalog.len(), 12);
    }

    #[test]
    fn catalog_is_sorted_by_reward() {
        let rewards: Vec<u32> = AchievementCatalog::default().iter().map(|d| d.xp_reward).collect();
        let mut sorted = rewards.clone();
        sorted.sort_unstable();
        assert_eq!(rewards, sorted);
    }

    #[test]
    fn unknown_ids_are_absent() {
        assert!(AchievementCatalog::default().get(&AchievementId::new("pest_defender")).is_none());
    }
}
