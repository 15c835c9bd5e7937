//! Typed views of the rows that drive rewards.
//!
//! Each view declares only the columns its reaction reads. Every other
//! column is ignored when decoding, so a null or malformed column the
//! reaction never looks at cannot cost the user a reward.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Collection holding growth milestones.
pub const GROWTH_MILESTONES: &str = "growth_milestones";

/// Collection holding the user's plants.
pub const USER_PLANTS: &str = "user_plants";

/// Collection holding scheduled care tasks.
pub const CARE_TASKS: &str = "care_tasks";

/// A growth milestone recorded for a plant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MilestoneRow {
    /// Plant the milestone belongs to
    pub plant_id: String,
    /// Free-text title entered by the user
    #[serde(default)]
    pub title: Option<String>,
    /// Category (`flowering`, `new_leaf`, `repotted`, ...)
    #[serde(default)]
    pub milestone_type: Option<String>,
}

/// A plant added to a user's collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlantRow {
    /// Plant id
    pub id: String,
}

/// A care task (watering, fertilizing, ...) for a plant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CareTaskRow {
    /// `pending`, `completed`, `skipped`, ...
    #[serde(default)]
    pub status: Option<String>,
    /// When the task was marked completed
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl CareTaskRow {
    /// Whether the task is in the `completed` state.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status.as_deref() == Some("completed")
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn milestone_ignores_unread_columns() {
        let row: MilestoneRow = serde_json::from_value(serde_json::json!({
            "id": "m-1",
            "plant_id": "plant-1",
            "title": "New leaf",
            "milestone_type": "new_leaf",
            "photo_url": null,
            "measurement_value": 12.5,
        }))
        .unwrap();

        assert_eq!(row.plant_id, "plant-1");
        assert_eq!(row.milestone_type.as_deref(), Some("new_leaf"));
    }

    #[test]
    fn milestone_text_columns_may_be_null() {
        let row: MilestoneRow = serde_json::from_value(serde_json::json!({
            "plant_id": "plant-1",
            "title": null,
        }))
        .unwrap();

        assert_eq!(row.title, None);
        assert_eq!(row.milestone_type, None);
    }

    #[test]
    fn plant_needs_only_its_id() {
        let row: PlantRow = serde_json::from_value(serde_json::json!({
            "id": "p-1",
            "species": null,
            "nickname": 42,
        }))
        .unwrap();
        assert_eq!(row.id, "p-1");

        let missing_id = serde_json::json!({ "species": "Ficus" });
        assert!(serde_json::from_value::<PlantRow>(missing_id).is_err());
    }

    #[test]
    fn care_task_completion_status() {
        let mut row: CareTaskRow = serde_json::from_value(serde_json::json!({
            "id": "t-1",
            "plant_id": "plant-1",
            "title": null,
            "task_type": "watering",
        }))
        .unwrap();
        assert!(!row.is_completed());

        row.status = Some("completed".to_string());
        assert!(row.is_completed());
    }
}
