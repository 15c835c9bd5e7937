//! Row payload builders.
//!
//! Each builder returns the JSON record a backend would deliver for a
//! freshly written row, with fixed timestamps.

use serde_json::{Value, json};

/// A growth milestone on `plant_id`.
#[must_use]
pub fn milestone(id: &str, plant_id: &str, title: &str, milestone_type: &str) -> Value {
    json!({
        "id": id,
        "plant_id": plant_id,
        "title": title,
        "milestone_type": milestone_type,
        "description": null,
        "created_at": "2025-01-01T12:00:00Z",
    })
}

/// A plant owned by `user-1`.
#[must_use]
pub fn plant(id: &str) -> Value {
    json!({
        "id": id,
        "user_id": "user-1",
        "nickname": format!("Plant {id}"),
        "species": "Monstera deliciosa",
        "created_at": "2025-01-01T12:00:00Z",
    })
}

/// A pending watering task for `plant_id`.
#[must_use]
pub fn pending_task(id: &str, plant_id: &str) -> Value {
    json!({
        "id": id,
        "plant_id": plant_id,
        "title": "Water",
        "task_type": "watering",
        "status": "pending",
        "completed_at": null,
    })
}

/// The same task marked completed at `completed_at` (RFC 3339).
#[must_use]
pub fn completed_task(id: &str, plant_id: &str, completed_at: &str) -> Value {
    json!({
        "id": id,
        "plant_id": plant_id,
        "title": "Water",
        "task_type": "watering",
        "status": "completed",
        "completed_at": completed_at,
    })
}
