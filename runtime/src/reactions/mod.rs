//! Reactions of the care planner.
//!
//! | Reaction | Channel | Trigger | XP |
//! |---|---|---|---|
//! | [`MilestoneReaction`] | `milestone_additions` | insert on `growth_milestones` | 20 |
//! | [`PlantAdditionReaction`] | `plant_additions` | insert on `user_plants` | 30 |
//! | [`TaskCompletionReaction`] | `task_completions` | `care_tasks` update to `completed` | 25 |

mod milestone;
mod plant;
mod task;

pub use milestone::{
    GROWTH_TRACKER_MILESTONES, MILESTONE_REASON, MILESTONE_XP, MilestoneReaction, is_bloom,
};
pub use plant::{PLANT_REASON, PLANT_XP, PlantAdditionReaction, collection_award};
pub use task::{
    TASK_REASON, TASK_XP, TaskCompletionReaction, streak_award, task_count_award, time_of_day_award,
};

use greenleaf_core::event::RowEvent;
use serde::de::DeserializeOwned;

/// Decode the event's new record, logging why it cannot be used.
fn decode_row<T: DeserializeOwned>(channel: &'static str, event: &RowEvent) -> Result<T, String> {
    event.decode_record().map_err(|e| {
        tracing::warn!(
            channel,
            event_id = %event.id,
            error = %e,
            "Ignoring event with undecodable payload"
        );
        e.to_string()
    })
}
