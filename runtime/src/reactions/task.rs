use super::decode_row;
use crate::context::{RewardContext, RewardOrigin};
use crate::reaction::{Reaction, ReactionReport, request_awards};
use chrono::Timelike;
use greenleaf_core::event::{ChangeKind, RowEvent};
use greenleaf_core::event_source::SubscriptionSpec;
use greenleaf_core::filter::RowFilter;
use greenleaf_core::ledger::{
    AchievementAward, CounterIncrement, CounterUpdate, ExperienceGrant, StreakUpdate,
};
use greenleaf_core::reward::{AchievementId, Counter};
use greenleaf_core::rows::{CARE_TASKS, CareTaskRow};

const CHANNEL: &str = "task_completions";

/// Experience granted per completed care task.
pub const TASK_XP: u32 = 25;

/// Reason attached to the task grant.
pub const TASK_REASON: &str = "Task completed";

const TASK_MILESTONES: [(u64, AchievementId); 3] = [
    (1, AchievementId::FIRST_TASK),
    (10, AchievementId::TEN_TASKS),
    (50, AchievementId::FIFTY_TASKS),
];

const STREAK_MILESTONES: [(u32, AchievementId); 2] = [
    (7, AchievementId::SEVEN_DAY_STREAK),
    (30, AchievementId::THIRTY_DAY_STREAK),
];

/// Rewards a care task moving to `completed`.
///
/// Grants 25 XP, records the day for the activity streak and bumps
/// `tasks_completed`. Achievements come from the returned task count, the
/// returned streak, and the local hour the task was completed at.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskCompletionReaction;

/// Task-count achievement earned by an increment of `tasks_completed`.
#[must_use]
pub fn task_count_award(update: &CounterUpdate) -> Option<AchievementId> {
    TASK_MILESTONES
        .iter()
        .find(|(threshold, _)| update.reached(*threshold))
        .map(|(_, achievement)| achievement.clone())
}

/// Streak achievement earned by a streak update.
#[must_use]
pub fn streak_award(streak: &StreakUpdate) -> Option<AchievementId> {
    STREAK_MILESTONES
        .iter()
        .find(|(days, _)| streak.reached(*days))
        .map(|(_, achievement)| achievement.clone())
}

/// Achievement for completing a task at local hour `hour` (0-23).
#[must_use]
pub fn time_of_day_award(hour: u32) -> Option<AchievementId> {
    match hour {
        0..8 => Some(AchievementId::EARLY_BIRD),
        22.. => Some(AchievementId::NIGHT_OWL),
        _ => None,
    }
}

fn was_already_completed(event: &RowEvent) -> bool {
    event
        .old_record
        .as_ref()
        .and_then(|old| old.get("status"))
        .and_then(serde_json::Value::as_str)
        == Some("completed")
}

impl Reaction for TaskCompletionReaction {
    fn channel(&self) -> &'static str {
        CHANNEL
    }

    fn subscription(&self) -> SubscriptionSpec {
        SubscriptionSpec::new(CHANNEL, CARE_TASKS, ChangeKind::Update)
            .with_filter(RowFilter::eq("status", "completed"))
    }

    async fn react(&self, event: RowEvent, ctx: RewardContext) -> ReactionReport {
        let origin = RewardOrigin::new(CHANNEL, &event);
        let mut report = ReactionReport::new(&origin);
        let task: CareTaskRow = match decode_row(CHANNEL, &event) {
            Ok(row) => row,
            Err(reason) => return report.skip(reason),
        };

        if !task.is_completed() {
            return report.skip("task is not completed");
        }
        if was_already_completed(&event) {
            tracing::debug!(
                channel = CHANNEL,
                event_id = %origin.event_id(),
                "Task was already completed, ignoring edit"
            );
            return report.skip("task was already completed");
        }

        let grant = ExperienceGrant::new(TASK_XP, TASK_REASON).with_key(origin.key("experience"));
        let result = ctx.grant_experience(&origin, grant).await;
        report.track_experience(TASK_XP, result);

        let streak = report.track(ctx.record_activity(&origin, ctx.today()).await);

        let increment = CounterIncrement::new(Counter::TasksCompleted, 1)
            .with_key(origin.key("tasks_completed"));
        let update = report.track(ctx.increment_counter(&origin, increment).await);

        let completed_at = ctx.to_local(task.completed_at.unwrap_or(event.committed_at));

        let awards = [
            update.as_ref().and_then(task_count_award),
            streak.as_ref().and_then(streak_award),
            time_of_day_award(completed_at.hour()),
        ];
        request_awards(
            &ctx,
            &origin,
            &mut report,
            awards.into_iter().flatten().map(AchievementAward::new),
        )
        .await;

        report
    }
}
