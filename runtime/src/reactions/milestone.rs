use super::decode_row;
use crate::context::{RewardContext, RewardOrigin};
use crate::reaction::{Reaction, ReactionReport, request_awards};
use greenleaf_core::event::{ChangeKind, RowEvent};
use greenleaf_core::event_source::SubscriptionSpec;
use greenleaf_core::filter::RowFilter;
use greenleaf_core::ledger::{AchievementAward, ExperienceGrant};
use greenleaf_core::reward::AchievementId;
use greenleaf_core::rows::{GROWTH_MILESTONES, MilestoneRow};

const CHANNEL: &str = "milestone_additions";

/// Experience granted per recorded milestone.
pub const MILESTONE_XP: u32 = 20;

/// Reason attached to the milestone grant.
pub const MILESTONE_REASON: &str = "Growth milestone recorded";

/// Milestones on one plant that unlock `growth_tracker`.
pub const GROWTH_TRACKER_MILESTONES: u64 = 10;

/// Rewards a newly recorded growth milestone.
///
/// - 20 XP for every milestone
/// - `first_bloom` when the milestone is about flowering
/// - `growth_tracker` when the plant reaches exactly ten milestones (only
///   checked while a user is signed in)
#[derive(Debug, Clone, Copy, Default)]
pub struct MilestoneReaction;

/// Whether a milestone marks a bloom.
///
/// True for the `flowering` type, or a title mentioning "bloom" or "flower"
/// in any case.
#[must_use]
pub fn is_bloom(milestone: &MilestoneRow) -> bool {
    let title = milestone.title.as_deref().unwrap_or_default().to_lowercase();
    milestone.milestone_type.as_deref() == Some("flowering")
        || title.contains("bloom")
        || title.contains("flower")
}

impl Reaction for MilestoneReaction {
    fn channel(&self) -> &'static str {
        CHANNEL
    }

    fn subscription(&self) -> SubscriptionSpec {
        SubscriptionSpec::new(CHANNEL, GROWTH_MILESTONES, ChangeKind::Insert)
    }

    async fn react(&self, event: RowEvent, ctx: RewardContext) -> ReactionReport {
        let origin = RewardOrigin::new(CHANNEL, &event);
        let mut report = ReactionReport::new(&origin);
        let milestone: MilestoneRow = match decode_row(CHANNEL, &event) {
            Ok(row) => row,
            Err(reason) => return report.skip(reason),
        };

        let grant =
            ExperienceGrant::new(MILESTONE_XP, MILESTONE_REASON).with_key(origin.key("experience"));
        let result = ctx.grant_experience(&origin, grant).await;
        report.track_experience(MILESTONE_XP, result);

        if is_bloom(&milestone) {
            let award = AchievementAward::scoped(AchievementId::FIRST_BLOOM, &milestone.plant_id);
            request_awards(&ctx, &origin, &mut report, [award]).await;
        }

        if ctx.current_user().await.is_none() {
            tracing::debug!(
                channel = CHANNEL,
                event_id = %origin.event_id(),
                "No signed-in user, skipping milestone count"
            );
            return report;
        }

        let filter = RowFilter::eq("plant_id", &milestone.plant_id);
        let count = ctx.count_rows(GROWTH_MILESTONES, &filter).await;
        if report.track(count) == Some(GROWTH_TRACKER_MILESTONES) {
            let award =
                AchievementAward::scoped(AchievementId::GROWTH_TRACKER, &milestone.plant_id);
            request_awards(&ctx, &origin, &mut report, [award]).await;
        }

        report
    }
}
