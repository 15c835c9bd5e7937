use super::decode_row;
use crate::context::{RewardContext, RewardOrigin};
use crate::reaction::{Reaction, ReactionReport, request_awards};
use greenleaf_core::event::{ChangeKind, RowEvent};
use greenleaf_core::event_source::SubscriptionSpec;
use greenleaf_core::ledger::{AchievementAward, CounterIncrement, CounterUpdate, ExperienceGrant};
use greenleaf_core::reward::{AchievementId, Counter};
use greenleaf_core::rows::{PlantRow, USER_PLANTS};

const CHANNEL: &str = "plant_additions";

/// Experience granted per added plant.
pub const PLANT_XP: u32 = 30;

/// Reason attached to the plant grant.
pub const PLANT_REASON: &str = "Plant added to collection";

/// Rewards a plant joining the user's collection.
///
/// Grants 30 XP, bumps `plants_added`, and decides collection achievements
/// on the count the ledger returns from that increment.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlantAdditionReaction;

/// Collection achievement earned by an increment of `plants_added`, if any.
///
/// The first plant unlocks `first_plant` for that plant; the fifth and tenth
/// unlock `five_plants` and `ten_plants`.
#[must_use]
pub fn collection_award(update: &CounterUpdate, plant_id: &str) -> Option<AchievementAward> {
    if update.reached(1) {
        Some(AchievementAward::scoped(AchievementId::FIRST_PLANT, plant_id))
    } else if update.reached(5) {
        Some(AchievementAward::new(AchievementId::FIVE_PLANTS))
    } else if update.reached(10) {
        Some(AchievementAward::new(AchievementId::TEN_PLANTS))
    } else {
        None
    }
}

impl Reaction for PlantAdditionReaction {
    fn channel(&self) -> &'static str {
        CHANNEL
    }

    fn subscription(&self) -> SubscriptionSpec {
        SubscriptionSpec::new(CHANNEL, USER_PLANTS, ChangeKind::Insert)
    }

    async fn react(&self, event: RowEvent, ctx: RewardContext) -> ReactionReport {
        let origin = RewardOrigin::new(CHANNEL, &event);
        let mut report = ReactionReport::new(&origin);
        let plant: PlantRow = match decode_row(CHANNEL, &event) {
            Ok(row) => row,
            Err(reason) => return report.skip(reason),
        };

        let grant = ExperienceGrant::new(PLANT_XP, PLANT_REASON).with_key(origin.key("experience"));
        let result = ctx.grant_experience(&origin, grant).await;
        report.track_experience(PLANT_XP, result);

        let increment =
            CounterIncrement::new(Counter::PlantsAdded, 1).with_key(origin.key("plants_added"));
        let Some(update) = report.track(ctx.increment_counter(&origin, increment).await) else {
            return report;
        };

        tracing::debug!(
            channel = CHANNEL,
            event_id = %origin.event_id(),
            plants_added = update.current,
            "Plant counted"
        );

        if let Some(award) = collection_award(&update, &plant.id) {
            request_awards(&ctx, &origin, &mut report, [award]).await;
        }

        report
    }
}
