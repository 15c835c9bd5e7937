//! The per-event contract run by an [`EventReactionHandler`](crate::EventReactionHandler).

use crate::context::{RewardContext, RewardOrigin};
use crate::error::RewardError;
use greenleaf_core::event::{EventId, RowEvent};
use greenleaf_core::event_source::SubscriptionSpec;
use greenleaf_core::ledger::{AchievementAward, AwardOutcome, ExperienceOutcome};
use greenleaf_core::reward::AchievementId;
use smallvec::SmallVec;
use std::future::Future;

/// What to do when a subscribed row event arrives.
///
/// A reaction grants a fixed amount of experience, optionally bumps a
/// counter, and requests achievements whose conditions hold. Steps are
/// independent: a failed step is recorded in the [`ReactionReport`] and the
/// remaining steps still run. Nothing a reaction does can fail the
/// subscription.
pub trait Reaction: Send + Sync + 'static {
    /// Channel name, used for logging, metrics and idempotency keys.
    fn channel(&self) -> &'static str;

    /// The subscription this reaction listens on.
    fn subscription(&self) -> SubscriptionSpec;

    /// React to one event.
    fn react(
        &self,
        event: RowEvent,
        ctx: RewardContext,
    ) -> impl Future<Output = ReactionReport> + Send;
}

/// Summary of one reaction run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactionReport {
    /// Channel of the reaction
    pub channel: &'static str,
    /// Event reacted to
    pub event_id: EventId,
    /// Experience granted by the reaction itself (excluding achievement bonuses)
    pub experience_granted: u32,
    /// Achievements requested, in request order
    pub achievements_requested: SmallVec<[AchievementId; 4]>,
    /// Achievements the ledger newly unlocked
    pub achievements_unlocked: SmallVec<[AchievementId; 4]>,
    /// Failed steps
    pub failures: Vec<RewardError>,
    /// Why the event produced no rewards at all, if it didn't
    pub skipped: Option<String>,
}

impl ReactionReport {
    /// Empty report for the event behind `origin`.
    #[must_use]
    pub fn new(origin: &RewardOrigin) -> Self {
        Self {
            channel: origin.channel(),
            event_id: origin.event_id().clone(),
            experience_granted: 0,
            achievements_requested: SmallVec::new(),
            achievements_unlocked: SmallVec::new(),
            failures: Vec::new(),
            skipped: None,
        }
    }

    /// Mark the event as ignored.
    #[must_use]
    pub fn skip(mut self, reason: impl Into<String>) -> Self {
        self.skipped = Some(reason.into());
        self
    }

    /// Whether every step succeeded and the event was not skipped.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.skipped.is_none()
    }

    /// Whether `achievement` was requested.
    #[must_use]
    pub fn requested(&self, achievement: &AchievementId) -> bool {
        self.achievements_requested.contains(achievement)
    }

    /// Record the result of an experience grant of `amount`.
    pub fn track_experience(
        &mut self,
        amount: u32,
        result: Result<ExperienceOutcome, RewardError>,
    ) {
        match result {
            Ok(outcome) if outcome.applied => self.experience_granted += amount,
            Ok(_) => {}
            Err(e) => self.failures.push(e),
        }
    }

    /// Record the result of an achievement request.
    pub fn track_award(
        &mut self,
        award: &AchievementAward,
        result: Result<AwardOutcome, RewardError>,
    ) {
        self.achievements_requested.push(award.achievement.clone());
        match result {
            Ok(AwardOutcome::Awarded { .. }) => {
                self.achievements_unlocked.push(award.achievement.clone());
            }
            Ok(AwardOutcome::AlreadyEarned | AwardOutcome::Unknown) => {}
            Err(e) => self.failures.push(e),
        }
    }

    /// Record the result of any other step, passing the value through.
    pub fn track<T>(&mut self, result: Result<T, RewardError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.failures.push(e);
                None
            }
        }
    }
}

/// Request every award in `awards` in order, recording each result.
pub(crate) async fn request_awards<I>(
    ctx: &RewardContext,
    origin: &RewardOrigin,
    report: &mut ReactionReport,
    awards: I,
) where
    I: IntoIterator<Item = AchievementAward>,
{
    for award in awards {
        let result = ctx.award_achievement(origin, award.clone()).await;
        report.track_award(&award, result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use greenleaf_core::event::ChangeKind;
    use greenleaf_core::ledger::LedgerError;

    fn origin() -> RewardOrigin {
        let event = RowEvent::new(
            EventId::new("user_plants:p-1:1"),
            "user_plants",
            ChangeKind::Insert,
            Utc::now(),
            serde_json::json!({ "id": "p-1" }),
        );
        RewardOrigin::new("plant_additions", &event)
    }

    fn ledger_failure() -> RewardError {
        RewardError::Ledger {
            operation: "add_experience",
            attempts: 4,
            source: LedgerError::Unavailable("offline".into()),
        }
    }

    #[test]
    fn new_report_is_clean() {
        let report = ReactionReport::new(&origin());
        assert!(report.is_clean());
        assert_eq!(report.channel, "plant_additions");
        assert_eq!(report.event_id, EventId::new("user_plants:p-1:1"));
    }

    #[test]
    fn experience_counts_only_when_applied() {
        let mut report = ReactionReport::new(&origin());
        let applied = ExperienceOutcome {
            total_xp: 30,
            level: 1,
            leveled_up: false,
            applied: true,
        };
        report.track_experience(30, Ok(applied));
        report.track_experience(30, Ok(ExperienceOutcome { applied: false, ..applied }));
        assert_eq!(report.experience_granted, 30);
    }

    #[test]
    fn failures_are_collected_not_raised() {
        let mut report = ReactionReport::new(&origin());
        report.track_experience(30, Err(ledger_failure()));
        let award = AchievementAward::new(AchievementId::FIVE_PLANTS);
        report.track_award(&award, Err(ledger_failure()));

        assert!(!report.is_clean());
        assert_eq!(report.failures.len(), 2);
        assert!(report.requested(&AchievementId::FIVE_PLANTS));
        assert!(report.achievements_unlocked.is_empty());
    }

    #[test]
    fn skipped_report_is_not_clean() {
        let report = ReactionReport::new(&origin()).skip("bad payload");
        assert!(!report.is_clean());
    }
}
