//! The collaborators a reaction works with.
//!
//! [`RewardContext`] bundles the reward ledger, the read-side row counter,
//! the current-user lookup and the clock. It is handed to every reaction
//! explicitly. Each ledger call goes through the same path:
//!
//! 1. Retried with backoff while the error is transient
//! 2. On final failure, queued as a [`FailedReward`] dead letter
//! 3. Counted in metrics and logged
//! 4. Returned to the reaction as a [`RewardError`], which the reaction
//!    records and moves past

use crate::config::HandlerConfig;
use crate::dead_letter::{DeadLetterQueue, FailedReward, RewardRequest};
use crate::error::RewardError;
use crate::metrics::RewardMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use greenleaf_core::environment::Clock;
use greenleaf_core::event::{EventId, RowEvent};
use greenleaf_core::filter::RowFilter;
use greenleaf_core::ledger::{
    AchievementAward, AwardOutcome, CounterIncrement, CounterUpdate, ExperienceGrant,
    ExperienceOutcome, LedgerError, RewardLedger, StreakUpdate,
};
use greenleaf_core::query::{CurrentUser, QueryError, RowCounter, UserId};
use greenleaf_core::reward::IdempotencyKey;
use std::future::Future;
use std::sync::Arc;

/// Where a reward request comes from: a reaction channel and an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RewardOrigin {
    channel: &'static str,
    event_id: EventId,
}

impl RewardOrigin {
    /// Origin for `event` handled on `channel`.
    #[must_use]
    pub fn new(channel: &'static str, event: &RowEvent) -> Self {
        Self {
            channel,
            event_id: event.id.clone(),
        }
    }

    /// Channel name.
    #[must_use]
    pub const fn channel(&self) -> &'static str {
        self.channel
    }

    /// Triggering event.
    #[must_use]
    pub const fn event_id(&self) -> &EventId {
        &self.event_id
    }

    /// Idempotency key for one step of the reaction to this event.
    ///
    /// Redelivery of the same event produces the same keys.
    #[must_use]
    pub fn key(&self, step: &str) -> IdempotencyKey {
        IdempotencyKey::for_step(self.channel, &self.event_id, step)
    }
}

/// Injected dependencies for reactions.
///
/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct RewardContext {
    ledger: Arc<dyn RewardLedger>,
    rows: Arc<dyn RowCounter>,
    identity: Arc<dyn CurrentUser>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    dead_letters: DeadLetterQueue<FailedReward>,
    local_offset: FixedOffset,
}

impl RewardContext {
    /// Context with default retry policy, a 1000-entry dead letter queue and
    /// UTC as local time.
    #[must_use]
    pub fn new(
        ledger: Arc<dyn RewardLedger>,
        rows: Arc<dyn RowCounter>,
        identity: Arc<dyn CurrentUser>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let defaults = HandlerConfig::default();
        Self {
            ledger,
            rows,
            identity,
            clock,
            retry: defaults.retry,
            dead_letters: DeadLetterQueue::new(defaults.dead_letter_capacity),
            local_offset: Utc.fix(),
        }
    }

    /// Apply retry policy, dead letter capacity and local offset from
    /// `config`. Replaces the dead letter queue.
    #[must_use]
    pub fn with_config(mut self, config: &HandlerConfig) -> Self {
        self.retry = config.retry.clone();
        self.dead_letters = DeadLetterQueue::new(config.dead_letter_capacity);
        self.local_offset = config.local_offset();
        self
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Share an existing dead letter queue.
    #[must_use]
    pub fn with_dead_letters(mut self, dead_letters: DeadLetterQueue<FailedReward>) -> Self {
        self.dead_letters = dead_letters;
        self
    }

    /// Set the offset used for local dates and times of day.
    #[must_use]
    pub const fn with_local_offset(mut self, offset: FixedOffset) -> Self {
        self.local_offset = offset;
        self
    }

    /// Dead letters recorded so far (shared handle).
    #[must_use]
    pub fn dead_letters(&self) -> &DeadLetterQueue<FailedReward> {
        &self.dead_letters
    }

    /// Retry policy in use.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Local offset in use.
    #[must_use]
    pub const fn local_offset(&self) -> FixedOffset {
        self.local_offset
    }

    /// Current instant, in local time.
    #[must_use]
    pub fn local_now(&self) -> DateTime<FixedOffset> {
        self.clock.now().with_timezone(&self.local_offset)
    }

    /// Convert an instant to local time.
    #[must_use]
    pub fn to_local(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        instant.with_timezone(&self.local_offset)
    }

    /// Today's local calendar date.
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        self.local_now().date_naive()
    }

    /// The signed-in user, if any.
    pub async fn current_user(&self) -> Option<UserId> {
        self.identity.current_user().await
    }

    /// Count rows in `collection` matching `filter`.
    ///
    /// Retried while the store is unavailable. Failures are not
    /// dead-lettered; a missed count only skips one award check.
    ///
    /// # Errors
    ///
    /// Returns [`RewardError::Query`] once retries are exhausted.
    pub async fn count_rows(
        &self,
        collection: &str,
        filter: &RowFilter,
    ) -> Result<u64, RewardError> {
        retry_with_predicate(
            &self.retry,
            "count_rows",
            || self.rows.count_rows(collection, filter),
            |err: &QueryError| matches!(err, QueryError::Unavailable(_)),
        )
        .await
        .map_err(|failure| {
            RewardMetrics::record_failure("count_rows");
            tracing::warn!(
                collection,
                filter = %filter,
                attempts = failure.attempts,
                error = %failure.error,
                "Row count failed"
            );
            RewardError::Query {
                collection: collection.to_string(),
                attempts: failure.attempts,
                source: failure.error,
            }
        })
    }

    /// Grant experience.
    ///
    /// # Errors
    ///
    /// Returns [`RewardError::Ledger`] after retries; the grant is
    /// dead-lettered.
    pub async fn grant_experience(
        &self,
        origin: &RewardOrigin,
        grant: ExperienceGrant,
    ) -> Result<ExperienceOutcome, RewardError> {
        let request = RewardRequest::Experience(grant.clone());
        self.call(origin, request, || self.ledger.add_experience(grant.clone()))
            .await
    }

    /// Atomically bump a counter.
    ///
    /// # Errors
    ///
    /// Returns [`RewardError::Ledger`] after retries; the increment is
    /// dead-lettered.
    pub async fn increment_counter(
        &self,
        origin: &RewardOrigin,
        increment: CounterIncrement,
    ) -> Result<CounterUpdate, RewardError> {
        let request = RewardRequest::Counter(increment.clone());
        self.call(origin, request, || self.ledger.increment_counter(increment.clone()))
            .await
    }

    /// Request an achievement.
    ///
    /// # Errors
    ///
    /// Returns [`RewardError::Ledger`] after retries; the award is
    /// dead-lettered.
    pub async fn award_achievement(
        &self,
        origin: &RewardOrigin,
        award: AchievementAward,
    ) -> Result<AwardOutcome, RewardError> {
        RewardMetrics::record_achievement_requested(award.achievement.as_str());
        let request = RewardRequest::Achievement(award.clone());
        let outcome = self
            .call(origin, request, || self.ledger.award_achievement(award.clone()))
            .await?;

        match outcome {
            AwardOutcome::Unknown => tracing::warn!(
                channel = origin.channel,
                event_id = %origin.event_id,
                "Ledger does not know the requested achievement"
            ),
            AwardOutcome::AlreadyEarned => tracing::debug!(
                channel = origin.channel,
                event_id = %origin.event_id,
                "Achievement already earned"
            ),
            AwardOutcome::Awarded { xp_reward } => tracing::info!(
                channel = origin.channel,
                event_id = %origin.event_id,
                xp_reward,
                "Achievement unlocked"
            ),
        }

        Ok(outcome)
    }

    /// Record activity on `day` for streak tracking.
    ///
    /// # Errors
    ///
    /// Returns [`RewardError::Ledger`] after retries; the activity is
    /// dead-lettered.
    pub async fn record_activity(
        &self,
        origin: &RewardOrigin,
        day: NaiveDate,
    ) -> Result<StreakUpdate, RewardError> {
        self.call(origin, RewardRequest::Activity { day }, || {
            self.ledger.record_activity(day)
        })
        .await
    }

    async fn call<T, F, Fut>(
        &self,
        origin: &RewardOrigin,
        request: RewardRequest,
        operation: F,
    ) -> Result<T, RewardError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let name = request.operation();
        match retry_with_predicate(&self.retry, name, operation, LedgerError::is_transient).await {
            Ok(value) => Ok(value),
            Err(failure) => {
                RewardMetrics::record_failure(name);
                tracing::warn!(
                    channel = origin.channel,
                    event_id = %origin.event_id,
                    operation = name,
                    attempts = failure.attempts,
                    error = %failure.error,
                    "Reward call failed"
                );
                self.dead_letters.push(
                    FailedReward {
                        channel: origin.channel.to_string(),
                        event_id: origin.event_id.clone(),
                        request,
                    },
                    failure.error.to_string(),
                    failure.attempts,
                );
                Err(RewardError::Ledger {
                    operation: name,
                    attempts: failure.attempts,
                    source: failure.error,
                })
            }
        }
    }
}

impl std::fmt::Debug for RewardContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewardContext")
            .field("retry", &self.retry)
            .field("dead_letters", &self.dead_letters.len())
            .field("local_offset", &self.local_offset)
            .finish_non_exhaustive()
    }
}
