//! Dead letter queue for reward requests that failed after retries.
//!
//! A reaction never surfaces a failed reward call to the event stream. The
//! request is parked here instead so an operator (or a later replay) can
//! inspect it. The queue is bounded; when full, the oldest entry is evicted.

use crate::metrics::RewardMetrics;
use chrono::{DateTime, Utc};
use greenleaf_core::NaiveDate;
use greenleaf_core::event::EventId;
use greenleaf_core::ledger::{AchievementAward, CounterIncrement, ExperienceGrant};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// The ledger request that could not be applied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RewardRequest {
    /// `add_experience`
    Experience(ExperienceGrant),
    /// `increment_counter`
    Counter(CounterIncrement),
    /// `award_achievement`
    Achievement(AchievementAward),
    /// `record_activity`
    Activity {
        /// Local calendar day of the activity
        day: NaiveDate,
    },
}

impl RewardRequest {
    /// Ledger operation name, as used in logs and metrics.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Experience(_) => "add_experience",
            Self::Counter(_) => "increment_counter",
            Self::Achievement(_) => "award_achievement",
            Self::Activity { .. } => "record_activity",
        }
    }
}

/// A reward request together with the event that caused it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedReward {
    /// Channel of the reaction that issued the request
    pub channel: String,
    /// Event being reacted to
    pub event_id: EventId,
    /// The request itself
    pub request: RewardRequest,
}

impl fmt::Display for FailedReward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} for {} on {}",
            self.request.operation(),
            self.event_id,
            self.channel
        )
    }
}

/// Entry in the dead letter queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter<T> {
    /// The failed payload
    pub payload: T,
    /// Error from the last attempt
    pub error_message: String,
    /// Attempts made before giving up
    pub attempts: u32,
    /// When the entry was queued
    pub failed_at: DateTime<Utc>,
}

/// Bounded, shareable queue of failed operations.
///
/// Clones share the same storage.
///
/// # Example
///
/// ```
/// use greenleaf_runtime::dead_letter::DeadLetterQueue;
///
/// let dlq = DeadLetterQueue::new(2);
/// dlq.push("a", "offline".to_string(), 4);
/// dlq.push("b", "offline".to_string(), 4);
/// dlq.push("c", "offline".to_string(), 4);
///
/// let entries = dlq.drain();
/// assert_eq!(entries.len(), 2);
/// assert_eq!(entries[0].payload, "b");
/// ```
#[derive(Debug)]
pub struct DeadLetterQueue<T> {
    queue: Arc<Mutex<VecDeque<DeadLetter<T>>>>,
    max_size: usize,
}

impl<T> DeadLetterQueue<T> {
    /// Create a queue holding at most `max_size` entries.
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            max_size,
        }
    }

    /// Queue a failed operation, evicting the oldest entry when full.
    pub fn push(&self, payload: T, error_message: String, attempts: u32) {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);

        if self.max_size == 0 {
            tracing::warn!(error = %error_message, "Dead letter queue disabled, dropping entry");
            return;
        }

        if queue.len() >= self.max_size {
            queue.pop_front();
            tracing::warn!(
                max_size = self.max_size,
                "Dead letter queue at capacity, dropping oldest entry"
            );
        }

        queue.push_back(DeadLetter {
            payload,
            error_message,
            attempts,
            failed_at: Utc::now(),
        });

        RewardMetrics::record_dead_letter(queue.len());
        tracing::warn!(attempts, queue_size = queue.len(), "Request added to dead letter queue");
    }

    /// Current number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the queue holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return all entries, oldest first.
    pub fn drain(&self) -> Vec<DeadLetter<T>> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let entries: Vec<_> = queue.drain(..).collect();

        RewardMetrics::record_dead_letter_queue_size(0);
        tracing::info!(count = entries.len(), "Drained dead letter queue");

        entries
    }

    /// Oldest entry, without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<DeadLetter<T>>
    where
        T: Clone,
    {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .front()
            .cloned()
    }

    /// Capacity.
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max_size
    }
}

impl<T> Clone for DeadLetterQueue<T> {
    fn clone(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            max_size: self.max_size,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use greenleaf_core::reward::AchievementId;

    fn failed(step: &str) -> FailedReward {
        FailedReward {
            channel: "plant_additions".into(),
            event_id: EventId::new(step),
            request: RewardRequest::Achievement(AchievementAward::new(AchievementId::FIRST_PLANT)),
        }
    }

    #[test]
    fn evicts_oldest_when_full() {
        let dlq = DeadLetterQueue::new(2);
        dlq.push(failed("e1"), "offline".into(), 4);
        dlq.push(failed("e2"), "offline".into(), 4);
        dlq.push(failed("e3"), "offline".into(), 4);

        assert_eq!(dlq.len(), 2);
        assert_eq!(dlq.peek().unwrap().payload.event_id, EventId::new("e2"));
    }

    #[test]
    fn clones_share_storage() {
        let dlq = DeadLetterQueue::new(8);
        let other = dlq.clone();
        other.push(failed("e1"), "offline".into(), 1);

        assert_eq!(dlq.len(), 1);
        assert_eq!(dlq.drain().len(), 1);
        assert!(other.is_empty());
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let dlq = DeadLetterQueue::new(0);
        dlq.push(failed("e1"), "offline".into(), 1);
        assert!(dlq.is_empty());
    }

    #[test]
    fn failed_reward_describes_itself() {
        assert_eq!(
            failed("e1").to_string(),
            "award_achievement for e1 on plant_additions"
        );
    }

    #[test]
    fn request_serializes_with_kind_tag() {
        let json = serde_json::to_value(RewardRequest::Activity {
            day: NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
        })
        .unwrap();
        assert_eq!(json["kind"], "activity");
        assert_eq!(json["day"], "2024-03-09");
    }
}
