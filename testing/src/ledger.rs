//! A reward ledger that records what it is asked to do.
//!
//! [`RecordingLedger`] keeps just enough state to answer like a real ledger
//! (counters, earned achievements, a streak) and adds knobs for tests:
//! scripted failures and a gate that stalls every call until opened.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use chrono::NaiveDate;
use greenleaf_core::ledger::{
    AchievementAward, AwardOutcome, CounterIncrement, CounterUpdate, ExperienceGrant,
    ExperienceOutcome, LedgerError, LedgerFuture, RewardLedger, StreakUpdate,
};
use greenleaf_core::reward::{AchievementId, Counter};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

/// One call made against the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerCall {
    /// `add_experience`
    Experience(ExperienceGrant),
    /// `increment_counter`
    Increment(CounterIncrement),
    /// `award_achievement`
    Award(AchievementAward),
    /// `record_activity`
    Activity(NaiveDate),
}

#[derive(Default)]
struct Books {
    attempted: Vec<LedgerCall>,
    applied: Vec<LedgerCall>,
    total_xp: u64,
    counters: HashMap<Counter, u64>,
    earned: HashSet<AchievementId>,
    streak: u32,
    last_active: Option<NaiveDate>,
    scripted_failures: VecDeque<LedgerError>,
    failure: Option<LedgerError>,
}

/// Recording ledger for tests.
///
/// Clones share state. Every call is recorded in [`calls`](Self::calls)
/// before it is gated or failed; successful calls also appear in
/// [`applied`](Self::applied).
#[derive(Clone)]
pub struct RecordingLedger {
    books: Arc<Mutex<Books>>,
    gate: Arc<watch::Sender<bool>>,
    call_count: Arc<watch::Sender<usize>>,
}

impl RecordingLedger {
    /// Open, empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self {
            books: Arc::new(Mutex::new(Books::default())),
            gate: Arc::new(watch::Sender::new(true)),
            call_count: Arc::new(watch::Sender::new(0)),
        }
    }

    /// Start `counter` at `value`.
    #[must_use]
    pub fn with_counter(self, counter: Counter, value: u64) -> Self {
        self.books.lock().unwrap().counters.insert(counter, value);
        self
    }

    /// Start with a streak of `days` ending on `last_active`.
    #[must_use]
    pub fn with_streak(self, days: u32, last_active: NaiveDate) -> Self {
        {
            let mut books = self.books.lock().unwrap();
            books.streak = days;
            books.last_active = Some(last_active);
        }
        self
    }

    /// Treat `achievement` as already earned.
    #[must_use]
    pub fn with_earned(self, achievement: AchievementId) -> Self {
        self.books.lock().unwrap().earned.insert(achievement);
        self
    }

    /// Fail every call with `error` until [`recover`](Self::recover).
    pub fn fail_all(&self, error: LedgerError) {
        self.books.lock().unwrap().failure = Some(error);
    }

    /// Fail the next calls with `errors`, one per call, in order.
    pub fn fail_next<I>(&self, errors: I)
    where
        I: IntoIterator<Item = LedgerError>,
    {
        self.books.lock().unwrap().scripted_failures.extend(errors);
    }

    /// Stop failing.
    pub fn recover(&self) {
        let mut books = self.books.lock().unwrap();
        books.failure = None;
        books.scripted_failures.clear();
    }

    /// Stall every call until [`open_gate`](Self::open_gate).
    pub fn close_gate(&self) {
        self.gate.send_replace(false);
    }

    /// Release stalled calls.
    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    /// Wait until at least `count` calls have been made.
    pub async fn wait_for_calls(&self, count: usize, timeout: Duration) -> bool {
        let mut calls = self.call_count.subscribe();
        tokio::time::timeout(timeout, async move {
            calls.wait_for(|made| *made >= count).await.is_ok()
        })
        .await
        .unwrap_or(false)
    }

    /// Every call, including failed and stalled ones.
    #[must_use]
    pub fn calls(&self) -> Vec<LedgerCall> {
        self.books.lock().unwrap().attempted.clone()
    }

    /// Calls that succeeded.
    #[must_use]
    pub fn applied(&self) -> Vec<LedgerCall> {
        self.books.lock().unwrap().applied.clone()
    }

    /// Successful experience grants.
    #[must_use]
    pub fn experience_grants(&self) -> Vec<ExperienceGrant> {
        self.applied()
            .into_iter()
            .filter_map(|call| match call {
                LedgerCall::Experience(grant) => Some(grant),
                _ => None,
            })
            .collect()
    }

    /// Successful counter increments.
    #[must_use]
    pub fn increments(&self) -> Vec<CounterIncrement> {
        self.applied()
            .into_iter()
            .filter_map(|call| match call {
                LedgerCall::Increment(increment) => Some(increment),
                _ => None,
            })
            .collect()
    }

    /// Successful award requests, whether or not they unlocked anything.
    #[must_use]
    pub fn awards(&self) -> Vec<AchievementAward> {
        self.applied()
            .into_iter()
            .filter_map(|call| match call {
                LedgerCall::Award(award) => Some(award),
                _ => None,
            })
            .collect()
    }

    /// Award requests for `achievement`.
    #[must_use]
    pub fn awards_of(&self, achievement: &AchievementId) -> Vec<AchievementAward> {
        self.awards()
            .into_iter()
            .filter(|award| &award.achievement == achievement)
            .collect()
    }

    /// Achievements unlocked so far.
    #[must_use]
    pub fn earned(&self) -> HashSet<AchievementId> {
        self.books.lock().unwrap().earned.clone()
    }

    /// Current value of `counter`.
    #[must_use]
    pub fn counter(&self, counter: Counter) -> u64 {
        self.books
            .lock()
            .unwrap()
            .counters
            .get(&counter)
            .copied()
            .unwrap_or(0)
    }

    /// Record `call`, wait for the gate, then fail or apply it.
    async fn perform<T>(
        &self,
        call: LedgerCall,
        apply: impl FnOnce(&mut Books) -> T,
    ) -> Result<T, LedgerError> {
        self.books.lock().unwrap().attempted.push(call.clone());
        self.call_count.send_modify(|made| *made += 1);

        let mut gate = self.gate.subscribe();
        if gate.wait_for(|open| *open).await.is_err() {
            return Err(LedgerError::Unavailable("ledger shut down".into()));
        }

        let mut books = self.books.lock().unwrap();
        if let Some(error) = books.scripted_failures.pop_front() {
            return Err(error);
        }
        if let Some(error) = &books.failure {
            return Err(error.clone());
        }
        books.applied.push(call);
        Ok(apply(&mut *books))
    }
}

impl Default for RecordingLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl RewardLedger for RecordingLedger {
    fn add_experience(&self, grant: ExperienceGrant) -> LedgerFuture<'_, ExperienceOutcome> {
        let amount = u64::from(grant.amount);
        Box::pin(self.perform(LedgerCall::Experience(grant), move |books| {
            books.total_xp += amount;
            ExperienceOutcome {
                total_xp: books.total_xp,
                level: 1,
                leveled_up: false,
                applied: true,
            }
        }))
    }

    fn increment_counter(&self, increment: CounterIncrement) -> LedgerFuture<'_, CounterUpdate> {
        let counter = increment.counter;
        let delta = u64::from(increment.delta);
        Box::pin(self.perform(LedgerCall::Increment(increment), move |books| {
            let value = books.counters.entry(counter).or_insert(0);
            let previous = *value;
            *value += delta;
            CounterUpdate {
                counter,
                previous,
                current: *value,
                applied: true,
            }
        }))
    }

    fn award_achievement(&self, award: AchievementAward) -> LedgerFuture<'_, AwardOutcome> {
        let achievement = award.achievement.clone();
        Box::pin(self.perform(LedgerCall::Award(award), move |books| {
            if books.earned.insert(achievement) {
                AwardOutcome::Awarded { xp_reward: 0 }
            } else {
                AwardOutcome::AlreadyEarned
            }
        }))
    }

    fn record_activity(&self, day: NaiveDate) -> LedgerFuture<'_, StreakUpdate> {
        Box::pin(self.perform(LedgerCall::Activity(day), move |books| {
            let changed = books.last_active != Some(day);
            if changed {
                let consecutive = books.last_active.and_then(|last| last.succ_opt()) == Some(day);
                books.streak = if consecutive { books.streak + 1 } else { 1 };
                books.last_active = Some(day);
            }
            StreakUpdate {
                current: books.streak,
                longest: books.streak,
                changed,
            }
        }))
    }

    fn counter_value(&self, counter: Counter) -> LedgerFuture<'_, u64> {
        let value = self.counter(counter);
        Box::pin(async move { Ok(value) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn increments_return_previous_and_current() {
        let ledger = RecordingLedger::new().with_counter(Counter::PlantsAdded, 4);
        let update = ledger
            .increment_counter(CounterIncrement::new(Counter::PlantsAdded, 1))
            .await
            .unwrap();

        assert_eq!((update.previous, update.current), (4, 5));
        assert_eq!(ledger.counter(Counter::PlantsAdded), 5);
    }

    #[tokio::test]
    async fn awards_unlock_once() {
        let ledger = RecordingLedger::new();
        let award = AchievementAward::new(AchievementId::FIRST_TASK);

        assert!(matches!(
            ledger.award_achievement(award.clone()).await,
            Ok(AwardOutcome::Awarded { .. })
        ));
        assert_eq!(
            ledger.award_achievement(award).await,
            Ok(AwardOutcome::AlreadyEarned)
        );
        assert_eq!(ledger.awards().len(), 2);
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let ledger = RecordingLedger::new();
        ledger.fail_next([LedgerError::Timeout(50)]);

        let grant = ExperienceGrant::new(20, "Growth milestone recorded");
        assert_eq!(
            ledger.add_experience(grant.clone()).await,
            Err(LedgerError::Timeout(50))
        );
        assert!(ledger.add_experience(grant).await.is_ok());
        assert_eq!(ledger.calls().len(), 2);
        assert_eq!(ledger.experience_grants().len(), 1);
    }

    #[tokio::test]
    async fn gate_stalls_calls_until_opened() {
        let ledger = RecordingLedger::new();
        ledger.close_gate();

        let pending = tokio::spawn({
            let ledger = ledger.clone();
            async move {
                ledger
                    .add_experience(ExperienceGrant::new(30, "Plant added to collection"))
                    .await
            }
        });

        assert!(ledger.wait_for_calls(1, Duration::from_secs(1)).await);
        assert!(ledger.applied().is_empty());

        ledger.open_gate();
        assert!(pending.await.unwrap().is_ok());
        assert_eq!(ledger.applied().len(), 1);
    }

    #[tokio::test]
    async fn streak_counts_consecutive_days() {
        let monday = NaiveDate::from_ymd_opt(2025, 1, 6).unwrap();
        let ledger = RecordingLedger::new().with_streak(6, monday);

        let tuesday = monday.succ_opt().unwrap();
        let update = ledger.record_activity(tuesday).await.unwrap();
        assert_eq!(update.current, 7);
        assert!(update.changed);

        let again = ledger.record_activity(tuesday).await.unwrap();
        assert!(!again.changed);
    }
}
