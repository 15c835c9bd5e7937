//! In-process reward ledger.
//!
//! [`InMemoryLedger`] keeps one user's reward state behind a single mutex, so
//! every request is applied atomically: counter increments return exact
//! before/after values and achievement checks cannot race each other.

use crate::catalog::AchievementCatalog;
use crate::notification::RewardNotification;
use crate::progress::{level_for_xp, next_streak, xp_for_next_level};
use chrono::{DateTime, NaiveDate, Utc};
use greenleaf_core::environment::{Clock, SystemClock};
use greenleaf_core::ledger::{
    AchievementAward, AwardOutcome, CounterIncrement, CounterUpdate, ExperienceGrant,
    ExperienceOutcome, LedgerFuture, RewardLedger, StreakUpdate,
};
use greenleaf_core::query::UserId;
use greenleaf_core::{AchievementId, Counter, IdempotencyKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

/// Snapshot of a user's reward statistics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    /// Owner of the stats
    pub user_id: UserId,
    /// Lifetime experience
    pub total_xp: u64,
    /// Current level
    pub level: u32,
    /// Consecutive active days
    pub current_streak_days: u32,
    /// Longest streak ever
    pub longest_streak_days: u32,
    /// Last day with recorded activity
    pub last_activity_date: Option<NaiveDate>,
    /// Named counters
    pub counters: BTreeMap<Counter, u64>,
}

impl UserStats {
    /// Fresh stats: level 1, no experience.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            total_xp: 0,
            level: 1,
            current_streak_days: 0,
            longest_streak_days: 0,
            last_activity_date: None,
            counters: BTreeMap::new(),
        }
    }

    /// Value of a counter (0 when never incremented).
    #[must_use]
    pub fn counter(&self, counter: Counter) -> u64 {
        self.counters.get(&counter).copied().unwrap_or(0)
    }

    /// Experience total at which the next level begins.
    #[must_use]
    pub fn xp_for_next_level(&self) -> u64 {
        xp_for_next_level(self.level)
    }
}

/// An unlocked achievement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarnedAchievement {
    /// Which achievement
    pub achievement: AchievementId,
    /// Entity it was earned for, if scoped
    pub entity: Option<String>,
    /// Display title at the time of unlocking
    pub title: String,
    /// When it was unlocked
    pub earned_at: DateTime<Utc>,
}

/// Number of idempotency keys a ledger remembers by default.
pub const DEFAULT_KEY_WINDOW: usize = 4096;

/// The most recently applied idempotency keys, oldest evicted first.
#[derive(Debug)]
struct AppliedKeys {
    seen: HashSet<IdempotencyKey>,
    order: VecDeque<IdempotencyKey>,
    capacity: usize,
}

impl AppliedKeys {
    fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Returns `false` if `key` is still in the window.
    fn insert(&mut self, key: &IdempotencyKey) -> bool {
        if !self.seen.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key.clone());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

#[derive(Debug)]
struct LedgerState {
    stats: UserStats,
    earned: BTreeMap<AchievementId, EarnedAchievement>,
    applied_keys: AppliedKeys,
}

impl LedgerState {
    /// Records the key; returns `false` if it was already applied.
    fn claim(&mut self, key: Option<&IdempotencyKey>) -> bool {
        key.is_none_or(|key| self.applied_keys.insert(key))
    }

    fn experience_snapshot(&self, leveled_up: bool, applied: bool) -> ExperienceOutcome {
        ExperienceOutcome {
            total_xp: self.stats.total_xp,
            level: self.stats.level,
            leveled_up,
            applied,
        }
    }

    fn apply_experience(
        &mut self,
        amount: u32,
        reason: Option<&str>,
        notes: &mut Vec<RewardNotification>,
    ) -> ExperienceOutcome {
        self.stats.total_xp = self.stats.total_xp.saturating_add(u64::from(amount));
        let level = level_for_xp(self.stats.total_xp);
        let leveled_up = level > self.stats.level;
        self.stats.level = level;

        if leveled_up {
            notes.push(RewardNotification::LevelUp { level });
        } else if let Some(reason) = reason {
            notes.push(RewardNotification::ExperienceGained {
                amount,
                reason: reason.to_string(),
            });
        }

        self.experience_snapshot(leveled_up, true)
    }

    fn apply_increment(&mut self, counter: Counter, delta: u32) -> CounterUpdate {
        let value = self.stats.counters.entry(counter).or_insert(0);
        let previous = *value;
        *value = previous.saturating_add(u64::from(delta));

        CounterUpdate {
            counter,
            previous,
            current: *value,
            applied: true,
        }
    }
}

/// Reward ledger for a single user, held in memory.
///
/// Cloning shares the same state. Replays are recognised for the last
/// [`DEFAULT_KEY_WINDOW`] keyed requests (see
/// [`with_key_window`](Self::with_key_window)); a key older than that is
/// applied again.
///
/// # Example
///
/// ```
/// use greenleaf_core::ledger::{ExperienceGrant, RewardLedger};
/// use greenleaf_core::query::UserId;
/// use greenleaf_ledger::InMemoryLedger;
///
/// # async fn example() -> Result<(), greenleaf_core::LedgerError> {
/// let ledger = InMemoryLedger::new(UserId::new("user-1"));
/// let outcome = ledger.add_experience(ExperienceGrant::new(120, "Welcome bonus")).await?;
/// assert_eq!(outcome.level, 2);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    catalog: Arc<AchievementCatalog>,
    clock: Arc<dyn Clock>,
    notifications: broadcast::Sender<RewardNotification>,
}

impl InMemoryLedger {
    /// Ledger with the default catalog and the system clock.
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self::with_catalog(user_id, AchievementCatalog::default(), Arc::new(SystemClock))
    }

    /// Ledger with an explicit catalog and clock.
    #[must_use]
    pub fn with_catalog(
        user_id: UserId,
        catalog: AchievementCatalog,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (notifications, _) = broadcast::channel(64);

        Self {
            state: Arc::new(Mutex::new(LedgerState {
                stats: UserStats::new(user_id),
                earned: BTreeMap::new(),
                applied_keys: AppliedKeys::new(DEFAULT_KEY_WINDOW),
            })),
            catalog: Arc::new(catalog),
            clock,
            notifications,
        }
    }

    /// Remember at most `capacity` idempotency keys (minimum 1).
    ///
    /// Keys already recorded are forgotten.
    #[must_use]
    pub fn with_key_window(self, capacity: usize) -> Self {
        self.lock().applied_keys = AppliedKeys::new(capacity);
        self
    }

    /// Number of idempotency keys currently remembered.
    #[must_use]
    pub fn remembered_keys(&self) -> usize {
        self.lock().applied_keys.len()
    }

    /// Replace the stored statistics (e.g. after loading them from storage).
    #[must_use]
    pub fn with_stats(self, stats: UserStats) -> Self {
        self.lock().stats = stats;
        self
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> UserStats {
        self.lock().stats.clone()
    }

    /// Unlocked achievements, most recent first.
    #[must_use]
    pub fn earned(&self) -> Vec<EarnedAchievement> {
        let mut earned: Vec<_> = self.lock().earned.values().cloned().collect();
        earned.sort_by(|a, b| b.earned_at.cmp(&a.earned_at));
        earned
    }

    /// Whether an achievement has been unlocked.
    #[must_use]
    pub fn has_earned(&self, achievement: &AchievementId) -> bool {
        self.lock().earned.contains_key(achievement)
    }

    /// Catalog the ledger awards from.
    #[must_use]
    pub fn catalog(&self) -> &AchievementCatalog {
        &self.catalog
    }

    /// Receive notifications emitted after this call.
    #[must_use]
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<RewardNotification> {
        self.notifications.subscribe()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, notes: Vec<RewardNotification>) {
        for note in notes {
            tracing::debug!(notification = %note, "Reward notification");
            // No receivers is fine; notifications are best-effort.
            let _ = self.notifications.send(note);
        }
    }

    fn grant(&self, grant: &ExperienceGrant) -> ExperienceOutcome {
        let mut notes = Vec::new();
        let outcome = {
            let mut state = self.lock();
            if state.claim(grant.idempotency_key.as_ref()) {
                state.apply_experience(grant.amount, grant.reason.as_deref(), &mut notes)
            } else {
                tracing::debug!(key = ?grant.idempotency_key, "Experience grant already applied");
                state.experience_snapshot(false, false)
            }
        };
        self.publish(notes);
        outcome
    }

    fn increment(&self, increment: &CounterIncrement) -> CounterUpdate {
        let mut state = self.lock();
        if state.claim(increment.idempotency_key.as_ref()) {
            state.apply_increment(increment.counter, increment.delta)
        } else {
            tracing::debug!(key = ?increment.idempotency_key, "Counter increment already applied");
            let current = state.stats.counter(increment.counter);
            CounterUpdate {
                counter: increment.counter,
                previous: current,
                current,
                applied: false,
            }
        }
    }

    fn award(&self, award: AchievementAward) -> AwardOutcome {
        let Some(definition) = self.catalog.get(&award.achievement) else {
            tracing::warn!(achievement = %award.achievement, "Unknown achievement requested");
            return AwardOutcome::Unknown;
        };

        let mut notes = Vec::new();
        {
            let mut state = self.lock();
            if state.earned.contains_key(&award.achievement) {
                return AwardOutcome::AlreadyEarned;
            }

            state.earned.insert(
                award.achievement.clone(),
                EarnedAchievement {
                    achievement: award.achievement.clone(),
                    entity: award.entity,
                    title: definition.title.clone(),
                    earned_at: self.clock.now(),
                },
            );
            state.apply_experience(definition.xp_reward, None, &mut notes);
            state.apply_increment(Counter::AchievementsEarned, 1);
        }

        tracing::info!(
            achievement = %definition.id,
            xp_reward = definition.xp_reward,
            "Achievement unlocked"
        );
        notes.push(RewardNotification::AchievementUnlocked {
            achievement: definition.id.clone(),
            title: definition.title.clone(),
            icon: definition.icon.clone(),
        });
        self.publish(notes);

        AwardOutcome::Awarded {
            xp_reward: definition.xp_reward,
        }
    }

    fn activity(&self, day: NaiveDate) -> StreakUpdate {
        let mut state = self.lock();
        let stats = &mut state.stats;

        match next_streak(stats.last_activity_date, day, stats.current_streak_days) {
            Some(current) => {
                stats.current_streak_days = current;
                stats.longest_streak_days = stats.longest_streak_days.max(current);
                stats.last_activity_date = Some(day);
                StreakUpdate {
                    current,
                    longest: stats.longest_streak_days,
                    changed: true,
                }
            }
            None => StreakUpdate {
                current: stats.current_streak_days,
                longest: stats.longest_streak_days,
                changed: false,
            },
        }
    }
}

impl std::fmt::Debug for InMemoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLedger")
            .field("stats", &self.stats())
            .field("catalog", &self.catalog.len())
            .finish_non_exhaustive()
    }
}

impl RewardLedger for InMemoryLedger {
    fn add_experience(&self, grant: ExperienceGrant) -> LedgerFuture<'_, ExperienceOutcome> {
        Box::pin(async move { Ok(self.grant(&grant)) })
    }

    fn increment_counter(&self, increment: CounterIncrement) -> LedgerFuture<'_, CounterUpdate> {
        Box::pin(async move { Ok(self.increment(&increment)) })
    }

    fn award_achievement(&self, award: AchievementAward) -> LedgerFuture<'_, AwardOutcome> {
        Box::pin(async move { Ok(self.award(award)) })
    }

    fn record_activity(&self, day: NaiveDate) -> LedgerFuture<'_, StreakUpdate> {
        Box::pin(async move { Ok(self.activity(day)) })
    }

    fn counter_value(&self, counter: Counter) -> LedgerFuture<'_, u64> {
        Box::pin(async move { Ok(self.lock().stats.counter(counter)) })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use greenleaf_core::EventId;

    fn ledger() -> InMemoryLedger {
        InMemoryLedger::new(UserId::new("user-1"))
    }

    fn key(step: &str) -> IdempotencyKey {
        IdempotencyKey::for_step("plant_additions", &EventId::new("user_plants:p-1:1"), step)
    }

    #[tokio::test]
    async fn experience_levels_up_and_notifies() {
        let ledger = ledger();
        let mut notes = ledger.subscribe_notifications();

        let first = ledger
            .add_experience(ExperienceGrant::new(30, "Plant added to collection"))
            .await
            .unwrap();
        assert_eq!((first.total_xp, first.level, first.leveled_up), (30, 1, false));

        let second = ledger
            .add_experience(ExperienceGrant::new(80, "Bonus"))
            .await
            .unwrap();
        assert_eq!((second.total_xp, second.level, second.leveled_up), (110, 2, true));

        assert_eq!(notes.recv().await.unwrap().to_string(), "+30 XP: Plant added to collection");
        assert_eq!(notes.recv().await.unwrap(), RewardNotification::LevelUp { level: 2 });
    }

    #[tokio::test]
    async fn idempotent_experience_is_applied_once() {
        let ledger = ledger();
        let grant = ExperienceGrant::new(20, "Growth milestone recorded").with_key(key("xp"));

        let first = ledger.add_experience(grant.clone()).await.unwrap();
        let replay = ledger.add_experience(grant).await.unwrap();

        assert!(first.applied);
        assert!(!replay.applied);
        assert_eq!(ledger.stats().total_xp, 20);
    }

    #[tokio::test]
    async fn key_window_forgets_oldest_keys_first() {
        let ledger = ledger().with_key_window(2);
        let grant = |step: &str| ExperienceGrant::new(10, "Plant added").with_key(key(step));

        for step in ["a", "b", "c"] {
            assert!(ledger.add_experience(grant(step)).await.unwrap().applied);
        }
        assert_eq!(ledger.remembered_keys(), 2);

        // "b" and "c" are still remembered.
        assert!(!ledger.add_experience(grant("c")).await.unwrap().applied);
        assert!(!ledger.add_experience(grant("b")).await.unwrap().applied);

        // "a" was evicted when "c" arrived.
        assert!(ledger.add_experience(grant("a")).await.unwrap().applied);
        assert_eq!(ledger.stats().total_xp, 40);
        assert_eq!(ledger.remembered_keys(), 2);
    }

    #[tokio::test]
    async fn default_key_window_is_bounded() {
        let ledger = ledger();
        for i in 0..DEFAULT_KEY_WINDOW + 10 {
            let increment = CounterIncrement::new(Counter::PlantsAdded, 1)
                .with_key(key(&format!("counter-{i}")));
            ledger.increment_counter(increment).await.unwrap();
        }

        assert_eq!(ledger.remembered_keys(), DEFAULT_KEY_WINDOW);
        assert_eq!(ledger.stats().counter(Counter::PlantsAdded), DEFAULT_KEY_WINDOW as u64 + 10);
    }

    #[tokio::test]
    async fn counters_report_previous_and_current() {
        let ledger = ledger();

        let first = ledger
            .increment_counter(CounterIncrement::new(Counter::PlantsAdded, 1))
            .await
            .unwrap();
        let second = ledger
            .increment_counter(CounterIncrement::new(Counter::PlantsAdded, 1))
            .await
            .unwrap();

        assert_eq!((first.previous, first.current), (0, 1));
        assert_eq!((second.previous, second.current), (1, 2));
        assert_eq!(ledger.counter_value(Counter::PlantsAdded).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn replayed_increment_does_not_move_counter() {
        let ledger = ledger();
        let increment = CounterIncrement::new(Counter::TasksCompleted, 1).with_key(key("counter"));

        ledger.increment_counter(increment.clone()).await.unwrap();
        let replay = ledger.increment_counter(increment).await.unwrap();

        assert!(!replay.applied);
        assert_eq!((replay.previous, replay.current), (1, 1));
    }

    #[tokio::test]
    async fn award_grants_reward_once() {
        let ledger = ledger();
        let mut notes = ledger.subscribe_notifications();

        let outcome = ledger
            .award_achievement(AchievementAward::scoped(AchievementId::FIRST_BLOOM, "plant-1"))
            .await
            .unwrap();
        assert_eq!(outcome, AwardOutcome::Awarded { xp_reward: 100 });

        let again = ledger
            .award_achievement(AchievementAward::scoped(AchievementId::FIRST_BLOOM, "plant-2"))
            .await
            .unwrap();
        assert_eq!(again, AwardOutcome::AlreadyEarned);

        let stats = ledger.stats();
        assert_eq!(stats.total_xp, 100);
        assert_eq!(stats.counter(Counter::AchievementsEarned), 1);
        assert_eq!(ledger.earned()[0].entity.as_deref(), Some("plant-1"));

        // 100 XP crosses into level 2
        assert_eq!(notes.recv().await.unwrap(), RewardNotification::LevelUp { level: 2 });
        assert!(matches!(
            notes.recv().await.unwrap(),
            RewardNotification::AchievementUnlocked { .. }
        ));
    }

    #[tokio::test]
    async fn unknown_achievement_changes_nothing() {
        let ledger = ledger();
        let outcome = ledger
            .award_achievement(AchievementAward::new(AchievementId::new("pest_defender")))
            .await
            .unwrap();

        assert_eq!(outcome, AwardOutcome::Unknown);
        assert_eq!(ledger.stats(), UserStats::new(UserId::new("user-1")));
    }

    #[tokio::test]
    async fn activity_builds_streaks() {
        let ledger = ledger();
        let day = |s: &str| s.parse::<NaiveDate>().unwrap();

        let first = ledger.record_activity(day("2025-06-01")).await.unwrap();
        let same_day = ledger.record_activity(day("2025-06-01")).await.unwrap();
        let next_day = ledger.record_activity(day("2025-06-02")).await.unwrap();
        let gap = ledger.record_activity(day("2025-06-05")).await.unwrap();

        assert_eq!((first.current, first.changed), (1, true));
        assert!(!same_day.changed);
        assert_eq!(next_day.current, 2);
        assert_eq!((gap.current, gap.longest), (1, 2));
    }

    #[tokio::test]
    async fn concurrent_increments_never_share_a_value() {
        let ledger = ledger().with_stats({
            let mut stats = UserStats::new(UserId::new("user-1"));
            stats.counters.insert(Counter::PlantsAdded, 4);
            stats
        });

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = ledger.clone();
                tokio::spawn(async move {
                    ledger
                        .increment_counter(CounterIncrement::new(Counter::PlantsAdded, 1))
                        .await
                        .unwrap()
                        .current
                })
            })
            .collect();

        let mut seen = Vec::new();
        for handle in handles {
            seen.push(handle.await.unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (5..=12).collect::<Vec<_>>());
    }
}
