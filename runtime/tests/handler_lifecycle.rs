//! Handler lifecycle: mounting, unmounting, concurrency and failure handling.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use greenleaf_core::event_source::{EventSource, EventSourceError};
use greenleaf_core::ledger::{AchievementAward, LedgerError};
use greenleaf_core::query::RowCounter;
use greenleaf_core::reward::{AchievementId, Counter};
use greenleaf_core::rows::USER_PLANTS;
use greenleaf_runtime::reactions::PlantAdditionReaction;
use greenleaf_runtime::{
    DeadLetterQueue, EventReactionHandler, HandlerError, HandlerState, RetryPolicy, RewardContext,
    RewardRequest,
};
use greenleaf_testing::helpers::init_tracing;
use greenleaf_testing::{
    InMemoryDatabase, LedgerCall, RecordingLedger, StaticIdentity, fixtures, test_clock,
};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

fn fast_retries() -> RetryPolicy {
    RetryPolicy::default()
        .with_max_retries(2)
        .with_initial_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5))
        .with_jitter(false)
}

fn plant_handler(
    db: &Arc<InMemoryDatabase>,
    ledger: &RecordingLedger,
) -> EventReactionHandler<PlantAdditionReaction> {
    init_tracing();
    let context = RewardContext::new(
        Arc::new(ledger.clone()),
        Arc::clone(db) as Arc<dyn RowCounter>,
        Arc::new(StaticIdentity::signed_in("user-1")),
        Arc::new(test_clock()),
    )
    .with_retry_policy(fast_retries())
    .with_dead_letters(DeadLetterQueue::new(16));

    let source = Arc::clone(db) as Arc<dyn EventSource>;
    EventReactionHandler::new(PlantAdditionReaction, source, context)
}

async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn mount_then_unmount() {
    let db = Arc::new(InMemoryDatabase::new());
    let mut handler = plant_handler(&db, &RecordingLedger::new());
    assert_eq!(handler.state(), HandlerState::Unsubscribed);

    let id = handler.mount().await.unwrap();
    assert_eq!(handler.state(), HandlerState::Subscribed(id));
    assert_eq!(db.active_subscriptions(), 1);

    handler.unmount().await;
    assert_eq!(handler.state(), HandlerState::Closed);
    assert_eq!(db.active_subscriptions(), 0);
    assert_eq!(db.unsubscribe_calls(), vec![id]);
}

#[tokio::test]
async fn mounting_twice_is_rejected() {
    let db = Arc::new(InMemoryDatabase::new());
    let mut handler = plant_handler(&db, &RecordingLedger::new());
    handler.mount().await.unwrap();

    assert!(matches!(
        handler.mount().await,
        Err(HandlerError::AlreadySubscribed("plant_additions"))
    ));
    assert_eq!(db.active_subscriptions(), 1);
}

#[tokio::test]
async fn closed_handler_cannot_be_remounted() {
    let db = Arc::new(InMemoryDatabase::new());
    let mut handler = plant_handler(&db, &RecordingLedger::new());
    handler.mount().await.unwrap();
    handler.unmount().await;

    assert!(matches!(handler.mount().await, Err(HandlerError::Closed(_))));
    assert_eq!(db.active_subscriptions(), 0);
}

#[tokio::test]
async fn unmount_before_mount_closes_without_unsubscribing() {
    let db = Arc::new(InMemoryDatabase::new());
    let mut handler = plant_handler(&db, &RecordingLedger::new());

    handler.unmount().await;
    handler.unmount().await;

    assert_eq!(handler.state(), HandlerState::Closed);
    assert!(db.unsubscribe_calls().is_empty());
}

#[tokio::test]
async fn refused_subscription_leaves_handler_mountable() {
    let db = Arc::new(InMemoryDatabase::new());
    let mut handler = plant_handler(&db, &RecordingLedger::new());
    db.refuse_subscriptions("realtime quota exceeded");

    let err = handler.mount().await.unwrap_err();
    assert!(matches!(
        err,
        HandlerError::Subscribe {
            channel: "plant_additions",
            source: EventSourceError::SubscriptionFailed { .. }
        }
    ));
    assert_eq!(handler.state(), HandlerState::Unsubscribed);

    db.accept_subscriptions();
    handler.mount().await.unwrap();
    assert_eq!(db.active_subscriptions(), 1);
}

#[tokio::test]
async fn events_after_unmount_are_not_processed() {
    let db = Arc::new(InMemoryDatabase::new());
    let ledger = RecordingLedger::new();
    let mut handler = plant_handler(&db, &ledger);
    handler.mount().await.unwrap();
    handler.unmount().await;

    db.insert(USER_PLANTS, fixtures::plant("p-1"));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(handler.events_received(), 0);
    assert!(ledger.calls().is_empty());
}

#[tokio::test]
async fn unmount_does_not_wait_for_running_reactions() {
    let db = Arc::new(InMemoryDatabase::new());
    let ledger = RecordingLedger::new();
    let mut handler = plant_handler(&db, &ledger);
    handler.mount().await.unwrap();

    ledger.close_gate();
    db.insert(USER_PLANTS, fixtures::plant("p-1"));
    assert!(ledger.wait_for_calls(1, WAIT).await);
    assert_eq!(handler.in_flight(), 1);

    tokio::time::timeout(WAIT, handler.unmount())
        .await
        .expect("unmount should not block on in-flight reactions");
    assert_eq!(handler.state(), HandlerState::Closed);
    assert_eq!(db.active_subscriptions(), 0);

    // The orphaned reaction finishes later; its failures are absorbed.
    ledger.fail_all(LedgerError::Rejected("user deleted".into()));
    ledger.open_gate();
    handler.wait_for_completed(1, WAIT).await.unwrap();
    handler.wait_idle(WAIT).await.unwrap();

    let dead = handler.context().dead_letters().drain();
    assert_eq!(dead.len(), 2);
    assert_eq!(dead[0].payload.request.operation(), "add_experience");
    assert_eq!(dead[1].payload.request.operation(), "increment_counter");
    assert_eq!(dead[0].attempts, 1);
}

#[tokio::test]
async fn concurrent_additions_cross_the_threshold_once() {
    let db = Arc::new(InMemoryDatabase::new());
    let ledger = RecordingLedger::new().with_counter(Counter::PlantsAdded, 4);
    let mut handler = plant_handler(&db, &ledger);
    handler.mount().await.unwrap();

    ledger.close_gate();
    db.insert(USER_PLANTS, fixtures::plant("p-5"));
    db.insert(USER_PLANTS, fixtures::plant("p-6"));
    assert!(ledger.wait_for_calls(2, WAIT).await);
    assert_eq!(handler.in_flight(), 2);
    ledger.open_gate();

    handler.wait_for_completed(2, WAIT).await.unwrap();

    assert_eq!(ledger.counter(Counter::PlantsAdded), 6);
    assert_eq!(
        ledger.awards_of(&AchievementId::FIVE_PLANTS),
        vec![AchievementAward::new(AchievementId::FIVE_PLANTS)]
    );
    assert!(ledger.awards_of(&AchievementId::TEN_PLANTS).is_empty());
    assert_eq!(ledger.experience_grants().len(), 2);
}

#[tokio::test]
async fn stream_errors_do_not_stop_the_listener() {
    let db = Arc::new(InMemoryDatabase::new());
    let ledger = RecordingLedger::new();
    let mut handler = plant_handler(&db, &ledger);
    handler.mount().await.unwrap();

    db.inject_stream_error(&EventSourceError::MalformedEvent("truncated frame".into()));
    db.insert(USER_PLANTS, fixtures::plant("p-1"));
    handler.wait_for_completed(1, WAIT).await.unwrap();

    assert_eq!(handler.events_received(), 1);
    assert_eq!(ledger.experience_grants().len(), 1);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let db = Arc::new(InMemoryDatabase::new());
    let ledger = RecordingLedger::new();
    let mut handler = plant_handler(&db, &ledger);
    handler.mount().await.unwrap();

    ledger.fail_next([
        LedgerError::Unavailable("503".into()),
        LedgerError::Timeout(50),
    ]);
    db.insert(USER_PLANTS, fixtures::plant("p-1"));
    handler.wait_for_completed(1, WAIT).await.unwrap();

    let attempts = ledger
        .calls()
        .into_iter()
        .filter(|call| matches!(call, LedgerCall::Experience(_)))
        .count();
    assert_eq!(attempts, 3);
    assert_eq!(ledger.experience_grants().len(), 1);
    assert_eq!(ledger.counter(Counter::PlantsAdded), 1);
    assert!(handler.context().dead_letters().is_empty());
}

#[tokio::test]
async fn exhausted_retries_are_dead_lettered() {
    let db = Arc::new(InMemoryDatabase::new());
    let ledger = RecordingLedger::new();
    let mut handler = plant_handler(&db, &ledger);
    handler.mount().await.unwrap();

    ledger.fail_all(LedgerError::Unavailable("ledger offline".into()));
    let event = db.insert(USER_PLANTS, fixtures::plant("p-1"));
    handler.wait_for_completed(1, WAIT).await.unwrap();

    let dead = handler.context().dead_letters().drain();
    assert_eq!(dead.len(), 2);
    for letter in &dead {
        assert_eq!(letter.attempts, 3);
        assert_eq!(letter.payload.channel, "plant_additions");
        assert_eq!(letter.payload.event_id, event.id);
        assert!(letter.error_message.contains("ledger offline"));
    }
    assert!(matches!(
        dead[0].payload.request,
        RewardRequest::Experience(ref grant) if grant.amount == 30
    ));
    assert!(matches!(dead[1].payload.request, RewardRequest::Counter(_)));

    // No counter value came back, so no collection award was attempted.
    assert!(ledger.awards().is_empty());

    // The listener is still alive once the ledger recovers.
    ledger.recover();
    db.insert(USER_PLANTS, fixtures::plant("p-2"));
    handler.wait_for_completed(2, WAIT).await.unwrap();
    assert_eq!(ledger.counter(Counter::PlantsAdded), 1);
}

#[tokio::test]
async fn dropping_a_mounted_handler_releases_the_subscription() {
    let db = Arc::new(InMemoryDatabase::new());
    {
        let mut handler = plant_handler(&db, &RecordingLedger::new());
        handler.mount().await.unwrap();
        assert_eq!(db.active_subscriptions(), 1);
    }

    assert!(eventually(|| db.active_subscriptions() == 0).await);
    assert_eq!(db.unsubscribe_calls().len(), 1);
}

#[tokio::test]
async fn wait_for_completed_times_out() {
    let db = Arc::new(InMemoryDatabase::new());
    let mut handler = plant_handler(&db, &RecordingLedger::new());
    handler.mount().await.unwrap();

    let err = handler
        .wait_for_completed(1, Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, HandlerError::Timeout { expected: 1, .. }));
}
