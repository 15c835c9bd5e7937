//! In-memory row store that publishes change events.
//!
//! [`InMemoryDatabase`] implements both
//! [`EventSource`](greenleaf_core::event_source::EventSource) and
//! [`RowCounter`](greenleaf_core::query::RowCounter), so one value can stand
//! in for the whole backend in tests.
//!
//! Writes are delivered synchronously to every matching subscription.
//! Event ids have the form `{collection}:{row_id}:{sequence}`.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use greenleaf_core::environment::{Clock, SystemClock};
use greenleaf_core::event::{ChangeKind, EventId, RowEvent};
use greenleaf_core::event_source::{
    EventSource, EventSourceError, Subscription, SubscriptionId, SubscriptionSpec,
};
use greenleaf_core::filter::RowFilter;
use greenleaf_core::query::{QueryError, RowCounter};
use greenleaf_core::rows::{CARE_TASKS, GROWTH_MILESTONES, USER_PLANTS};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type EventSender = mpsc::UnboundedSender<Result<RowEvent, EventSourceError>>;

struct Subscriber {
    spec: SubscriptionSpec,
    sender: EventSender,
}

#[derive(Default)]
struct DatabaseState {
    tables: BTreeMap<String, Vec<Value>>,
    subscribers: HashMap<SubscriptionId, Subscriber>,
    next_subscription: u64,
    next_sequence: u64,
    history: Vec<RowEvent>,
    refuse_subscriptions: Option<String>,
    count_failure: Option<QueryError>,
    unsubscribe_calls: Vec<SubscriptionId>,
}

impl DatabaseState {
    fn publish(&mut self, event: &RowEvent) {
        self.history.push(event.clone());
        for subscriber in self.subscribers.values() {
            if subscriber.spec.accepts(event) {
                let _ = subscriber.sender.send(Ok(event.clone()));
            }
        }
    }

    fn next_event_id(&mut self, collection: &str, record: &Value) -> EventId {
        self.next_sequence += 1;
        let row_id = match record.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => "?".to_string(),
        };
        EventId::new(format!("{collection}:{row_id}:{}", self.next_sequence))
    }
}

/// In-memory backend for tests.
///
/// Clones share the same tables and subscriptions.
///
/// # Example
///
/// ```
/// use greenleaf_testing::{InMemoryDatabase, fixtures};
/// use greenleaf_core::rows::USER_PLANTS;
///
/// let db = InMemoryDatabase::new();
/// let event = db.insert(USER_PLANTS, fixtures::plant("p-1"));
/// assert_eq!(event.id.as_str(), "user_plants:p-1:1");
/// assert_eq!(db.row_count(USER_PLANTS), 1);
/// ```
#[derive(Clone)]
pub struct InMemoryDatabase {
    state: Arc<Mutex<DatabaseState>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryDatabase {
    /// Empty database with the care-planner collections and the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Empty database stamping events with `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let mut state = DatabaseState::default();
        for collection in [GROWTH_MILESTONES, USER_PLANTS, CARE_TASKS] {
            state.tables.insert(collection.to_string(), Vec::new());
        }
        Self {
            state: Arc::new(Mutex::new(state)),
            clock,
        }
    }

    /// Insert a row and publish an `INSERT` event.
    pub fn insert(&self, collection: &str, record: Value) -> RowEvent {
        let mut state = self.state.lock().unwrap();
        state
            .tables
            .entry(collection.to_string())
            .or_default()
            .push(record.clone());

        let id = state.next_event_id(collection, &record);
        let event = RowEvent::new(id, collection, ChangeKind::Insert, self.clock.now(), record);
        state.publish(&event);
        event
    }

    /// Replace the row with the same `id` and publish an `UPDATE` event
    /// carrying the previous row. Returns `None` if no such row exists.
    pub fn update(&self, collection: &str, record: Value) -> Option<RowEvent> {
        let mut state = self.state.lock().unwrap();
        let row_id = record.get("id")?.clone();
        let row = state
            .tables
            .get_mut(collection)?
            .iter_mut()
            .find(|row| row.get("id") == Some(&row_id))?;
        let old = std::mem::replace(row, record.clone());

        let id = state.next_event_id(collection, &record);
        let event = RowEvent::new(id, collection, ChangeKind::Update, self.clock.now(), record)
            .with_old_record(old);
        state.publish(&event);
        Some(event)
    }

    /// Insert rows without publishing anything.
    pub fn seed<I>(&self, collection: &str, records: I)
    where
        I: IntoIterator<Item = Value>,
    {
        self.state
            .lock()
            .unwrap()
            .tables
            .entry(collection.to_string())
            .or_default()
            .extend(records);
    }

    /// Deliver `event` again, unchanged, to matching subscriptions.
    pub fn redeliver(&self, event: &RowEvent) {
        self.state.lock().unwrap().publish(event);
    }

    /// Deliver a stream error to every subscription.
    pub fn inject_stream_error(&self, error: &EventSourceError) {
        let state = self.state.lock().unwrap();
        for subscriber in state.subscribers.values() {
            let _ = subscriber.sender.send(Err(error.clone()));
        }
    }

    /// Make `subscribe` fail with `reason` until
    /// [`accept_subscriptions`](Self::accept_subscriptions).
    pub fn refuse_subscriptions(&self, reason: impl Into<String>) {
        self.state.lock().unwrap().refuse_subscriptions = Some(reason.into());
    }

    /// Let `subscribe` succeed again.
    pub fn accept_subscriptions(&self) {
        self.state.lock().unwrap().refuse_subscriptions = None;
    }

    /// Make `count_rows` fail with `error` (or succeed again with `None`).
    pub fn fail_counts(&self, error: Option<QueryError>) {
        self.state.lock().unwrap().count_failure = error;
    }

    /// Open subscriptions.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.state.lock().unwrap().subscribers.len()
    }

    /// Subscription ids passed to `unsubscribe`, in call order.
    #[must_use]
    pub fn unsubscribe_calls(&self) -> Vec<SubscriptionId> {
        self.state.lock().unwrap().unsubscribe_calls.clone()
    }

    /// Rows in `collection`.
    #[must_use]
    pub fn row_count(&self, collection: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(collection)
            .map_or(0, Vec::len)
    }

    /// Every event published so far, redeliveries included.
    #[must_use]
    pub fn history(&self) -> Vec<RowEvent> {
        self.state.lock().unwrap().history.clone()
    }
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSource for InMemoryDatabase {
    fn subscribe(
        &self,
        spec: SubscriptionSpec,
    ) -> Pin<Box<dyn Future<Output = Result<Subscription, EventSourceError>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if let Some(reason) = &state.refuse_subscriptions {
                return Err(EventSourceError::SubscriptionFailed {
                    channel: spec.channel.clone(),
                    reason: reason.clone(),
                });
            }

            state.next_subscription += 1;
            let id = SubscriptionId::new(state.next_subscription);
            let (sender, mut receiver) = mpsc::unbounded_channel();
            state.subscribers.insert(id, Subscriber { spec, sender });

            let events = async_stream::stream! {
                while let Some(item) = receiver.recv().await {
                    yield item;
                }
            };

            Ok(Subscription {
                id,
                events: Box::pin(events),
            })
        })
    }

    fn unsubscribe(
        &self,
        id: SubscriptionId,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventSourceError>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.unsubscribe_calls.push(id);
            state
                .subscribers
                .remove(&id)
                .map(|_| ())
                .ok_or(EventSourceError::UnknownSubscription(id))
        })
    }
}

impl RowCounter for InMemoryDatabase {
    fn count_rows<'a>(
        &'a self,
        collection: &'a str,
        filter: &'a RowFilter,
    ) -> Pin<Box<dyn Future<Output = Result<u64, QueryError>> + Send + 'a>> {
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            if let Some(error) = &state.count_failure {
                return Err(error.clone());
            }
            let rows = state
                .tables
                .get(collection)
                .ok_or_else(|| QueryError::UnknownCollection(collection.to_string()))?;
            let count = rows.iter().filter(|row| filter.matches(row)).count();
            Ok(u64::try_from(count).unwrap_or(u64::MAX))
        })
    }
}
