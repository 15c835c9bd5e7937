//! Event source abstraction for row change subscriptions.
//!
//! An [`EventSource`] publishes [`RowEvent`]s for backend collections. A
//! subscriber asks for one collection and change kind (optionally narrowed by
//! a [`RowFilter`]) and receives a [`Subscription`]: an identifier to release
//! it later and a stream of events.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐   insert/update   ┌──────────────┐
//! │   Backend   │ ────────────────► │ Event Source │
//! └─────────────┘                   └──────┬───────┘
//!                                          │ RowEvent stream
//!                                     ┌────┴────┐
//!                                     ▼         ▼
//!                               ┌─────────┐ ┌─────────┐
//!                               │Handler A│ │Handler B│
//!                               └─────────┘ └─────────┘
//! ```
//!
//! # Delivery Semantics
//!
//! Implementations are expected to deliver each change once, but reconnects
//! may replay changes. Redelivered events keep their [`EventId`](crate::event::EventId),
//! which consumers turn into idempotency keys.
//!
//! # Example
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use greenleaf_core::event_source::{EventSource, SubscriptionSpec};
//! use greenleaf_core::event::ChangeKind;
//!
//! let spec = SubscriptionSpec::new("plant_additions", "user_plants", ChangeKind::Insert);
//! let mut subscription = source.subscribe(spec).await?;
//!
//! while let Some(result) = subscription.events.next().await {
//!     match result {
//!         Ok(event) => println!("Received: {event}"),
//!         Err(e) => tracing::error!("Event stream error: {e}"),
//!     }
//! }
//!
//! source.unsubscribe(subscription.id).await?;
//! ```

use crate::event::{ChangeKind, RowEvent};
use crate::filter::RowFilter;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event source operations.
#[derive(Error, Debug, Clone)]
pub enum EventSourceError {
    /// Failed to connect to the event source
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The subscription could not be established
    #[error("Subscription failed for channel '{channel}': {reason}")]
    SubscriptionFailed {
        /// Channel that failed
        channel: String,
        /// The reason for failure
        reason: String,
    },

    /// The subscription id is not known to the source
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(SubscriptionId),

    /// An event could not be decoded off the wire
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// Handle identifying an open subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Wrap a raw identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw identifier value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// What to subscribe to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSpec {
    /// Channel name, unique per handler (e.g. `milestone_additions`)
    pub channel: String,
    /// Collection to watch
    pub collection: String,
    /// Change kind to receive
    pub kind: ChangeKind,
    /// Optional row filter applied by the source
    pub filter: Option<RowFilter>,
}

impl SubscriptionSpec {
    /// Subscribe to every change of `kind` on `collection`.
    #[must_use]
    pub fn new(
        channel: impl Into<String>,
        collection: impl Into<String>,
        kind: ChangeKind,
    ) -> Self {
        Self {
            channel: channel.into(),
            collection: collection.into(),
            kind,
            filter: None,
        }
    }

    /// Narrow the subscription with a row filter.
    #[must_use]
    pub fn with_filter(mut self, filter: RowFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Whether an event falls within this subscription.
    #[must_use]
    pub fn accepts(&self, event: &RowEvent) -> bool {
        event.collection == self.collection
            && self.kind.accepts(event.kind)
            && self
                .filter
                .as_ref()
                .is_none_or(|filter| filter.matches(&event.record))
    }
}

impl fmt::Display for SubscriptionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} on {}", self.channel, self.kind, self.collection)?;
        if let Some(filter) = &self.filter {
            write!(f, " where {filter}")?;
        }
        f.write_str(")")
    }
}

/// Stream of events from a subscription.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<RowEvent, EventSourceError>> + Send>>;

/// An open subscription: its handle plus the stream of matching events.
///
/// The stream ends once the subscription is released.
pub struct Subscription {
    /// Handle used to unsubscribe
    pub id: SubscriptionId,
    /// Matching events, in delivery order
    pub events: EventStream,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("events", &"<stream>")
            .finish()
    }
}

/// Trait for event source implementations.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be shared as `Arc<dyn EventSource>` between handlers.
pub trait EventSource: Send + Sync {
    /// Open a subscription.
    ///
    /// # Errors
    ///
    /// Returns [`EventSourceError::SubscriptionFailed`] if the source refuses
    /// the subscription, or a transport error if it cannot be reached.
    fn subscribe(
        &self,
        spec: SubscriptionSpec,
    ) -> Pin<Box<dyn Future<Output = Result<Subscription, EventSourceError>> + Send + '_>>;

    /// Release a subscription; its event stream ends.
    ///
    /// # Errors
    ///
    /// Returns [`EventSourceError::UnknownSubscription`] if the id is not open.
    fn unsubscribe(
        &self,
        id: SubscriptionId,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventSourceError>> + Send + '_>>;
}
