//! Subscription lifecycle for a single reaction.
//!
//! ```text
//!   Unsubscribed ──mount──▶ Subscribed ──unmount──▶ Closed
//!        │                                            ▲
//!        └──────────────────unmount───────────────────┘
//! ```
//!
//! While subscribed, a listener task reads the subscription stream and
//! spawns one task per event. Events are not ordered relative to each other.
//! Unmounting stops the listener and releases the subscription; reaction
//! tasks already spawned keep running to completion.

use crate::context::RewardContext;
use crate::error::HandlerError;
use crate::metrics::HandlerMetrics;
use crate::reaction::Reaction;
use futures::StreamExt;
use greenleaf_core::event::RowEvent;
use greenleaf_core::event_source::{EventSource, EventStream, SubscriptionId};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Where a handler is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerState {
    /// Not yet mounted
    Unsubscribed,
    /// Listening on the given subscription
    Subscribed(SubscriptionId),
    /// Unmounted; cannot be mounted again
    Closed,
}

/// Counters shared between the handler, its listener and reaction tasks.
#[derive(Debug)]
struct Activity {
    received: AtomicU64,
    in_flight: AtomicUsize,
    completed: watch::Sender<u64>,
}

impl Activity {
    fn new() -> Self {
        Self {
            received: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            completed: watch::Sender::new(0),
        }
    }
}

/// Marks one reaction task as in flight until dropped.
struct InFlight(Arc<Activity>);

impl InFlight {
    fn enter(activity: Arc<Activity>) -> Self {
        activity.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(activity)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.0.completed.send_modify(|completed| *completed += 1);
    }
}

/// Owns one subscription and runs a [`Reaction`] for every delivered event.
///
/// # Example
///
/// ```ignore
/// let mut handler = EventReactionHandler::new(MilestoneReaction, source, context);
/// handler.mount().await?;
/// handler.wait_for_completed(1, Duration::from_secs(1)).await?;
/// handler.unmount().await;
/// ```
pub struct EventReactionHandler<R: Reaction> {
    reaction: Arc<R>,
    source: Arc<dyn EventSource>,
    context: RewardContext,
    state: HandlerState,
    shutdown: Option<watch::Sender<bool>>,
    listener: Option<JoinHandle<()>>,
    activity: Arc<Activity>,
}

impl<R: Reaction> EventReactionHandler<R> {
    /// Create an unmounted handler.
    #[must_use]
    pub fn new(reaction: R, source: Arc<dyn EventSource>, context: RewardContext) -> Self {
        Self {
            reaction: Arc::new(reaction),
            source,
            context,
            state: HandlerState::Unsubscribed,
            shutdown: None,
            listener: None,
            activity: Arc::new(Activity::new()),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> HandlerState {
        self.state
    }

    /// Channel of the reaction.
    #[must_use]
    pub fn channel(&self) -> &'static str {
        self.reaction.channel()
    }

    /// The injected context.
    #[must_use]
    pub const fn context(&self) -> &RewardContext {
        &self.context
    }

    /// Open the subscription and start listening.
    ///
    /// # Errors
    ///
    /// - [`HandlerError::Subscribe`] if the source refuses; the handler stays
    ///   unsubscribed and may be mounted again
    /// - [`HandlerError::AlreadySubscribed`] if already mounted
    /// - [`HandlerError::Closed`] after [`unmount`](Self::unmount)
    pub async fn mount(&mut self) -> Result<SubscriptionId, HandlerError> {
        let channel = self.channel();
        match self.state {
            HandlerState::Unsubscribed => {}
            HandlerState::Subscribed(_) => return Err(HandlerError::AlreadySubscribed(channel)),
            HandlerState::Closed => return Err(HandlerError::Closed(channel)),
        }

        let spec = self.reaction.subscription();
        tracing::debug!(channel, spec = %spec, "Subscribing");

        let subscription = self.source.subscribe(spec).await.map_err(|source| {
            tracing::error!(channel, error = %source, "Failed to subscribe");
            HandlerError::Subscribe { channel, source }
        })?;

        let id = subscription.id;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let listener = tokio::spawn(listen(
            Arc::clone(&self.reaction),
            self.context.clone(),
            subscription.events,
            shutdown_rx,
            Arc::clone(&self.activity),
        ));

        self.shutdown = Some(shutdown_tx);
        self.listener = Some(listener);
        self.state = HandlerState::Subscribed(id);

        tracing::info!(channel, subscription = %id, "Handler mounted");
        Ok(id)
    }

    /// Stop listening and release the subscription.
    ///
    /// Never fails: errors from the source are logged. Reaction tasks that
    /// are already running are left to finish. After this call the handler
    /// is [`HandlerState::Closed`].
    pub async fn unmount(&mut self) {
        let channel = self.channel();
        let previous = std::mem::replace(&mut self.state, HandlerState::Closed);
        let HandlerState::Subscribed(id) = previous else {
            tracing::debug!(channel, state = ?previous, "Unmount without active subscription");
            return;
        };

        if let Some(shutdown) = self.shutdown.take() {
            // The listener may already have exited on stream end.
            let _ = shutdown.send(true);
        }
        if let Some(listener) = self.listener.take() {
            if let Err(e) = listener.await {
                tracing::warn!(channel, error = %e, "Listener task ended abnormally");
            }
        }

        if let Err(e) = self.source.unsubscribe(id).await {
            tracing::warn!(
                channel,
                subscription = %id,
                error = %e,
                "Failed to release subscription"
            );
        }

        tracing::info!(
            channel,
            subscription = %id,
            in_flight = self.in_flight(),
            "Handler unmounted"
        );
    }

    /// Reaction tasks currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.activity.in_flight.load(Ordering::SeqCst)
    }

    /// Events delivered so far.
    #[must_use]
    pub fn events_received(&self) -> u64 {
        self.activity.received.load(Ordering::SeqCst)
    }

    /// Reaction tasks finished so far.
    #[must_use]
    pub fn events_completed(&self) -> u64 {
        *self.activity.completed.borrow()
    }

    /// Wait until at least `count` reactions have finished.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Timeout`] if that does not happen within
    /// `timeout`.
    pub async fn wait_for_completed(
        &self,
        count: u64,
        timeout: Duration,
    ) -> Result<(), HandlerError> {
        let mut completed = self.activity.completed.subscribe();
        let reached = tokio::time::timeout(timeout, async {
            completed.wait_for(|done| *done >= count).await.is_ok()
        })
        .await;

        match reached {
            Ok(true) => Ok(()),
            Ok(false) | Err(_) => Err(HandlerError::Timeout {
                channel: self.channel(),
                expected: count,
            }),
        }
    }

    /// Wait until no reaction task is running.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Timeout`] if tasks are still running after
    /// `timeout`.
    pub async fn wait_idle(&self, timeout: Duration) -> Result<(), HandlerError> {
        let mut completed = self.activity.completed.subscribe();
        let activity = Arc::clone(&self.activity);
        let idle = tokio::time::timeout(timeout, async move {
            while activity.in_flight.load(Ordering::SeqCst) > 0 {
                if completed.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;

        idle.map_err(|_| HandlerError::Timeout {
            channel: self.channel(),
            expected: self.events_received(),
        })
    }
}

impl<R: Reaction> Drop for EventReactionHandler<R> {
    fn drop(&mut self) {
        let HandlerState::Subscribed(id) = self.state else {
            return;
        };
        let channel = self.reaction.channel();

        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let source = Arc::clone(&self.source);
            runtime.spawn(async move {
                if let Err(e) = source.unsubscribe(id).await {
                    tracing::warn!(
                        channel,
                        subscription = %id,
                        error = %e,
                        "Failed to release subscription on drop"
                    );
                }
            });
        } else {
            tracing::warn!(
                channel,
                subscription = %id,
                "Handler dropped outside a runtime, subscription not released"
            );
        }
    }
}

async fn listen<R: Reaction>(
    reaction: Arc<R>,
    context: RewardContext,
    mut events: EventStream,
    mut shutdown: watch::Receiver<bool>,
    activity: Arc<Activity>,
) {
    let channel = reaction.channel();
    tracing::debug!(channel, "Listener started");

    while !*shutdown.borrow() {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }

            next = events.next() => match next {
                Some(Ok(event)) => dispatch(&reaction, &context, &activity, event),
                Some(Err(e)) => {
                    HandlerMetrics::record_stream_error(channel);
                    tracing::error!(channel, error = %e, "Error receiving event");
                }
                None => {
                    tracing::info!(channel, "Event stream closed by source");
                    break;
                }
            },
        }
    }

    tracing::debug!(channel, "Listener stopped");
}

fn dispatch<R: Reaction>(
    reaction: &Arc<R>,
    context: &RewardContext,
    activity: &Arc<Activity>,
    event: RowEvent,
) {
    let channel = reaction.channel();
    activity.received.fetch_add(1, Ordering::SeqCst);
    HandlerMetrics::record_received(channel);
    tracing::debug!(channel, event_id = %event.id, "Event received");

    let guard = InFlight::enter(Arc::clone(activity));
    let reaction = Arc::clone(reaction);
    let context = context.clone();

    tokio::spawn(async move {
        let _guard = guard;
        let started = Instant::now();
        let report = reaction.react(event, context).await;
        HandlerMetrics::record_completed(channel, started.elapsed(), report.failures.len());

        if let Some(reason) = &report.skipped {
            tracing::debug!(
                channel,
                event_id = %report.event_id,
                reason = %reason,
                "Event skipped"
            );
        } else if report.is_clean() {
            tracing::debug!(
                channel,
                event_id = %report.event_id,
                xp = report.experience_granted,
                achievements = ?report.achievements_requested,
                "Reaction completed"
            );
        } else {
            let failures: Vec<String> = report.failures.iter().map(ToString::to_string).collect();
            tracing::warn!(
                channel,
                event_id = %report.event_id,
                failures = ?failures,
                "Reaction completed with failures"
            );
        }
    });
}
