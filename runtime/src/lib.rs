//! # Greenleaf Runtime
//!
//! Runs reactions: long-lived handlers that subscribe to row changes and turn
//! each delivered event into reward requests against the ledger.
//!
//! ## Core Components
//!
//! - **[`EventReactionHandler`]**: owns one subscription, spawns one task per
//!   delivered event, tracks in-flight work
//! - **[`Reaction`]**: what to do with one event (grant XP, bump counters,
//!   request achievements)
//! - **[`RewardContext`]**: injected ledger, row counter, identity and clock,
//!   with retries and a dead letter queue around every reward call
//! - **[`reactions`]**: the milestone, plant-addition and task-completion
//!   reactions
//!
//! ## Example
//!
//! ```ignore
//! use greenleaf_runtime::{EventReactionHandler, RewardContext};
//! use greenleaf_runtime::reactions::PlantAdditionReaction;
//!
//! let context = RewardContext::new(ledger, rows, identity, clock);
//! let mut handler = EventReactionHandler::new(PlantAdditionReaction, source, context);
//!
//! handler.mount().await?;
//! // ... events flow ...
//! handler.unmount().await;
//! ```

pub mod config;
pub mod context;
pub mod dead_letter;
pub mod handler;
pub mod metrics;
pub mod reaction;
pub mod reactions;
pub mod retry;

pub use config::{ConfigError, HandlerConfig};
pub use context::{RewardContext, RewardOrigin};
pub use dead_letter::{DeadLetter, DeadLetterQueue, FailedReward, RewardRequest};
pub use error::{HandlerError, RewardError};
pub use handler::{EventReactionHandler, HandlerState};
pub use reaction::{Reaction, ReactionReport};
pub use retry::RetryPolicy;

/// Error types for the runtime
pub mod error {
    use greenleaf_core::event_source::EventSourceError;
    use greenleaf_core::ledger::LedgerError;
    use greenleaf_core::query::QueryError;
    use thiserror::Error;

    /// Errors surfaced by handler lifecycle operations.
    #[derive(Error, Debug, Clone)]
    pub enum HandlerError {
        /// The event source refused the subscription
        #[error("Failed to subscribe to {channel}: {source}")]
        Subscribe {
            /// Channel of the handler
            channel: &'static str,
            /// Underlying source error
            source: EventSourceError,
        },

        /// `mount` was called on a handler that is already subscribed
        #[error("Handler for {0} is already subscribed")]
        AlreadySubscribed(&'static str),

        /// `mount` was called after `unmount`
        #[error("Handler for {0} has been unmounted")]
        Closed(&'static str),

        /// Waiting for reactions to finish took too long
        #[error("Timed out waiting for {channel} to complete {expected} reactions")]
        Timeout {
            /// Channel of the handler
            channel: &'static str,
            /// Completed count that was awaited
            expected: u64,
        },
    }

    /// A reward call that failed for good.
    ///
    /// Reactions record these in their report; they never reach the
    /// subscription.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum RewardError {
        /// Ledger call failed after retries
        #[error("{operation} failed after {attempts} attempt(s): {source}")]
        Ledger {
            /// Ledger operation name
            operation: &'static str,
            /// Attempts made
            attempts: u32,
            /// Last error
            source: LedgerError,
        },

        /// Row count failed after retries
        #[error("Counting {collection} failed after {attempts} attempt(s): {source}")]
        Query {
            /// Collection that was counted
            collection: String,
            /// Attempts made
            attempts: u32,
            /// Last error
            source: QueryError,
        },
    }

    impl RewardError {
        /// Name of the failed operation.
        #[must_use]
        pub const fn operation(&self) -> &'static str {
            match self {
                Self::Ledger { operation, .. } => *operation,
                Self::Query { .. } => "count_rows",
            }
        }
    }
}
