//! # Greenleaf Testing
//!
//! Testing utilities for reactions and handlers.
//!
//! This crate provides:
//! - [`InMemoryDatabase`]: an event source and row counter backed by memory
//! - [`RecordingLedger`]: a reward ledger that records calls and can fail or
//!   stall on demand
//! - [`StaticIdentity`] and [`FixedClock`]: deterministic environment
//! - [`fixtures`]: row payload builders
//!
//! ## Example
//!
//! ```ignore
//! use greenleaf_testing::{
//!     InMemoryDatabase, RecordingLedger, StaticIdentity, fixtures, test_clock,
//! };
//!
//! #[tokio::test]
//! async fn plant_insert_grants_experience() {
//!     let db = Arc::new(InMemoryDatabase::new());
//!     let ledger = Arc::new(RecordingLedger::new());
//!     let identity = Arc::new(StaticIdentity::signed_in("u-1"));
//!     let ctx = RewardContext::new(ledger.clone(), db.clone(), identity, Arc::new(test_clock()));
//!
//!     let mut handler = EventReactionHandler::new(PlantAdditionReaction, db.clone(), ctx);
//!     handler.mount().await.unwrap();
//!     db.insert(USER_PLANTS, fixtures::plant("p-1"));
//!     handler.wait_for_completed(1, Duration::from_secs(1)).await.unwrap();
//!
//!     assert_eq!(ledger.experience_grants().len(), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use greenleaf_core::environment::Clock;

pub mod database;
pub mod fixtures;
pub mod ledger;

pub use database::InMemoryDatabase;
pub use ledger::{LedgerCall, RecordingLedger};

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use greenleaf_core::query::{CurrentUser, UserId};
    use std::future::Future;
    use std::pin::Pin;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use greenleaf_testing::mocks::FixedClock;
    /// use greenleaf_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }

        /// Clock fixed at an RFC 3339 timestamp.
        ///
        /// # Panics
        ///
        /// Panics if `timestamp` is not valid RFC 3339.
        #[must_use]
        #[allow(clippy::expect_used)]
        pub fn at(timestamp: &str) -> Self {
            Self::new(
                DateTime::parse_from_rfc3339(timestamp)
                    .expect("test timestamp should be RFC 3339")
                    .with_timezone(&Utc),
            )
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 12:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::at("2025-01-01T12:00:00Z")
    }

    /// Identity that always reports the same user (or none).
    #[derive(Debug, Clone, Default)]
    pub struct StaticIdentity {
        user: Option<UserId>,
    }

    impl StaticIdentity {
        /// A signed-in user.
        #[must_use]
        pub fn signed_in(user: impl Into<String>) -> Self {
            Self {
                user: Some(UserId::new(user)),
            }
        }

        /// Nobody signed in.
        #[must_use]
        pub const fn anonymous() -> Self {
            Self { user: None }
        }
    }

    impl CurrentUser for StaticIdentity {
        fn current_user(&self) -> Pin<Box<dyn Future<Output = Option<UserId>> + Send + '_>> {
            let user = self.user.clone();
            Box::pin(async move { user })
        }
    }
}

/// Test helpers and utilities.
pub mod helpers {
    /// Install a test-friendly tracing subscriber honouring `RUST_LOG`.
    ///
    /// Safe to call from many tests; only the first call installs.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// Milestone titles that never mention blooming or flowers.
    pub fn plain_milestone_title() -> impl Strategy<Value = String> {
        prop::sample::select(vec![
            "Fertilized today",
            "New leaf",
            "Repotted",
            "Pruned the stems",
            "Moved to a sunnier spot",
            "Roots showing",
        ])
        .prop_map(str::to_string)
    }

    /// Milestone titles that mention a bloom or flower, in random case,
    /// surrounded by plain text.
    pub fn bloom_milestone_title() -> impl Strategy<Value = String> {
        (
            "[a-z ]{0,12}",
            prop::sample::select(vec!["bloom", "Bloom", "BLOOM", "flower", "Flowers", "FLOWERING"]),
            "[a-z ]{0,12}",
        )
            .prop_map(|(prefix, word, suffix)| format!("{prefix}{word}{suffix}"))
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, StaticIdentity, test_clock};
