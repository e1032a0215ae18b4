//! # Eventkeep Testing
//!
//! Testing utilities for Eventkeep entities and projections.
//!
//! This crate provides:
//! - [`InMemoryEventStore`]: event log, snapshot store and event feed in one
//! - [`InMemoryProjectionCheckpoint`] and [`RecordingProjection`] for projector tests
//! - [`FixedClock`] for deterministic timestamps
//! - proptest strategies for keys and tracing setup for test output
//!
//! ## Example
//!
//! ```ignore
//! use eventkeep_testing::{InMemoryEventStore, test_clock};
//! use eventkeep_runtime::{EntityRouter, RuntimeConfig};
//! use std::sync::Arc;
//!
//! #[tokio::test]
//! async fn deposit_is_persisted() {
//!     let store = Arc::new(InMemoryEventStore::new());
//!     let router: EntityRouter<Account> = EntityRouter::for_entity(
//!         store.clone(),
//!         store.clone(),
//!         Arc::new(test_clock()),
//!         RuntimeConfig::default(),
//!     );
//!
//!     router.ask(&key, AccountCommand::Deposit { .. }).await.unwrap();
//!     assert_eq!(store.events(&key).len(), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use eventkeep_core::environment::Clock;

mod event_store;
mod projection_mocks;

/// Mock implementations of storage and environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    pub use crate::event_store::InMemoryEventStore;
    pub use crate::projection_mocks::{InMemoryProjectionCheckpoint, RecordingProjection};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use eventkeep_testing::mocks::FixedClock;
    /// use eventkeep_core::environment::Clock;
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
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Fixed clock at 2025-01-01 00:00:00 UTC.
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::days(20_089))
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use tracing_subscriber::EnvFilter;

    /// Route tracing output to the test harness.
    ///
    /// Honors `RUST_LOG`, defaulting to `warn`. Safe to call from every test.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use eventkeep_core::key::EntityKey;
    use proptest::prelude::*;

    /// Strategy producing valid entity keys.
    pub fn entity_key() -> impl Strategy<Value = EntityKey> {
        "[a-z0-9]{1,12}".prop_map(EntityKey::new)
    }
}

// Re-export commonly used items
pub use helpers::init_tracing;
pub use mocks::{
    FixedClock, InMemoryEventStore, InMemoryProjectionCheckpoint, RecordingProjection, test_clock,
};

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fixed_clock_is_pinned_to_new_year_2025() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    proptest! {
        #[test]
        fn generated_keys_are_non_empty(key in properties::entity_key()) {
            prop_assert!(!key.as_str().is_empty());
            prop_assert_eq!(key.as_str().parse::<eventkeep_core::key::EntityKey>().ok(), Some(key.clone()));
        }
    }
}
