//! # Eventkeep Core
//!
//! Core traits and types for event-sourced entities and their read side.
//!
//! ## Core Concepts
//!
//! - **Entity**: per-key state machine; commands become events, events fold into state
//! - **Event Store**: append-only per-key log with monotonic sequence numbers
//! - **Snapshot Store**: latest serialized state per key
//! - **Event Feed**: tag-indexed, offset-resumable stream of persisted events
//! - **Projection**: idempotent read-side update driven by the feed
//! - **Environment**: injected dependencies such as the [`environment::Clock`]
//!
//! The runtime that hosts entities lives in `eventkeep-runtime`, the projector
//! in `eventkeep-projections`, and in-memory stores in `eventkeep-testing`.

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

pub mod entity;
pub mod event;
pub mod event_feed;
pub mod event_store;
pub mod key;
pub mod projection;
pub mod snapshot;

/// Environment module - Dependency injection traits
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Event timestamps are taken from the clock so tests can pin them.
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use entity::{CommandContext, Decision, Entity};
pub use event::{Event, EventError, PersistedEvent, SerializedEvent};
pub use event_feed::{EventEnvelope, EventFeed, EventFeedStream, FeedError};
pub use event_store::{EventStore, EventStoreError};
pub use key::{EntityKey, SequenceNr};
pub use snapshot::{Snapshot, SnapshotStore};
