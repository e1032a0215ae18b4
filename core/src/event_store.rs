//! Event store trait: the append-only, per-entity event log.
//!
//! The store is an external collaborator. The runtime only needs two things
//! from it: append one event with optimistic concurrency, and load the events
//! of one entity after a given sequence number.
//!
//! # Implementations
//!
//! - `InMemoryEventStore` (in `eventkeep-testing`): deterministic, with failure injection
//!
//! # Example
//!
//! ```no_run
//! use eventkeep_core::event::SerializedEvent;
//! use eventkeep_core::event_store::{EventStore, EventStoreError};
//! use eventkeep_core::key::{EntityKey, SequenceNr};
//!
//! async fn example<S: EventStore>(store: &S, event: SerializedEvent) -> Result<(), EventStoreError> {
//!     let key = EntityKey::new("100");
//!
//!     let first = store.append_event(key.clone(), Some(SequenceNr::INITIAL), event).await?;
//!     assert_eq!(first, SequenceNr::new(1));
//!
//!     let all = store.load_events(key, SequenceNr::INITIAL).await?;
//!     assert_eq!(all.len(), 1);
//!     Ok(())
//! }
//! ```

use crate::event::{PersistedEvent, SerializedEvent};
use crate::key::{EntityKey, SequenceNr};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during event or snapshot store operations.
#[derive(Error, Debug)]
pub enum EventStoreError {
    /// Optimistic concurrency conflict: the stream is not at the expected sequence number.
    #[error("Concurrency conflict on {key}: expected sequence {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The entity where the conflict occurred.
        key: EntityKey,
        /// The sequence number the writer expected.
        expected: SequenceNr,
        /// The actual current sequence number.
        actual: SequenceNr,
    },

    /// The store rejected the write.
    #[error("Write rejected for {key}: {reason}")]
    Rejected {
        /// The entity whose write was rejected.
        key: EntityKey,
        /// Why the store refused.
        reason: String,
    },

    /// Database connection or query error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Append-only event log addressed by entity key.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` so the store can be shared as
/// `Arc<dyn EventStore>` between every entity runtime.
pub trait EventStore: Send + Sync {
    /// Append one event to an entity's stream.
    ///
    /// - `expected`: `Some(seq)` asserts the stream currently ends at `seq`;
    ///   `None` skips the check
    ///
    /// Returns the sequence number assigned to the appended event. The event
    /// is durable once this resolves with `Ok`.
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict`: the stream moved past `expected`
    /// - `Rejected` / `DatabaseError`: the event was not stored
    fn append_event(
        &self,
        key: EntityKey,
        expected: Option<SequenceNr>,
        event: SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<SequenceNr, EventStoreError>> + Send + '_>>;

    /// Load all events of `key` with a sequence number greater than `after`,
    /// ordered by sequence number.
    ///
    /// A stream that does not exist yields an empty vector.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the stream cannot be read.
    fn load_events(
        &self,
        key: EntityKey,
        after: SequenceNr,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PersistedEvent>, EventStoreError>> + Send + '_>>;
}
