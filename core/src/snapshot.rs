//! Snapshot store trait.
//!
//! A snapshot is the full serialized state of an entity together with the
//! sequence number of the last event folded into it. Recovery starts from the
//! latest snapshot and replays only the events after it.

use crate::event_store::EventStoreError;
use crate::key::{EntityKey, SequenceNr};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Serialized entity state taken at `sequence_nr`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Sequence number of the last event included in `state`.
    pub sequence_nr: SequenceNr,
    /// The bincode-serialized entity state.
    pub state: Vec<u8>,
}

impl Snapshot {
    /// Create a new snapshot.
    #[must_use]
    pub const fn new(sequence_nr: SequenceNr, state: Vec<u8>) -> Self {
        Self { sequence_nr, state }
    }
}

/// Keyed snapshot storage.
///
/// Only the latest snapshot per key matters to recovery. Implementations may
/// keep older ones.
pub trait SnapshotStore: Send + Sync {
    /// Save a snapshot for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError`] if the snapshot was not stored.
    fn save_snapshot(
        &self,
        key: EntityKey,
        snapshot: Snapshot,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventStoreError>> + Send + '_>>;

    /// Load the latest snapshot for `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError`] if the store cannot be read.
    fn load_snapshot(
        &self,
        key: EntityKey,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Snapshot>, EventStoreError>> + Send + '_>>;
}
