//! Event trait and the serialized forms events take in a store.
//!
//! Events are immutable facts. An entity produces them from commands, the
//! store persists them, and both recovery and the read side replay them.
//!
//! Payloads are serialized with `bincode`. Every serialized event carries a
//! stable, versioned type name (`"Deposited.v1"`) so readers can recognize the
//! payloads they understand and skip the rest.
//!
//! # Example
//!
//! ```
//! use eventkeep_core::event::{Event, SerializedEvent};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! enum CounterEvent {
//!     Incremented { by: u32 },
//! }
//!
//! impl Event for CounterEvent {
//!     fn event_type(&self) -> &'static str {
//!         match self {
//!             CounterEvent::Incremented { .. } => "Incremented.v1",
//!         }
//!     }
//! }
//!
//! let serialized = SerializedEvent::from_event(&CounterEvent::Incremented { by: 2 }, None)
//!     .unwrap()
//!     .with_tag("counter");
//! assert!(serialized.has_tag("counter"));
//! ```

use crate::key::{EntityKey, SequenceNr};
use serde::{Serialize, de::DeserializeOwned};
use smallvec::SmallVec;
use std::fmt;
use thiserror::Error;

/// Error types for event operations.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),

    /// Unknown event type encountered during deserialization.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),
}

/// An event that can be persisted and replayed to reconstruct state.
///
/// # Event Naming Convention
///
/// `event_type()` returns a stable identifier with a version suffix, for
/// example `"Deposited.v1"`. A schema change gets a new suffix.
pub trait Event: Send + Sync + 'static {
    /// Returns the event type identifier for this event.
    fn event_type(&self) -> &'static str;

    /// Serialize this event to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError>
    where
        Self: Serialize,
    {
        bincode::serialize(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize an event from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the bytes are corrupted or
    /// belong to a different event schema.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        bincode::deserialize(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

/// Tags attached to a serialized event.
///
/// Most events carry exactly one tag, so the first one is stored inline.
pub type Tags = SmallVec<[String; 1]>;

/// A serialized event ready for storage.
///
/// This is the wire format between an entity runtime and the event store.
#[derive(Clone, Debug, PartialEq)]
pub struct SerializedEvent {
    /// The event type identifier (e.g., "Deposited.v1").
    pub event_type: String,

    /// The bincode-serialized event data.
    pub data: Vec<u8>,

    /// Tags indexing this event for tag queries (e.g., "account").
    pub tags: Tags,

    /// Optional JSON metadata (correlation ids and the like).
    pub metadata: Option<serde_json::Value>,
}

impl SerializedEvent {
    /// Create a new untagged serialized event.
    #[must_use]
    pub fn new(event_type: String, data: Vec<u8>, metadata: Option<serde_json::Value>) -> Self {
        Self {
            event_type,
            data,
            tags: Tags::new(),
            metadata,
        }
    }

    /// Create a serialized event from an `Event`.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    pub fn from_event<E: Event + Serialize>(
        event: &E,
        metadata: Option<serde_json::Value>,
    ) -> Result<Self, EventError> {
        Ok(Self::new(event.event_type().to_string(), event.to_bytes()?, metadata))
    }

    /// Add a tag to this event.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.has_tag(&tag) {
            self.tags.push(tag);
        }
        self
    }

    /// Whether this event carries `tag`.
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ type: {}, size: {} bytes }}",
            self.event_type,
            self.data.len()
        )
    }
}

/// A serialized event as stored in one entity's stream.
#[derive(Clone, Debug, PartialEq)]
pub struct PersistedEvent {
    /// The entity the event belongs to.
    pub key: EntityKey,
    /// Position of the event within the entity's stream.
    pub sequence_nr: SequenceNr,
    /// The event itself.
    pub event: SerializedEvent,
}
