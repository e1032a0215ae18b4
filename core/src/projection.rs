//! Read-side projections: building query views from the event feed.
//!
//! # Overview
//!
//! A projection consumes the tagged event feed and keeps a secondary view up
//! to date. Delivery is at-least-once, so every update a projection makes must
//! be idempotent: applying the same event twice leaves the view as if it had
//! been applied once.
//!
//! ```text
//! event feed ──▶ projector ──route_key──▶ per-key read worker ──apply_event──▶ view
//!                    │
//!                    └──save_position──▶ checkpoint
//! ```
//!
//! ## Key Concepts
//!
//! - **Projection**: turns envelopes into view updates and reports an [`Ack`]
//! - **Checkpoint**: the last feed offset whose event and all predecessors
//!   were acknowledged
//! - **Rebuild**: clear the view and replay from the beginning

use crate::event_feed::EventEnvelope;
use crate::key::EntityKey;
use crate::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Error type for projection operations.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Checkpoint error
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Event processing error
    #[error("Event processing error: {0}")]
    EventProcessing(String),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// How a projection handled one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ack {
    /// The view was updated.
    Processed,
    /// The view already contained this event; nothing changed.
    Duplicate,
    /// The event type is not one this projection understands.
    NotProcessed,
}

/// A projection builds and maintains a read model from feed envelopes.
///
/// Envelopes for the same routing key are applied one at a time and in feed
/// order. Envelopes for different keys may be applied concurrently.
pub trait Projection: Send + Sync + 'static {
    /// Projection name, used for checkpointing. Unique per system.
    fn name(&self) -> &str;

    /// Key of the read worker that must apply `envelope`.
    ///
    /// Defaults to the key of the entity that persisted the event.
    fn route_key(&self, envelope: &EventEnvelope) -> EntityKey {
        envelope.key.clone()
    }

    /// Apply one envelope to the view.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] if the view could not be updated. The
    /// projector retries and eventually stops without checkpointing past it.
    fn apply_event(&self, envelope: &EventEnvelope) -> impl Future<Output = Result<Ack>> + Send;

    /// Drop the view so it can be rebuilt from the beginning of the feed.
    ///
    /// Default implementation is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] if the view could not be cleared.
    fn rebuild(&self) -> impl Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}

/// Durable record of how far a projection has processed the feed.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns so the projector
/// can hold it as `Arc<dyn ProjectionCheckpoint>`.
pub trait ProjectionCheckpoint: Send + Sync {
    /// Save the current position in the feed.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Checkpoint`] if save fails.
    fn save_position(
        &self,
        projection_name: &str,
        position: EventPosition,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Load the last saved position for a projection.
    ///
    /// `None` means the projection has never saved one and starts from the
    /// beginning.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Checkpoint`] if load fails.
    fn load_position(
        &self,
        projection_name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<EventPosition>>> + Send + '_>>;
}

/// Position in the event feed (for checkpoint resumption).
///
/// `offset` is the last offset that was fully processed; `0` means nothing.
///
/// # Example
///
/// ```
/// use eventkeep_core::projection::EventPosition;
///
/// let start = EventPosition::beginning();
/// assert_eq!(start.offset, 0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventPosition {
    /// Last processed feed offset.
    pub offset: u64,

    /// Timestamp when this position was reached
    pub timestamp: DateTime<Utc>,
}

impl EventPosition {
    /// Create a new event position.
    #[must_use]
    pub const fn new(offset: u64, timestamp: DateTime<Utc>) -> Self {
        Self { offset, timestamp }
    }

    /// Position before the first event of the feed.
    #[must_use]
    pub fn beginning() -> Self {
        Self {
            offset: 0,
            timestamp: Utc::now(),
        }
    }
}
