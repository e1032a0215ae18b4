//! Tag-indexed, offset-resumable event feed.
//!
//! Every persisted event that carries a tag is also visible through the feed
//! of that tag. Each event gets a feed offset; offsets grow with append order
//! and a consumer resumes by asking for the events after the last offset it
//! has fully processed.
//!
//! ```text
//!  entity runtimes ──append──▶ event log ──events_by_tag("account", 41)──▶ projector
//!                                            offsets 42, 43, ... (never ends)
//! ```
//!
//! Delivery is at-least-once from the consumer's point of view: whatever was
//! not checkpointed is delivered again after a restart.

use crate::event::SerializedEvent;
use crate::key::{EntityKey, SequenceNr};
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors produced by an event feed.
#[derive(Error, Debug, Clone)]
pub enum FeedError {
    /// The subscription could not be established.
    #[error("Subscription to tag '{tag}' failed: {reason}")]
    SubscriptionFailed {
        /// The tag that was requested.
        tag: String,
        /// Why it failed.
        reason: String,
    },

    /// The feed broke while streaming.
    #[error("Event feed interrupted: {0}")]
    Interrupted(String),
}

/// One event delivered by the feed.
#[derive(Clone, Debug, PartialEq)]
pub struct EventEnvelope {
    /// Position of the event in the feed.
    pub offset: u64,
    /// The entity that persisted the event.
    pub key: EntityKey,
    /// The event's sequence number within its entity.
    pub sequence_nr: SequenceNr,
    /// The event itself.
    pub event: SerializedEvent,
}

/// A never-ending stream of feed envelopes.
pub type EventFeedStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope, FeedError>> + Send>>;

/// Query side of the event log, indexed by tag.
pub trait EventFeed: Send + Sync {
    /// Subscribe to all events tagged `tag` with an offset greater than
    /// `after_offset`, in offset order. `0` starts from the beginning.
    ///
    /// The stream first delivers the stored backlog, then keeps delivering
    /// events as they are appended.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::SubscriptionFailed`] if the subscription cannot be set up.
    fn events_by_tag(
        &self,
        tag: &str,
        after_offset: u64,
    ) -> Pin<Box<dyn Future<Output = Result<EventFeedStream, FeedError>> + Send + '_>>;
}
