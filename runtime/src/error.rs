//! Error types for the entity runtime and router.

use eventkeep_core::event::EventError;
use eventkeep_core::event_store::EventStoreError;
use eventkeep_core::key::{EntityKey, SequenceNr};
use thiserror::Error;

/// Errors returned by [`Router`](crate::router::Router) itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouterError {
    /// The router is shutting down and no longer activates instances.
    #[error("Router is shutting down")]
    ShuttingDown,

    /// Every instance activated for the key stopped before it accepted the message.
    #[error("No instance for {key} accepted the message after {attempts} attempts")]
    Unavailable {
        /// The key being routed to.
        key: EntityKey,
        /// How many activations were tried.
        attempts: usize,
    },
}

/// Errors a caller of an entity can observe.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The store failed or rejected the write; nothing was applied.
    #[error("Persist failed: {0}")]
    Persist(#[from] EventStoreError),

    /// An event could not be encoded or decoded.
    #[error("Event codec error: {0}")]
    Event(#[from] EventError),

    /// The instance could not recover its state, so the command was not handled.
    #[error("Activation of {key} failed: {reason}")]
    ActivationFailed {
        /// The entity that failed to activate.
        key: EntityKey,
        /// The recovery error.
        reason: String,
    },

    /// The message could not be delivered.
    #[error(transparent)]
    Router(#[from] RouterError),

    /// The instance terminated without answering.
    #[error("Entity {0} stopped before replying")]
    NoReply(EntityKey),
}

/// Errors raised while an instance rebuilds its state.
#[derive(Error, Debug)]
pub(crate) enum RecoveryError {
    #[error("store error: {0}")]
    Store(#[from] EventStoreError),

    #[error("event decode error: {0}")]
    Event(#[from] EventError),

    #[error("snapshot decode error: {0}")]
    Snapshot(String),

    #[error("corrupt record: sequence {found} does not follow {previous}")]
    OutOfOrder {
        previous: SequenceNr,
        found: SequenceNr,
    },
}
