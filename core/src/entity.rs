//! The `Entity` trait: domain logic of an event-sourced entity.
//!
//! An entity is a state machine split in two halves:
//!
//! - [`Entity::decide`] looks at a command and the current state and either
//!   asks the runtime to persist an event or answers immediately
//! - [`Entity::apply`] folds a persisted event into the state
//!
//! `apply` is the only place state changes. The runtime calls it during
//! recovery and after the store has acknowledged an event, never before.
//!
//! # Example
//!
//! ```
//! use eventkeep_core::entity::{CommandContext, Decision, Entity};
//! use eventkeep_core::event::Event;
//! use eventkeep_core::key::EntityKey;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! struct Counter { value: u64 }
//!
//! #[derive(Clone, Debug, Serialize, Deserialize)]
//! struct Incremented;
//!
//! impl Event for Incremented {
//!     fn event_type(&self) -> &'static str { "Incremented.v1" }
//! }
//!
//! enum CounterCommand { Increment, Get }
//!
//! impl Entity for Counter {
//!     type Command = CounterCommand;
//!     type Event = Incremented;
//!     type Reply = u64;
//!
//!     const TAG: &'static str = "counter";
//!
//!     fn empty(_key: &EntityKey) -> Self { Self { value: 0 } }
//!
//!     fn decide(&self, command: CounterCommand, _ctx: &CommandContext<'_>) -> Decision<Incremented, u64> {
//!         match command {
//!             CounterCommand::Increment => Decision::Persist(Incremented),
//!             CounterCommand::Get => Decision::Reply(self.value),
//!         }
//!     }
//!
//!     fn apply(&mut self, _event: &Incremented) { self.value += 1; }
//!
//!     fn persisted_reply(&self, _event: Incremented) -> u64 { self.value }
//! }
//! ```

use crate::event::Event;
use crate::key::EntityKey;
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};

/// What the runtime knows about an entity when a command arrives.
#[derive(Debug, Clone, Copy)]
pub struct CommandContext<'a> {
    /// The entity's key.
    pub key: &'a EntityKey,
    /// Whether any persisted event or snapshot has ever been applied.
    pub has_data: bool,
    /// Current time from the runtime's clock.
    pub now: DateTime<Utc>,
}

/// Outcome of [`Entity::decide`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision<E, R> {
    /// Persist this event, then apply it and reply with [`Entity::persisted_reply`].
    Persist(E),
    /// Reply immediately without touching the log.
    Reply(R),
}

/// Domain logic of one kind of event-sourced entity.
///
/// The entity state itself is the implementing type. It is serialized with
/// `bincode` for snapshots.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Commands this entity accepts.
    type Command: Send + 'static;

    /// Events this entity persists.
    type Event: Event + Serialize + DeserializeOwned + Clone;

    /// Replies sent back to callers.
    type Reply: Send + 'static;

    /// Tag attached to every persisted event of this entity kind.
    const TAG: &'static str;

    /// State of an entity with no history.
    fn empty(key: &EntityKey) -> Self;

    /// Turn a command into a decision. Must not change state.
    fn decide(
        &self,
        command: Self::Command,
        ctx: &CommandContext<'_>,
    ) -> Decision<Self::Event, Self::Reply>;

    /// Fold a persisted event into the state. Must be total.
    fn apply(&mut self, event: &Self::Event);

    /// Reply for a command whose event was persisted and applied.
    ///
    /// Called on the state after `event` has been applied.
    fn persisted_reply(&self, event: Self::Event) -> Self::Reply;
}
