//! Read-side projector for Eventkeep.
//!
//! # Overview
//!
//! - **[`Projector`]**: subscribes to a tagged event feed from its checkpoint,
//!   dispatches each envelope to the read worker of its key and commits
//!   offsets in feed order
//! - **Read workers**: one per key, addressed through the same lazy router
//!   the write side uses, applying updates one at a time with retries
//! - **`PostgreSQL`**: checkpoint storage for the read database
//!
//! # CQRS Separation
//!
//! ```text
//! Event Log (Write)  →  events_by_tag  →  Projector  →  Read View
//! ```
//!
//! The projection itself decides how a view row is updated. It must be
//! idempotent: anything not yet checkpointed is delivered again after a
//! restart, so updates are usually gated on the entity's sequence number.

pub mod postgres;
pub mod projector;
pub mod worker;

// Re-export main types for convenience
pub use postgres::PostgresProjectionCheckpoint;
pub use projector::{Projector, ProjectorConfig};
pub use worker::{ReadMessage, ReadWorkers};
