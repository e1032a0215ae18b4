//! # Eventkeep Runtime
//!
//! Runs event-sourced entities: one task per live entity, activated on
//! demand by a keyed [`Router`] and stopped again when idle.
//!
//! ## Core Components
//!
//! - **Router**: lazy registry guaranteeing at most one live instance per key
//! - **Entity runtime**: recovery from snapshot and events, the persist-then-apply
//!   command loop, periodic snapshots and idle passivation
//! - **Retry**: exponential backoff for transient store failures
//! - **Metrics**: Prometheus counters for all of the above
//!
//! ## Example
//!
//! ```ignore
//! use eventkeep_runtime::{EntityRouter, RuntimeConfig};
//!
//! let router: EntityRouter<Account> =
//!     EntityRouter::for_entity(events, snapshots, clock, RuntimeConfig::default());
//!
//! let reply = router.ask(&key, AccountCommand::GetAccount { key: key.clone() }).await?;
//! ```

/// Runtime configuration
pub mod config;

/// Entity instances: recovery, command handling, snapshots, passivation
pub mod entity_runtime;

/// Error types for the runtime and router
pub mod error;

/// Prometheus metrics for observability
pub mod metrics;

/// Retry logic with exponential backoff
pub mod retry;

/// Lazy keyed router
pub mod router;

pub use config::RuntimeConfig;
pub use entity_runtime::{EntityMessage, EntityRouter, EntityRuntime, ReplySender};
pub use error::{RouterError, RuntimeError};
pub use router::{Activation, ActivationContext, InstanceFuture, Passivation, Router};
