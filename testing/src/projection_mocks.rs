//! In-memory projection testing utilities
//!
//! - [`InMemoryProjectionCheckpoint`]: checkpoint tracking with failure injection
//! - [`RecordingProjection`]: a projection that records what it was asked to apply

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity

use eventkeep_core::event_feed::EventEnvelope;
use eventkeep_core::projection::{
    Ack, EventPosition, Projection, ProjectionCheckpoint, ProjectionError, Result,
};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

/// In-memory checkpoint tracking for testing projection resumption.
///
/// # Example
///
/// ```
/// use eventkeep_testing::InMemoryProjectionCheckpoint;
/// use eventkeep_core::projection::{EventPosition, ProjectionCheckpoint};
/// use chrono::Utc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let checkpoint = InMemoryProjectionCheckpoint::new();
///
/// let position = EventPosition::new(42, Utc::now());
/// checkpoint.save_position("balances", position).await?;
///
/// assert_eq!(checkpoint.load_position("balances").await?, Some(position));
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryProjectionCheckpoint {
    positions: Arc<RwLock<HashMap<String, EventPosition>>>,
    failing_saves: Arc<RwLock<usize>>,
}

impl InMemoryProjectionCheckpoint {
    /// Create a new empty checkpoint tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` saves fail.
    pub fn fail_next_saves(&self, n: usize) {
        *self.failing_saves.write().unwrap() = n;
    }

    /// Last saved offset of `projection_name`, `0` if none.
    #[must_use]
    pub fn offset(&self, projection_name: &str) -> u64 {
        self.positions
            .read()
            .unwrap()
            .get(projection_name)
            .map_or(0, |position| position.offset)
    }

    /// Forget all checkpoints.
    pub fn clear(&self) {
        self.positions.write().unwrap().clear();
    }
}

impl ProjectionCheckpoint for InMemoryProjectionCheckpoint {
    fn save_position(
        &self,
        projection_name: &str,
        position: EventPosition,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let projection_name = projection_name.to_string();
        Box::pin(async move {
            {
                let mut failing = self.failing_saves.write().unwrap();
                if *failing > 0 {
                    *failing -= 1;
                    return Err(ProjectionError::Checkpoint("injected save failure".into()));
                }
            }
            self.positions
                .write()
                .unwrap()
                .insert(projection_name, position);
            Ok(())
        })
    }

    fn load_position(
        &self,
        projection_name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<EventPosition>>> + Send + '_>> {
        let projection_name = projection_name.to_string();
        Box::pin(async move { Ok(self.positions.read().unwrap().get(&projection_name).copied()) })
    }
}

/// Projection that records every envelope it applies.
///
/// Answers [`Ack::Processed`] for envelopes whose event type is in the
/// accepted list, [`Ack::NotProcessed`] otherwise. Failures can be injected
/// to drive retry and stop paths.
///
/// # Example
///
/// ```
/// use eventkeep_testing::RecordingProjection;
///
/// let projection = RecordingProjection::new("audit", &["Deposited.v1"]);
/// assert!(projection.applied().is_empty());
/// ```
#[derive(Clone, Debug)]
pub struct RecordingProjection {
    name: String,
    accepted: Vec<String>,
    applied: Arc<RwLock<Vec<EventEnvelope>>>,
    failing_applies: Arc<RwLock<usize>>,
}

impl RecordingProjection {
    /// Create a projection accepting the given event types.
    #[must_use]
    pub fn new(name: &str, accepted: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            accepted: accepted.iter().map(ToString::to_string).collect(),
            applied: Arc::new(RwLock::new(Vec::new())),
            failing_applies: Arc::new(RwLock::new(0)),
        }
    }

    /// Make the next `n` applies fail with a storage error.
    pub fn fail_next_applies(&self, n: usize) {
        *self.failing_applies.write().unwrap() = n;
    }

    /// Envelopes applied so far, in application order.
    #[must_use]
    pub fn applied(&self) -> Vec<EventEnvelope> {
        self.applied.read().unwrap().clone()
    }

    /// Offsets applied so far, in application order.
    #[must_use]
    pub fn applied_offsets(&self) -> Vec<u64> {
        self.applied.read().unwrap().iter().map(|e| e.offset).collect()
    }
}

impl Projection for RecordingProjection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn apply_event(&self, envelope: &EventEnvelope) -> Result<Ack> {
        {
            let mut failing = self.failing_applies.write().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(ProjectionError::Storage("injected apply failure".into()));
            }
        }

        if !self.accepted.iter().any(|t| *t == envelope.event.event_type) {
            return Ok(Ack::NotProcessed);
        }
        self.applied.write().unwrap().push(envelope.clone());
        Ok(Ack::Processed)
    }

    async fn rebuild(&self) -> Result<()> {
        self.applied.write().unwrap().clear();
        Ok(())
    }
}
