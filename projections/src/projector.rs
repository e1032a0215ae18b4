//! `Projector`: drives a [`Projection`] from a tagged event feed.
//!
//! # Overview
//!
//! ```text
//! ┌────────────┐ events_by_tag(tag, checkpoint)
//! │ Event Feed │──────────────────────────────┐
//! └────────────┘                              ▼
//!                                   ┌──────────────────┐ route(key)  ┌─────────────┐
//!                                   │    Projector     │────────────▶│ read worker │──▶ view
//!                                   │ (≤ N in flight)  │◀────ack─────│  (per key)  │
//!                                   └────────┬─────────┘             └─────────────┘
//!                                            │ every M acks
//!                                            ▼
//!                                     ┌────────────┐
//!                                     │ Checkpoint │
//!                                     └────────────┘
//! ```
//!
//! Envelopes are dispatched to workers strictly in feed order. Up to
//! `parallelism` acknowledgements are awaited at once, but offsets are
//! committed in feed order, so the checkpoint never passes an envelope whose
//! update has not completed. Delivery is at-least-once: whatever was in flight
//! or not yet checkpointed when the projector stopped is delivered again.
//!
//! # Example
//!
//! ```ignore
//! use eventkeep_projections::{Projector, ProjectorConfig};
//!
//! let (mut projector, shutdown) = Projector::new(
//!     projection,
//!     feed,
//!     checkpoint,
//!     "account",
//!     ProjectorConfig::default(),
//! );
//!
//! tokio::spawn(async move {
//!     tokio::signal::ctrl_c().await.ok();
//!     shutdown.send(true).ok();
//! });
//!
//! let offset = projector.run().await?;
//! ```

use crate::worker::{ReadMessage, ReadWorkers};
use chrono::Utc;
use eventkeep_core::event_feed::{EventEnvelope, EventFeed, FeedError};
use eventkeep_core::projection::{
    Ack, EventPosition, Projection, ProjectionCheckpoint, ProjectionError, Result,
};
use eventkeep_runtime::metrics::ProjectionMetrics;
use eventkeep_runtime::retry::RetryPolicy;
use eventkeep_runtime::{Router, RouterError};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};

/// Projector settings.
#[derive(Debug, Clone)]
pub struct ProjectorConfig {
    /// Maximum number of envelopes awaiting their ack at once.
    pub parallelism: usize,
    /// Save the checkpoint after this many committed envelopes.
    pub checkpoint_interval: u64,
    /// A read worker stops after this long without an envelope.
    pub worker_idle_timeout: Duration,
    /// Retries for a failed view update.
    pub retry_policy: RetryPolicy,
    /// Inbox size of each read worker.
    pub mailbox_capacity: usize,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            parallelism: 5,
            checkpoint_interval: 100,
            worker_idle_timeout: Duration::from_secs(10),
            retry_policy: RetryPolicy::default(),
            mailbox_capacity: 32,
        }
    }
}

impl ProjectorConfig {
    /// Set the number of envelopes in flight
    #[must_use]
    pub const fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Set the checkpoint save interval
    #[must_use]
    pub const fn with_checkpoint_interval(mut self, interval: u64) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    /// Set the read worker idle timeout
    #[must_use]
    pub const fn with_worker_idle_timeout(mut self, timeout: Duration) -> Self {
        self.worker_idle_timeout = timeout;
        self
    }

    /// Set the retry policy for view updates
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the read worker inbox size
    #[must_use]
    pub const fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }
}

/// Consumes a tagged feed into a projection with checkpointed progress.
pub struct Projector<P: Projection> {
    projection: Arc<P>,
    feed: Arc<dyn EventFeed>,
    checkpoint: Arc<dyn ProjectionCheckpoint>,
    tag: String,
    config: ProjectorConfig,
    shutdown: watch::Receiver<bool>,
}

impl<P: Projection> Projector<P> {
    /// Create a projector for the events tagged `tag`.
    ///
    /// Returns the projector and a shutdown sender. Send `true` to stop
    /// [`Projector::run`] gracefully.
    #[must_use]
    pub fn new(
        projection: P,
        feed: Arc<dyn EventFeed>,
        checkpoint: Arc<dyn ProjectionCheckpoint>,
        tag: impl Into<String>,
        config: ProjectorConfig,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let projector = Self {
            projection: Arc::new(projection),
            feed,
            checkpoint,
            tag: tag.into(),
            config,
            shutdown: shutdown_rx,
        };
        (projector, shutdown_tx)
    }

    /// The projection being driven.
    #[must_use]
    pub fn projection(&self) -> &P {
        &self.projection
    }

    /// Process the feed until shutdown, the end of the feed, or a failure.
    ///
    /// Resumes after the saved checkpoint (or from the beginning if there is
    /// none). Returns the last committed offset.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] if the checkpoint cannot be loaded, the
    /// feed fails, or a view update fails after all retries. The checkpoint
    /// is saved up to the last envelope before the failure.
    #[allow(clippy::cognitive_complexity)]
    pub async fn run(&mut self) -> Result<u64> {
        let name = self.projection.name().to_string();
        let start = match self.checkpoint.load_position(&name).await? {
            Some(position) => {
                tracing::info!(
                    projection = %name,
                    offset = position.offset,
                    timestamp = %position.timestamp,
                    "Resuming from checkpoint"
                );
                position.offset
            }
            None => {
                tracing::info!(projection = %name, tag = %self.tag, "Starting from beginning");
                0
            }
        };

        let feed = self
            .feed
            .events_by_tag(&self.tag, start)
            .await
            .map_err(feed_error)?;

        let workers = Router::new(
            ReadWorkers::new(
                Arc::clone(&self.projection),
                self.config.worker_idle_timeout,
                self.config.retry_policy.clone(),
            ),
            self.config.mailbox_capacity,
        );

        let dispatcher = workers.clone();
        let projection = Arc::clone(&self.projection);
        let mut acks = Box::pin(feed
            .then(move |item| dispatch(dispatcher.clone(), Arc::clone(&projection), item))
            .map(|dispatched| async move {
                let (offset, ack) = dispatched?;
                let outcome = ack.await.map_err(|_| {
                    ProjectionError::EventProcessing(format!("read worker dropped offset {offset}"))
                })??;
                Ok::<_, ProjectionError>((offset, outcome))
            })
            .buffered(self.config.parallelism.max(1)));

        let stop = stop_requested(self.shutdown.clone());
        tokio::pin!(stop);

        let mut committed = start;
        let mut saved = start;
        let interval = self.config.checkpoint_interval.max(1);
        let mut uncheckpointed = 0_u64;

        let outcome = loop {
            tokio::select! {
                biased;
                () = &mut stop => {
                    tracing::info!(projection = %name, "Shutdown signal received");
                    break Ok(());
                }
                next = acks.next() => match next {
                    Some(Ok((offset, ack))) => {
                        ProjectionMetrics::record_ack(&name, ack_label(ack));
                        committed = offset;
                        uncheckpointed += 1;
                        if uncheckpointed >= interval && self.save(&name, committed).await {
                            saved = committed;
                            uncheckpointed = 0;
                        }
                    }
                    Some(Err(error)) => {
                        tracing::error!(projection = %name, committed, error = %error, "Projection failed, stopping");
                        break Err(error);
                    }
                    None => {
                        tracing::info!(projection = %name, "Event feed ended");
                        break Ok(());
                    }
                },
            }
        };

        // Drops anything still in flight; it is re-delivered on restart.
        drop(acks);
        if committed != saved {
            self.save(&name, committed).await;
        }
        workers.shutdown().await;

        tracing::info!(projection = %name, offset = committed, "Projector stopped");
        outcome.map(|()| committed)
    }

    /// Clear the view and reset the checkpoint to the beginning.
    ///
    /// The next [`Projector::run`] replays the whole feed.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError`] if the view cannot be cleared or the
    /// checkpoint cannot be reset.
    pub async fn rebuild(&self) -> Result<()> {
        let name = self.projection.name();
        tracing::info!(projection = name, "Rebuilding projection");

        self.projection.rebuild().await?;
        self.checkpoint
            .save_position(name, EventPosition::beginning())
            .await?;

        tracing::info!(projection = name, "Projection rebuilt - run again to replay events");
        Ok(())
    }

    /// Save `offset`. A failure is logged and retried on the next interval.
    async fn save(&self, name: &str, offset: u64) -> bool {
        match self
            .checkpoint
            .save_position(name, EventPosition::new(offset, Utc::now()))
            .await
        {
            Ok(()) => {
                ProjectionMetrics::record_checkpoint(name, offset);
                tracing::debug!(projection = name, offset, "Checkpoint saved");
                true
            }
            Err(error) => {
                tracing::warn!(projection = name, offset, error = %error, "Checkpoint save failed");
                false
            }
        }
    }
}

type Dispatched = Result<(u64, oneshot::Receiver<Result<Ack>>)>;

/// Route one feed item to its read worker.
async fn dispatch<P: Projection>(
    workers: Router<ReadWorkers<P>>,
    projection: Arc<P>,
    item: std::result::Result<EventEnvelope, FeedError>,
) -> Dispatched {
    let envelope = item.map_err(feed_error)?;
    let key = projection.route_key(&envelope);
    let offset = envelope.offset;
    let (reply, ack) = oneshot::channel();

    workers
        .route(&key, ReadMessage::new(Arc::new(envelope), reply))
        .await
        .map_err(|error: RouterError| {
            ProjectionError::EventProcessing(format!("cannot reach read worker for {key}: {error}"))
        })?;
    Ok((offset, ack))
}

async fn stop_requested(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        // Sender gone: nobody can ask us to stop any more.
        std::future::pending::<()>().await;
    }
}

fn feed_error(error: FeedError) -> ProjectionError {
    ProjectionError::EventProcessing(format!("event feed: {error}"))
}

const fn ack_label(ack: Ack) -> &'static str {
    match ack {
        Ack::Processed => "processed",
        Ack::Duplicate => "duplicate",
        Ack::NotProcessed => "not_processed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ProjectorConfig::default();
        assert_eq!(config.parallelism, 5);
        assert_eq!(config.checkpoint_interval, 100);
        assert_eq!(config.worker_idle_timeout, Duration::from_secs(10));
    }

    #[test]
    fn builders_override_single_fields() {
        let config = ProjectorConfig::default()
            .with_parallelism(2)
            .with_checkpoint_interval(10)
            .with_retry_policy(RetryPolicy::no_retry());
        assert_eq!(config.parallelism, 2);
        assert_eq!(config.checkpoint_interval, 10);
        assert_eq!(config.retry_policy.max_retries, 0);
        assert_eq!(config.mailbox_capacity, 32);
    }

    #[test]
    fn ack_labels() {
        assert_eq!(ack_label(Ack::Processed), "processed");
        assert_eq!(ack_label(Ack::NotProcessed), "not_processed");
    }
}
