//! Per-key read workers.
//!
//! A read worker applies the feed envelopes of one routing key to the view,
//! one at a time, so updates for a key never race each other. Workers are
//! addressed through a [`Router`](eventkeep_runtime::Router) like entities
//! are, but own no event log: all state lives in the view.
//!
//! A failed update is retried with the configured [`RetryPolicy`]. Once the
//! retries are exhausted the worker answers the failure and refuses every
//! later envelope until it is stopped, so no later update for the key can
//! land before the failed one is replayed.

use eventkeep_core::event_feed::EventEnvelope;
use eventkeep_core::projection::{Ack, Projection, ProjectionError, Result};
use eventkeep_runtime::retry::{RetryPolicy, retry_with_predicate};
use eventkeep_runtime::{Activation, ActivationContext, InstanceFuture};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

/// One envelope for a read worker, with the channel its ack goes to.
#[derive(Debug)]
pub struct ReadMessage {
    envelope: Arc<EventEnvelope>,
    reply: oneshot::Sender<Result<Ack>>,
}

impl ReadMessage {
    /// Wrap an envelope with its ack channel.
    #[must_use]
    pub const fn new(envelope: Arc<EventEnvelope>, reply: oneshot::Sender<Result<Ack>>) -> Self {
        Self { envelope, reply }
    }
}

/// Activation running read workers for projection `P`.
pub struct ReadWorkers<P: Projection> {
    projection: Arc<P>,
    idle_timeout: Duration,
    retry_policy: RetryPolicy,
}

impl<P: Projection> ReadWorkers<P> {
    /// Workers that stop after `idle_timeout` without an envelope.
    #[must_use]
    pub const fn new(projection: Arc<P>, idle_timeout: Duration, retry_policy: RetryPolicy) -> Self {
        Self {
            projection,
            idle_timeout,
            retry_policy,
        }
    }
}

impl<P: Projection> Activation for ReadWorkers<P> {
    type Message = ReadMessage;

    fn kind(&self) -> &'static str {
        "read_worker"
    }

    fn run(&self, ctx: ActivationContext, inbox: mpsc::Receiver<ReadMessage>) -> InstanceFuture {
        let span = tracing::info_span!(
            "read_worker",
            projection = self.projection.name(),
            entity = %ctx.key()
        );
        Box::pin(
            run_worker(
                Arc::clone(&self.projection),
                self.idle_timeout,
                self.retry_policy.clone(),
                ctx,
                inbox,
            )
            .instrument(span),
        )
    }
}

async fn run_worker<P: Projection>(
    projection: Arc<P>,
    idle_timeout: Duration,
    retry_policy: RetryPolicy,
    mut ctx: ActivationContext,
    mut inbox: mpsc::Receiver<ReadMessage>,
) {
    ctx.await_predecessor().await;
    let mut passivation = ctx.passivation();
    let mut worker = Worker {
        projection,
        retry_policy,
        failed: false,
    };

    loop {
        tokio::select! {
            received = tokio::time::timeout(idle_timeout, inbox.recv()) => match received {
                Ok(Some(message)) => worker.handle(message).await,
                Ok(None) => break,
                Err(_) => {
                    tracing::debug!("Read worker idle, stopping");
                    break;
                }
            },
            () = passivation.requested() => break,
        }
    }

    inbox.close();
    while let Some(message) = inbox.recv().await {
        worker.handle(message).await;
    }
}

struct Worker<P> {
    projection: Arc<P>,
    retry_policy: RetryPolicy,
    /// Set once an update failed for good. Later envelopes for the key are
    /// refused so none of them can overtake the failed one.
    failed: bool,
}

impl<P: Projection> Worker<P> {
    async fn handle(&mut self, message: ReadMessage) {
        let ReadMessage { envelope, reply } = message;

        if self.failed {
            let _ = reply.send(Err(ProjectionError::EventProcessing(format!(
                "read worker refused offset {} after an earlier failure",
                envelope.offset
            ))));
            return;
        }

        let result = apply(self.projection.as_ref(), &self.retry_policy, &envelope).await;
        if let Err(error) = &result {
            self.failed = true;
            tracing::error!(
                offset = envelope.offset,
                sequence_nr = %envelope.sequence_nr,
                event_type = %envelope.event.event_type,
                error = %error,
                "Read-side update failed"
            );
        }
        let _ = reply.send(result);
    }
}

/// Apply one envelope, retrying failures the policy allows.
async fn apply<P: Projection>(projection: &P, policy: &RetryPolicy, envelope: &EventEnvelope) -> Result<Ack> {
    retry_with_predicate(
        policy,
        move || projection.apply_event(envelope),
        |error| !matches!(error, ProjectionError::Serialization(_)),
    )
    .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use eventkeep_core::event::SerializedEvent;
    use eventkeep_core::key::{EntityKey, SequenceNr};
    use eventkeep_runtime::Router;
    use eventkeep_testing::RecordingProjection;

    fn envelope(offset: u64) -> Arc<EventEnvelope> {
        Arc::new(EventEnvelope {
            offset,
            key: EntityKey::new("100"),
            sequence_nr: SequenceNr::new(offset),
            event: SerializedEvent::new("Deposited.v1".to_string(), vec![], None),
        })
    }

    fn quick_retries(max_retries: usize) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .initial_delay(Duration::from_millis(1))
            .jitter(false)
            .build()
    }

    async fn send(router: &Router<ReadWorkers<RecordingProjection>>, offset: u64) -> Result<Ack> {
        let (reply, ack) = oneshot::channel();
        router
            .route(&EntityKey::new("100"), ReadMessage::new(envelope(offset), reply))
            .await
            .unwrap();
        ack.await.unwrap()
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let projection = RecordingProjection::new("audit", &["Deposited.v1"]);
        projection.fail_next_applies(2);
        let router = Router::new(
            ReadWorkers::new(Arc::new(projection.clone()), Duration::from_secs(10), quick_retries(3)),
            8,
        );

        assert_eq!(send(&router, 1).await.unwrap(), Ack::Processed);
        assert_eq!(projection.applied_offsets(), vec![1]);
    }

    #[tokio::test]
    async fn exhausted_retries_refuse_later_envelopes() {
        let projection = RecordingProjection::new("audit", &["Deposited.v1"]);
        projection.fail_next_applies(2);
        let router = Router::new(
            ReadWorkers::new(Arc::new(projection.clone()), Duration::from_secs(10), quick_retries(1)),
            8,
        );

        assert!(send(&router, 1).await.is_err());
        // The projection would accept this one, but it must not overtake offset 1.
        assert!(send(&router, 2).await.is_err());
        assert!(projection.applied().is_empty());

        router.shutdown().await;
    }

    #[tokio::test]
    async fn idle_workers_stop() {
        let projection = RecordingProjection::new("audit", &["Deposited.v1"]);
        let router = Router::new(
            ReadWorkers::new(Arc::new(projection), Duration::from_millis(20), RetryPolicy::no_retry()),
            8,
        );

        assert_eq!(send(&router, 1).await.unwrap(), Ack::Processed);
        for _ in 0..100 {
            if router.live_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(router.live_count().await, 0);
    }
}
