//! Entity runtime: hosts one [`Entity`] per key on its own task.
//!
//! Each instance moves through three states:
//!
//! ```text
//! Recovering ──ok──▶ Active ──idle timeout / passivation──▶ Stopping
//!      │                                                       ▲
//!      └──────────────────────failure──────────────────────────┘
//! ```
//!
//! - **Recovering**: wait for any predecessor to terminate, load the latest
//!   snapshot, replay the events after it. Messages queue in the inbox.
//! - **Active**: one message at a time. A command that decides to persist
//!   appends its event, and only after the store acknowledges it is the
//!   event applied and the caller answered. A snapshot timer saves dirty
//!   state; an idle timer stops the instance.
//! - **Stopping**: close the inbox and finish what is already queued. After
//!   a failed recovery the queued messages are answered with
//!   [`RuntimeError::ActivationFailed`] instead.

use crate::config::RuntimeConfig;
use crate::error::{RecoveryError, RuntimeError};
use crate::metrics::EntityMetrics;
use crate::router::{Activation, ActivationContext, InstanceFuture, Router};
use eventkeep_core::entity::{CommandContext, Decision, Entity};
use eventkeep_core::environment::Clock;
use eventkeep_core::event::{Event, SerializedEvent};
use eventkeep_core::event_store::EventStore;
use eventkeep_core::key::{EntityKey, SequenceNr};
use eventkeep_core::snapshot::{Snapshot, SnapshotStore};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

/// Shortest snapshot period; `interval_at` rejects a zero period.
const MIN_SNAPSHOT_INTERVAL: Duration = Duration::from_millis(1);

/// Reply channel for one command.
pub type ReplySender<E> = oneshot::Sender<Result<<E as Entity>::Reply, RuntimeError>>;

/// Message delivered to an entity instance.
pub struct EntityMessage<E: Entity> {
    command: E::Command,
    reply: ReplySender<E>,
}

impl<E: Entity> EntityMessage<E> {
    /// Wrap a command with the channel its reply goes to.
    #[must_use]
    pub const fn new(command: E::Command, reply: ReplySender<E>) -> Self {
        Self { command, reply }
    }

    fn fail(self, error: RuntimeError) {
        let _ = self.reply.send(Err(error));
    }
}

/// Router specialised to entity instances.
pub type EntityRouter<E> = Router<EntityRuntime<E>>;

/// Activation that runs instances of entity `E`.
pub struct EntityRuntime<E: Entity> {
    events: Arc<dyn EventStore>,
    snapshots: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    config: RuntimeConfig,
    entity: PhantomData<fn() -> E>,
}

impl<E: Entity> EntityRuntime<E> {
    /// Create the activation from its stores, clock and configuration.
    #[must_use]
    pub fn new(
        events: Arc<dyn EventStore>,
        snapshots: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            events,
            snapshots,
            clock,
            config,
            entity: PhantomData,
        }
    }

    /// The configuration every instance runs with.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

impl<E: Entity> Activation for EntityRuntime<E> {
    type Message = EntityMessage<E>;

    fn kind(&self) -> &'static str {
        E::TAG
    }

    fn run(&self, ctx: ActivationContext, inbox: mpsc::Receiver<EntityMessage<E>>) -> InstanceFuture {
        let span = tracing::info_span!("entity", kind = E::TAG, entity = %ctx.key());
        let deps = Deps {
            events: Arc::clone(&self.events),
            snapshots: Arc::clone(&self.snapshots),
            clock: Arc::clone(&self.clock),
        };
        Box::pin(run_instance::<E>(deps, self.config.clone(), ctx, inbox).instrument(span))
    }
}

impl<E: Entity> Router<EntityRuntime<E>> {
    /// Create a router hosting entities of type `E`.
    #[must_use]
    pub fn for_entity(
        events: Arc<dyn EventStore>,
        snapshots: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
        config: RuntimeConfig,
    ) -> Self {
        let capacity = config.mailbox_capacity;
        Self::new(EntityRuntime::new(events, snapshots, clock, config), capacity)
    }

    /// Send `command` to the entity `key` and wait for its reply.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::Persist`] if the event was not stored; state is unchanged
    /// - [`RuntimeError::ActivationFailed`] if the instance could not recover
    /// - [`RuntimeError::Router`] if the message could not be delivered
    pub async fn ask(&self, key: &EntityKey, command: E::Command) -> Result<E::Reply, RuntimeError> {
        let (reply, response) = oneshot::channel();
        self.route(key, EntityMessage::new(command, reply)).await?;
        response
            .await
            .map_err(|_| RuntimeError::NoReply(key.clone()))?
    }
}

struct Deps {
    events: Arc<dyn EventStore>,
    snapshots: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
}

/// Live state of one instance.
struct Instance<E: Entity> {
    key: EntityKey,
    state: E,
    sequence_nr: SequenceNr,
    has_data: bool,
    dirty: bool,
    deps: Deps,
}

async fn run_instance<E: Entity>(
    deps: Deps,
    config: RuntimeConfig,
    mut ctx: ActivationContext,
    mut inbox: mpsc::Receiver<EntityMessage<E>>,
) {
    ctx.await_predecessor().await;
    let key = ctx.key().clone();

    let mut instance = match Instance::<E>::recover(key.clone(), deps).await {
        Ok(instance) => instance,
        Err(error) => {
            EntityMetrics::record_recovery_failure(E::TAG);
            tracing::warn!(error = %error, "Recovery failed, rejecting queued messages");
            inbox.close();
            while let Some(message) = inbox.recv().await {
                message.fail(RuntimeError::ActivationFailed {
                    key: key.clone(),
                    reason: error.to_string(),
                });
            }
            return;
        }
    };

    let idle = tokio::time::sleep(config.idle_timeout);
    tokio::pin!(idle);
    let snapshot_interval = config.snapshot_interval.max(MIN_SNAPSHOT_INTERVAL);
    let mut snapshot_tick =
        tokio::time::interval_at(tokio::time::Instant::now() + snapshot_interval, snapshot_interval);
    snapshot_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut passivation = ctx.passivation();

    loop {
        tokio::select! {
            message = inbox.recv() => {
                let Some(message) = message else { break };
                if instance.handle(message).await {
                    idle.as_mut().reset(tokio::time::Instant::now() + config.idle_timeout);
                }
            }
            _ = snapshot_tick.tick() => instance.snapshot_if_dirty().await,
            () = &mut idle => {
                tracing::info!("Entity idle, passivating");
                break;
            }
            () = passivation.requested() => {
                tracing::info!("Passivation requested");
                break;
            }
        }
    }

    inbox.close();
    while let Some(message) = inbox.recv().await {
        instance.handle(message).await;
    }
    EntityMetrics::record_passivation(E::TAG);
    tracing::debug!(sequence_nr = %instance.sequence_nr, "Entity stopped");
}

impl<E: Entity> Instance<E> {
    async fn recover(key: EntityKey, deps: Deps) -> Result<Self, RecoveryError> {
        let started = Instant::now();
        let mut instance = Self {
            state: E::empty(&key),
            key,
            sequence_nr: SequenceNr::INITIAL,
            has_data: false,
            dirty: false,
            deps,
        };

        if let Some(snapshot) = instance.deps.snapshots.load_snapshot(instance.key.clone()).await? {
            instance.state = bincode::deserialize(&snapshot.state)
                .map_err(|e| RecoveryError::Snapshot(e.to_string()))?;
            instance.sequence_nr = snapshot.sequence_nr;
            instance.has_data = true;
        }

        let events = instance
            .deps
            .events
            .load_events(instance.key.clone(), instance.sequence_nr)
            .await?;
        let replayed = events.len();

        for persisted in events {
            if persisted.sequence_nr <= instance.sequence_nr {
                return Err(RecoveryError::OutOfOrder {
                    previous: instance.sequence_nr,
                    found: persisted.sequence_nr,
                });
            }
            let event = E::Event::from_bytes(&persisted.event.data)?;
            instance.state.apply(&event);
            instance.sequence_nr = persisted.sequence_nr;
            instance.has_data = true;
        }

        EntityMetrics::record_recovery(E::TAG, started.elapsed());
        tracing::debug!(
            sequence_nr = %instance.sequence_nr,
            replayed,
            "Entity recovered"
        );
        Ok(instance)
    }

    /// Handle one message. Returns whether it succeeded.
    async fn handle(&mut self, message: EntityMessage<E>) -> bool {
        EntityMetrics::record_command(E::TAG);
        let EntityMessage { command, reply } = message;
        let ctx = CommandContext {
            key: &self.key,
            has_data: self.has_data,
            now: self.deps.clock.now(),
        };

        match self.state.decide(command, &ctx) {
            Decision::Reply(answer) => {
                let _ = reply.send(Ok(answer));
                true
            }
            Decision::Persist(event) => match self.persist(event).await {
                Ok(answer) => {
                    let _ = reply.send(Ok(answer));
                    true
                }
                Err(error) => {
                    EntityMetrics::record_persist_failure(E::TAG);
                    tracing::warn!(error = %error, "Persist failed, state unchanged");
                    let _ = reply.send(Err(error));
                    false
                }
            },
        }
    }

    async fn persist(&mut self, event: E::Event) -> Result<E::Reply, RuntimeError> {
        let started = Instant::now();
        let serialized = SerializedEvent::from_event(&event, None)?.with_tag(E::TAG);
        let sequence_nr = self
            .deps
            .events
            .append_event(self.key.clone(), Some(self.sequence_nr), serialized)
            .await?;

        self.state.apply(&event);
        self.sequence_nr = sequence_nr;
        self.has_data = true;
        self.dirty = true;

        EntityMetrics::record_persist(E::TAG, started.elapsed());
        tracing::debug!(event_type = event.event_type(), sequence_nr = %sequence_nr, "Event persisted");
        Ok(self.state.persisted_reply(event))
    }

    async fn snapshot_if_dirty(&mut self) {
        if !self.dirty {
            return;
        }

        let state = match bincode::serialize(&self.state) {
            Ok(bytes) => bytes,
            Err(error) => {
                EntityMetrics::record_snapshot_failure(E::TAG);
                tracing::warn!(error = %error, "Could not serialize snapshot");
                return;
            }
        };

        let snapshot = Snapshot::new(self.sequence_nr, state);
        match self.deps.snapshots.save_snapshot(self.key.clone(), snapshot).await {
            Ok(()) => {
                self.dirty = false;
                EntityMetrics::record_snapshot(E::TAG);
                tracing::debug!(sequence_nr = %self.sequence_nr, "Snapshot saved");
            }
            Err(error) => {
                EntityMetrics::record_snapshot_failure(E::TAG);
                tracing::warn!(error = %error, "Snapshot failed, retrying on next tick");
            }
        }
    }
}
