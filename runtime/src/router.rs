//! Lazy keyed router: at most one live instance per key.
//!
//! A [`Router`] owns a registry from [`EntityKey`] to the mailbox of the
//! instance serving that key. The first message for a key activates an
//! instance; later messages go to the same mailbox until the instance stops.
//!
//! # Lifecycle
//!
//! ```text
//! route(key) ──▶ registry lookup ──live──▶ mailbox.send(msg)
//!                     │                         │ instance closed its mailbox
//!                     │ missing / closed        ▼
//!                     └────▶ activate ◀──── message bounced back, retry
//! ```
//!
//! Lookup and activation happen under one lock, so two concurrent first
//! messages never create two instances. An instance that is stopping closes
//! its mailbox first; anything sent afterwards bounces back to the router,
//! which activates a successor. The successor receives the predecessor's
//! termination signal and must not touch shared state until it fires, which
//! keeps a single writer per key even across restarts.
//!
//! The router is generic over [`Activation`], the recipe for running one
//! instance. Entity runtimes and read-side workers are both activations.

use crate::error::RouterError;
use crate::metrics::RouterMetrics;
use eventkeep_core::key::EntityKey;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, mpsc, watch};

/// How many times a bounced message is re-routed before giving up.
const MAX_ROUTE_ATTEMPTS: usize = 8;

/// Future driving one instance until it stops.
pub type InstanceFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Recipe for running the instance that serves one key.
pub trait Activation: Send + Sync + 'static {
    /// Messages the instance accepts.
    type Message: Send + 'static;

    /// Short name for logs and metrics (e.g. `"account"`).
    fn kind(&self) -> &'static str;

    /// Build the future that runs one instance.
    ///
    /// The instance owns `inbox`. When it decides to stop it must call
    /// `inbox.close()` and then handle or fail every message still buffered,
    /// so that nothing sent to it is lost.
    fn run(&self, ctx: ActivationContext, inbox: mpsc::Receiver<Self::Message>) -> InstanceFuture;
}

/// What an instance learns from the router when it is activated.
#[derive(Debug)]
pub struct ActivationContext {
    key: EntityKey,
    predecessor: Option<watch::Receiver<bool>>,
    passivate: watch::Receiver<bool>,
}

impl ActivationContext {
    /// The key this instance serves.
    #[must_use]
    pub const fn key(&self) -> &EntityKey {
        &self.key
    }

    /// Wait until the previous instance for this key has terminated.
    ///
    /// Returns immediately if there was none.
    pub async fn await_predecessor(&mut self) {
        if let Some(mut terminated) = self.predecessor.take() {
            // A dropped sender means the predecessor's task is gone too.
            let _ = terminated.wait_for(|done| *done).await;
        }
    }

    /// Signal that resolves once the router asks this instance to stop.
    #[must_use]
    pub fn passivation(&self) -> Passivation {
        Passivation(self.passivate.clone())
    }
}

/// Stop request from the router. See [`ActivationContext::passivation`].
#[derive(Debug, Clone)]
pub struct Passivation(watch::Receiver<bool>);

impl Passivation {
    /// Resolves when a stop was requested or the router is gone.
    pub async fn requested(&mut self) {
        let _ = self.0.wait_for(|stop| *stop).await;
    }
}

struct Slot<M> {
    id: u64,
    sender: mpsc::Sender<M>,
    passivate: watch::Sender<bool>,
    terminated: watch::Receiver<bool>,
}

struct Inner<A: Activation> {
    activation: A,
    registry: Mutex<HashMap<EntityKey, Slot<A::Message>>>,
    next_id: AtomicU64,
    mailbox_capacity: usize,
    shutting_down: AtomicBool,
}

impl<A: Activation> Inner<A> {
    async fn deregister(&self, key: &EntityKey, id: u64) {
        let mut registry = self.registry.lock().await;
        if registry.get(key).is_some_and(|slot| slot.id == id) {
            registry.remove(key);
        }
        RouterMetrics::record_live_instances(self.activation.kind(), registry.len());
    }
}

/// Keyed registry of live instances. Cheap to clone.
pub struct Router<A: Activation> {
    inner: Arc<Inner<A>>,
}

impl<A: Activation> Clone for Router<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: Activation> Router<A> {
    /// Create a router that activates instances with `activation`.
    ///
    /// Every instance gets a bounded inbox of `mailbox_capacity` (at least 1).
    #[must_use]
    pub fn new(activation: A, mailbox_capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                activation,
                registry: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                mailbox_capacity: mailbox_capacity.max(1),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// The activation used for new instances.
    #[must_use]
    pub fn activation(&self) -> &A {
        &self.inner.activation
    }

    /// Deliver `message` to the instance serving `key`, activating one if needed.
    ///
    /// Resolves once the message sits in a live instance's mailbox. Replies,
    /// if any, travel on channels carried inside the message.
    ///
    /// # Errors
    ///
    /// - [`RouterError::ShuttingDown`] after [`Router::shutdown`]
    /// - [`RouterError::Unavailable`] if every activation stopped before
    ///   accepting the message
    pub async fn route(&self, key: &EntityKey, message: A::Message) -> Result<(), RouterError> {
        let kind = self.inner.activation.kind();
        let mut message = message;

        for attempt in 0..MAX_ROUTE_ATTEMPTS {
            let sender = self.live_sender(key).await?;
            match sender.send(message).await {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(bounced)) => {
                    RouterMetrics::record_reroute(kind);
                    tracing::debug!(kind, entity = %key, attempt, "Instance stopped before accepting message, re-routing");
                    message = bounced;
                }
            }
        }

        Err(RouterError::Unavailable {
            key: key.clone(),
            attempts: MAX_ROUTE_ATTEMPTS,
        })
    }

    /// Ask the instance serving `key` to stop.
    ///
    /// The instance finishes the messages already in its mailbox first.
    /// Returns `false` if no instance was registered.
    pub async fn passivate(&self, key: &EntityKey) -> bool {
        let registry = self.inner.registry.lock().await;
        registry.get(key).is_some_and(|slot| {
            slot.passivate.send_replace(true);
            true
        })
    }

    /// Number of registered instances still accepting messages.
    pub async fn live_count(&self) -> usize {
        let registry = self.inner.registry.lock().await;
        registry
            .values()
            .filter(|slot| !slot.sender.is_closed())
            .count()
    }

    /// Whether `key` currently has an instance accepting messages.
    pub async fn is_live(&self, key: &EntityKey) -> bool {
        let registry = self.inner.registry.lock().await;
        registry.get(key).is_some_and(|slot| !slot.sender.is_closed())
    }

    /// Stop every instance and wait for all of them to terminate.
    ///
    /// Later calls to [`Router::route`] fail with [`RouterError::ShuttingDown`].
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::Release);

        let terminations: Vec<watch::Receiver<bool>> = {
            let registry = self.inner.registry.lock().await;
            registry
                .values()
                .map(|slot| {
                    slot.passivate.send_replace(true);
                    slot.terminated.clone()
                })
                .collect()
        };

        for mut terminated in terminations {
            let _ = terminated.wait_for(|done| *done).await;
        }

        tracing::info!(kind = self.inner.activation.kind(), "Router shut down");
    }

    /// Sender of the live instance for `key`, activating one if needed.
    async fn live_sender(&self, key: &EntityKey) -> Result<mpsc::Sender<A::Message>, RouterError> {
        let mut registry = self.inner.registry.lock().await;

        // Under the lock, so nothing registers after `shutdown` collected the registry.
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return Err(RouterError::ShuttingDown);
        }

        if let Some(slot) = registry.get(key) {
            if !slot.sender.is_closed() {
                return Ok(slot.sender.clone());
            }
        }

        // Stale entry: its instance is stopping. The successor waits for it.
        let predecessor = registry.remove(key).map(|stale| stale.terminated);
        let slot = self.activate(key.clone(), predecessor);
        let sender = slot.sender.clone();
        registry.insert(key.clone(), slot);
        RouterMetrics::record_live_instances(self.inner.activation.kind(), registry.len());

        Ok(sender)
    }

    fn activate(&self, key: EntityKey, predecessor: Option<watch::Receiver<bool>>) -> Slot<A::Message> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let kind = self.inner.activation.kind();
        let (sender, inbox) = mpsc::channel(self.inner.mailbox_capacity);
        let (passivate, passivate_rx) = watch::channel(false);
        let (terminated_tx, terminated) = watch::channel(false);

        tracing::debug!(kind, entity = %key, instance = id, waits_for_predecessor = predecessor.is_some(), "Activating instance");
        RouterMetrics::record_activation(kind);

        let ctx = ActivationContext {
            key: key.clone(),
            predecessor,
            passivate: passivate_rx,
        };
        let instance = self.inner.activation.run(ctx, inbox);
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            instance.await;
            inner.deregister(&key, id).await;
            terminated_tx.send_replace(true);
        });

        Slot {
            id,
            sender,
            passivate,
            terminated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;

    /// Echo instance that counts activations and stops on request.
    struct Echo {
        activations: Arc<AtomicUsize>,
    }

    enum EchoMessage {
        Ping(oneshot::Sender<usize>),
        Stop,
    }

    impl Activation for Echo {
        type Message = EchoMessage;

        fn kind(&self) -> &'static str {
            "echo"
        }

        fn run(&self, mut ctx: ActivationContext, mut inbox: mpsc::Receiver<EchoMessage>) -> InstanceFuture {
            let generation = self.activations.fetch_add(1, Ordering::SeqCst) + 1;
            Box::pin(async move {
                ctx.await_predecessor().await;
                let mut passivation = ctx.passivation();
                loop {
                    tokio::select! {
                        msg = inbox.recv() => match msg {
                            Some(EchoMessage::Ping(reply)) => { let _ = reply.send(generation); }
                            Some(EchoMessage::Stop) | None => break,
                        },
                        () = passivation.requested() => break,
                    }
                }
                inbox.close();
                while let Some(msg) = inbox.recv().await {
                    if let EchoMessage::Ping(reply) = msg {
                        let _ = reply.send(generation);
                    }
                }
            })
        }
    }

    fn echo_router() -> (Router<Echo>, Arc<AtomicUsize>) {
        let activations = Arc::new(AtomicUsize::new(0));
        let router = Router::new(
            Echo {
                activations: Arc::clone(&activations),
            },
            8,
        );
        (router, activations)
    }

    #[allow(clippy::unwrap_used)]
    async fn ping(router: &Router<Echo>, key: &EntityKey) -> usize {
        let (tx, rx) = oneshot::channel();
        router.route(key, EchoMessage::Ping(tx)).await.unwrap();
        rx.await.unwrap()
    }

    async fn wait_until_stopped(router: &Router<Echo>, key: &EntityKey) {
        for _ in 0..1_000 {
            if !router.is_live(key).await {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn first_message_activates_and_later_messages_reuse_the_instance() {
        let (router, activations) = echo_router();
        let key = EntityKey::new("a");

        assert_eq!(ping(&router, &key).await, 1);
        assert_eq!(ping(&router, &key).await, 1);
        assert_eq!(activations.load(Ordering::SeqCst), 1);
        assert_eq!(router.live_count().await, 1);
    }

    #[tokio::test]
    async fn keys_get_separate_instances() {
        let (router, activations) = echo_router();

        ping(&router, &EntityKey::new("a")).await;
        ping(&router, &EntityKey::new("b")).await;

        assert_eq!(activations.load(Ordering::SeqCst), 2);
        assert_eq!(router.live_count().await, 2);
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn stopped_instance_is_replaced_on_next_message() {
        let (router, activations) = echo_router();
        let key = EntityKey::new("a");

        ping(&router, &key).await;
        router.route(&key, EchoMessage::Stop).await.unwrap();
        wait_until_stopped(&router, &key).await;

        assert_eq!(ping(&router, &key).await, 2);
        assert_eq!(activations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn passivate_stops_only_the_targeted_instance() {
        let (router, _) = echo_router();
        let a = EntityKey::new("a");
        let b = EntityKey::new("b");

        ping(&router, &a).await;
        ping(&router, &b).await;

        assert!(router.passivate(&a).await);
        assert!(!router.passivate(&EntityKey::new("missing")).await);

        wait_until_stopped(&router, &a).await;
        assert!(!router.is_live(&a).await);
        assert!(router.is_live(&b).await);
    }

    #[tokio::test]
    async fn shutdown_stops_everything_and_rejects_new_messages() {
        let (router, _) = echo_router();
        ping(&router, &EntityKey::new("a")).await;
        ping(&router, &EntityKey::new("b")).await;

        router.shutdown().await;

        assert_eq!(router.live_count().await, 0);
        let (tx, _rx) = oneshot::channel();
        let result = router.route(&EntityKey::new("a"), EchoMessage::Ping(tx)).await;
        assert_eq!(result, Err(RouterError::ShuttingDown));
    }

    #[tokio::test]
    async fn messages_racing_a_stop_are_still_answered() {
        let (router, activations) = echo_router();
        let key = EntityKey::new("a");
        ping(&router, &key).await;

        router.passivate(&key).await;
        for _ in 0..20 {
            // Answered by the draining instance or by its successor.
            assert!(ping(&router, &key).await >= 1);
        }
        assert!(activations.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[allow(clippy::unwrap_used)]
    async fn concurrent_first_messages_activate_once() {
        let (router, activations) = echo_router();
        let key = EntityKey::new("a");

        let pings: Vec<_> = (0..16)
            .map(|_| {
                let router = router.clone();
                let key = key.clone();
                tokio::spawn(async move { ping(&router, &key).await })
            })
            .collect();
        for handle in pings {
            assert_eq!(handle.await.unwrap(), 1);
        }
        assert_eq!(activations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[allow(clippy::unwrap_used)]
    async fn routes_racing_shutdown_leave_no_instance_behind() {
        let (router, _) = echo_router();

        let routes: Vec<_> = (0..8)
            .map(|i| {
                let router = router.clone();
                tokio::spawn(async move {
                    let (tx, _rx) = oneshot::channel();
                    router.route(&EntityKey::new(format!("k{i}")), EchoMessage::Ping(tx)).await
                })
            })
            .collect();
        router.shutdown().await;

        for route in routes {
            let result = route.await.unwrap();
            assert!(matches!(result, Ok(()) | Err(RouterError::ShuttingDown)));
        }
        assert_eq!(router.live_count().await, 0);
    }
}
