//! In-memory event log, snapshot store and event feed.
//!
//! One [`InMemoryEventStore`] plays all three storage roles so that tests see
//! a single consistent log: an append is immediately visible to recovery and
//! to every live feed subscription.
//!
//! Failures can be injected per operation to exercise the error paths of the
//! runtime and the projector.

#![allow(clippy::unwrap_used)] // Lock poisoning only happens after a panicking test

use eventkeep_core::event::{PersistedEvent, SerializedEvent};
use eventkeep_core::event_feed::{EventEnvelope, EventFeed, EventFeedStream, FeedError};
use eventkeep_core::event_store::{EventStore, EventStoreError};
use eventkeep_core::key::{EntityKey, SequenceNr};
use eventkeep_core::snapshot::{Snapshot, SnapshotStore};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

#[derive(Default)]
struct State {
    streams: HashMap<EntityKey, Vec<PersistedEvent>>,
    snapshots: HashMap<EntityKey, Snapshot>,
    /// Every appended event in append order; offset = index + 1.
    journal: Vec<EventEnvelope>,
    failing_appends: usize,
    failing_loads: usize,
    failing_snapshots: usize,
}

impl State {
    fn record(&mut self, persisted: PersistedEvent) -> u64 {
        let offset = self.journal.len() as u64 + 1;
        self.journal.push(EventEnvelope {
            offset,
            key: persisted.key.clone(),
            sequence_nr: persisted.sequence_nr,
            event: persisted.event.clone(),
        });
        self.streams
            .entry(persisted.key.clone())
            .or_default()
            .push(persisted);
        offset
    }

    /// Envelopes tagged `tag` after journal position `cursor`, and the new cursor.
    fn tagged_after(&self, tag: &str, cursor: u64) -> (Vec<EventEnvelope>, u64) {
        let start = usize::try_from(cursor).unwrap_or(usize::MAX);
        let batch = self
            .journal
            .get(start..)
            .unwrap_or_default()
            .iter()
            .filter(|envelope| envelope.event.has_tag(tag))
            .cloned()
            .collect();
        (batch, cursor.max(self.journal.len() as u64))
    }
}

struct Inner {
    state: RwLock<State>,
    /// Carries the journal length; bumped on every append.
    appended: watch::Sender<u64>,
}

/// In-memory implementation of [`EventStore`], [`SnapshotStore`] and [`EventFeed`].
///
/// Cheap to clone; clones share the same log.
///
/// # Example
///
/// ```
/// use eventkeep_testing::InMemoryEventStore;
/// use eventkeep_core::event::SerializedEvent;
/// use eventkeep_core::event_store::EventStore;
/// use eventkeep_core::key::{EntityKey, SequenceNr};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = InMemoryEventStore::new();
/// let key = EntityKey::new("100");
/// let event = SerializedEvent::new("Deposited.v1".into(), vec![1, 2, 3], None);
///
/// let seq = store.append_event(key.clone(), Some(SequenceNr::INITIAL), event).await?;
/// assert_eq!(seq, SequenceNr::new(1));
/// assert_eq!(store.events(&key).len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryEventStore {
    inner: Arc<Inner>,
}

impl InMemoryEventStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State::default()),
                appended,
            }),
        }
    }

    /// Make the next `n` appends fail with a database error.
    pub fn fail_next_appends(&self, n: usize) {
        self.inner.state.write().unwrap().failing_appends = n;
    }

    /// Make the next `n` event loads fail with a database error.
    pub fn fail_next_loads(&self, n: usize) {
        self.inner.state.write().unwrap().failing_loads = n;
    }

    /// Make the next `n` snapshot saves fail with a database error.
    pub fn fail_next_snapshots(&self, n: usize) {
        self.inner.state.write().unwrap().failing_snapshots = n;
    }

    /// All events persisted for `key`, in sequence order.
    #[must_use]
    pub fn events(&self, key: &EntityKey) -> Vec<PersistedEvent> {
        self.inner
            .state
            .read()
            .unwrap()
            .streams
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// The latest snapshot saved for `key`.
    #[must_use]
    pub fn snapshot(&self, key: &EntityKey) -> Option<Snapshot> {
        self.inner.state.read().unwrap().snapshots.get(key).cloned()
    }

    /// Forget every snapshot, forcing full replays.
    pub fn clear_snapshots(&self) {
        self.inner.state.write().unwrap().snapshots.clear();
    }

    /// Number of events in the log across all keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.read().unwrap().journal.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write a record without any sequence checks.
    ///
    /// Lets tests plant corrupt streams or foreign event types. Returns the
    /// feed offset the record received.
    pub fn insert_unchecked(&self, persisted: PersistedEvent) -> u64 {
        let offset = self.inner.state.write().unwrap().record(persisted);
        self.inner.appended.send_replace(offset);
        offset
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventStore")
            .field("events", &self.len())
            .finish_non_exhaustive()
    }
}

fn take_failure(counter: &mut usize) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

impl EventStore for InMemoryEventStore {
    fn append_event(
        &self,
        key: EntityKey,
        expected: Option<SequenceNr>,
        event: SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<SequenceNr, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            let (sequence_nr, offset) = {
                let mut state = self.inner.state.write().unwrap();
                if take_failure(&mut state.failing_appends) {
                    return Err(EventStoreError::DatabaseError("injected append failure".into()));
                }

                let current = state
                    .streams
                    .get(&key)
                    .and_then(|stream| stream.last())
                    .map_or(SequenceNr::INITIAL, |last| last.sequence_nr);

                if let Some(expected) = expected {
                    if expected != current {
                        return Err(EventStoreError::ConcurrencyConflict {
                            key,
                            expected,
                            actual: current,
                        });
                    }
                }

                let sequence_nr = current.next();
                let offset = state.record(PersistedEvent {
                    key,
                    sequence_nr,
                    event,
                });
                (sequence_nr, offset)
            };

            self.inner.appended.send_replace(offset);
            Ok(sequence_nr)
        })
    }

    fn load_events(
        &self,
        key: EntityKey,
        after: SequenceNr,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PersistedEvent>, EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.inner.state.write().unwrap();
            if take_failure(&mut state.failing_loads) {
                return Err(EventStoreError::DatabaseError("injected load failure".into()));
            }

            Ok(state
                .streams
                .get(&key)
                .map(|stream| {
                    stream
                        .iter()
                        .filter(|persisted| persisted.sequence_nr > after)
                        .cloned()
                        .collect()
                })
                .unwrap_or_default())
        })
    }
}

impl SnapshotStore for InMemoryEventStore {
    fn save_snapshot(
        &self,
        key: EntityKey,
        snapshot: Snapshot,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventStoreError>> + Send + '_>> {
        Box::pin(async move {
            let mut state = self.inner.state.write().unwrap();
            if take_failure(&mut state.failing_snapshots) {
                return Err(EventStoreError::DatabaseError("injected snapshot failure".into()));
            }
            state.snapshots.insert(key, snapshot);
            Ok(())
        })
    }

    fn load_snapshot(
        &self,
        key: EntityKey,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Snapshot>, EventStoreError>> + Send + '_>> {
        Box::pin(async move { Ok(self.inner.state.read().unwrap().snapshots.get(&key).cloned()) })
    }
}

impl EventFeed for InMemoryEventStore {
    fn events_by_tag(
        &self,
        tag: &str,
        after_offset: u64,
    ) -> Pin<Box<dyn Future<Output = Result<EventFeedStream, FeedError>> + Send + '_>> {
        let inner = Arc::clone(&self.inner);
        let tag = tag.to_string();

        Box::pin(async move {
            let mut appended = inner.appended.subscribe();
            let stream = async_stream::stream! {
                let mut cursor = after_offset;
                loop {
                    // Mark seen before reading so an append racing this scan wakes us.
                    appended.borrow_and_update();
                    let (batch, next) = inner.state.read().unwrap().tagged_after(&tag, cursor);
                    cursor = next;
                    for envelope in batch {
                        yield Ok(envelope);
                    }
                    if appended.changed().await.is_err() {
                        break;
                    }
                }
            };
            Ok(Box::pin(stream) as EventFeedStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn event(event_type: &str) -> SerializedEvent {
        SerializedEvent::new(event_type.to_string(), vec![0], None).with_tag("account")
    }

    #[tokio::test]
    async fn append_checks_the_expected_sequence() {
        let store = InMemoryEventStore::new();
        let key = EntityKey::new("100");

        let first = store
            .append_event(key.clone(), Some(SequenceNr::INITIAL), event("A"))
            .await
            .expect("first append");
        assert_eq!(first, SequenceNr::new(1));

        let conflict = store
            .append_event(key.clone(), Some(SequenceNr::INITIAL), event("B"))
            .await;
        assert!(matches!(
            conflict,
            Err(EventStoreError::ConcurrencyConflict { actual, .. }) if actual == SequenceNr::new(1)
        ));

        let unchecked = store
            .append_event(key.clone(), None, event("C"))
            .await
            .expect("unchecked append");
        assert_eq!(unchecked, SequenceNr::new(2));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_one_by_one() {
        let store = InMemoryEventStore::new();
        let key = EntityKey::new("100");
        store.fail_next_appends(1);

        assert!(store.append_event(key.clone(), None, event("A")).await.is_err());
        assert!(store.append_event(key.clone(), None, event("A")).await.is_ok());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn feed_skips_other_tags_and_follows_new_appends() {
        let store = InMemoryEventStore::new();
        let key = EntityKey::new("100");
        store
            .append_event(key.clone(), None, event("A"))
            .await
            .expect("append");
        store
            .append_event(
                EntityKey::new("other"),
                None,
                SerializedEvent::new("X".into(), vec![], None).with_tag("order"),
            )
            .await
            .expect("append");

        let mut feed = store.events_by_tag("account", 0).await.expect("subscribe");
        let first = feed.next().await.expect("item").expect("envelope");
        assert_eq!(first.offset, 1);

        store
            .append_event(key.clone(), None, event("B"))
            .await
            .expect("append");
        let second = feed.next().await.expect("item").expect("envelope");
        assert_eq!(second.offset, 3);
        assert_eq!(second.sequence_nr, SequenceNr::new(2));
    }
}
