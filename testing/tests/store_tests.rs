//! Tests for the in-memory stores and projection mocks

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use chrono::Utc;
use eventkeep_core::event::{PersistedEvent, SerializedEvent};
use eventkeep_core::event_feed::{EventEnvelope, EventFeed};
use eventkeep_core::event_store::EventStore;
use eventkeep_core::key::{EntityKey, SequenceNr};
use eventkeep_core::projection::{Ack, EventPosition, Projection, ProjectionCheckpoint};
use eventkeep_core::snapshot::{Snapshot, SnapshotStore};
use eventkeep_testing::{InMemoryEventStore, InMemoryProjectionCheckpoint, RecordingProjection};
use futures::StreamExt;

fn deposited() -> SerializedEvent {
    SerializedEvent::new("Deposited.v1".to_string(), vec![7], None).with_tag("account")
}

#[tokio::test]
async fn load_events_is_exclusive_of_the_given_sequence() {
    let store = InMemoryEventStore::new();
    let key = EntityKey::new("100");
    for _ in 0..3 {
        store.append_event(key.clone(), None, deposited()).await.unwrap();
    }

    let all = store.load_events(key.clone(), SequenceNr::INITIAL).await.unwrap();
    assert_eq!(all.len(), 3);

    let tail = store.load_events(key.clone(), SequenceNr::new(2)).await.unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].sequence_nr, SequenceNr::new(3));

    let missing = store.load_events(EntityKey::new("nobody"), SequenceNr::INITIAL).await.unwrap();
    assert!(missing.is_empty());
}

#[tokio::test]
async fn failing_loads_do_not_affect_appends() {
    let store = InMemoryEventStore::new();
    let key = EntityKey::new("100");
    store.fail_next_loads(1);

    store.append_event(key.clone(), None, deposited()).await.unwrap();
    assert!(store.load_events(key.clone(), SequenceNr::INITIAL).await.is_err());
    assert_eq!(store.load_events(key, SequenceNr::INITIAL).await.unwrap().len(), 1);
}

#[tokio::test]
async fn latest_snapshot_wins() {
    let store = InMemoryEventStore::new();
    let key = EntityKey::new("100");

    assert!(store.load_snapshot(key.clone()).await.unwrap().is_none());
    store.save_snapshot(key.clone(), Snapshot::new(SequenceNr::new(1), vec![1])).await.unwrap();
    store.save_snapshot(key.clone(), Snapshot::new(SequenceNr::new(4), vec![4])).await.unwrap();

    let latest = store.load_snapshot(key.clone()).await.unwrap().expect("snapshot");
    assert_eq!(latest.sequence_nr, SequenceNr::new(4));

    store.fail_next_snapshots(1);
    assert!(store.save_snapshot(key.clone(), Snapshot::new(SequenceNr::new(5), vec![])).await.is_err());
    assert_eq!(store.snapshot(&key).expect("kept").sequence_nr, SequenceNr::new(4));

    store.clear_snapshots();
    assert!(store.snapshot(&key).is_none());
}

#[tokio::test]
async fn feed_resumes_after_the_given_offset() {
    let store = InMemoryEventStore::new();
    for id in ["100", "200", "300"] {
        store.append_event(EntityKey::new(id), None, deposited()).await.unwrap();
    }

    let feed = store.events_by_tag("account", 1).await.unwrap();
    let offsets: Vec<u64> = feed
        .take(2)
        .map(|item| item.unwrap().offset)
        .collect()
        .await;
    assert_eq!(offsets, vec![2, 3]);
}

#[tokio::test]
async fn unchecked_inserts_reach_the_feed() {
    let store = InMemoryEventStore::new();
    let offset = store.insert_unchecked(PersistedEvent {
        key: EntityKey::new("100"),
        sequence_nr: SequenceNr::new(9),
        event: SerializedEvent::new("Legacy.v0".to_string(), vec![], None).with_tag("account"),
    });
    assert_eq!(offset, 1);

    let mut feed = store.events_by_tag("account", 0).await.unwrap();
    let envelope = feed.next().await.unwrap().unwrap();
    assert_eq!(envelope.event.event_type, "Legacy.v0");
    assert_eq!(envelope.sequence_nr, SequenceNr::new(9));
}

#[tokio::test]
async fn checkpoint_save_and_load() {
    let checkpoint = InMemoryProjectionCheckpoint::new();
    assert_eq!(checkpoint.load_position("balances").await.unwrap(), None);
    assert_eq!(checkpoint.offset("balances"), 0);

    checkpoint.save_position("balances", EventPosition::new(10, Utc::now())).await.unwrap();
    checkpoint.save_position("balances", EventPosition::new(25, Utc::now())).await.unwrap();
    assert_eq!(checkpoint.offset("balances"), 25);

    checkpoint.fail_next_saves(1);
    assert!(checkpoint.save_position("balances", EventPosition::new(30, Utc::now())).await.is_err());
    assert_eq!(checkpoint.offset("balances"), 25);
}

#[tokio::test]
async fn checkpoints_are_isolated_per_projection() {
    let checkpoint = InMemoryProjectionCheckpoint::new();
    checkpoint.save_position("a", EventPosition::new(1, Utc::now())).await.unwrap();
    checkpoint.save_position("b", EventPosition::new(2, Utc::now())).await.unwrap();

    assert_eq!(checkpoint.offset("a"), 1);
    assert_eq!(checkpoint.offset("b"), 2);

    checkpoint.clear();
    assert_eq!(checkpoint.offset("a"), 0);
}

#[tokio::test]
async fn recording_projection_acks_by_event_type() {
    let projection = RecordingProjection::new("audit", &["Deposited.v1"]);
    let envelope = |offset, event_type: &str| EventEnvelope {
        offset,
        key: EntityKey::new("100"),
        sequence_nr: SequenceNr::new(offset),
        event: SerializedEvent::new(event_type.to_string(), vec![], None),
    };

    assert_eq!(projection.apply_event(&envelope(1, "Deposited.v1")).await.unwrap(), Ack::Processed);
    assert_eq!(projection.apply_event(&envelope(2, "Unknown.v1")).await.unwrap(), Ack::NotProcessed);

    projection.fail_next_applies(1);
    assert!(projection.apply_event(&envelope(3, "Deposited.v1")).await.is_err());

    assert_eq!(projection.applied_offsets(), vec![1]);
    projection.rebuild().await.unwrap();
    assert!(projection.applied().is_empty());
}
