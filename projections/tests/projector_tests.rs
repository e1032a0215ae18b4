//! Projector behavior against the in-memory feed and checkpoint.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use chrono::Utc;
use eventkeep_core::event::SerializedEvent;
use eventkeep_core::event_store::EventStore;
use eventkeep_core::key::EntityKey;
use eventkeep_core::projection::{EventPosition, ProjectionCheckpoint};
use eventkeep_projections::{Projector, ProjectorConfig};
use eventkeep_runtime::retry::RetryPolicy;
use eventkeep_testing::{
    InMemoryEventStore, InMemoryProjectionCheckpoint, RecordingProjection, init_tracing,
};
use std::sync::Arc;
use std::time::Duration;

const NAME: &str = "audit";

fn tagged(event_type: &str) -> SerializedEvent {
    SerializedEvent::new(event_type.to_string(), vec![], None).with_tag("account")
}

async fn append(store: &InMemoryEventStore, key: &str, event_type: &str) {
    store
        .append_event(EntityKey::new(key), None, tagged(event_type))
        .await
        .unwrap();
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..400 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(done(), "condition not reached in time");
}

/// Let the projector commit acks that are already in.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

fn projector(
    projection: &RecordingProjection,
    store: &Arc<InMemoryEventStore>,
    checkpoint: &InMemoryProjectionCheckpoint,
    config: ProjectorConfig,
) -> (Projector<RecordingProjection>, tokio::sync::watch::Sender<bool>) {
    init_tracing();
    Projector::new(
        projection.clone(),
        store.clone(),
        Arc::new(checkpoint.clone()),
        "account",
        config,
    )
}

#[tokio::test]
async fn projects_every_event_and_checkpoints_on_stop() {
    let store = Arc::new(InMemoryEventStore::new());
    let checkpoint = InMemoryProjectionCheckpoint::new();
    let projection = RecordingProjection::new(NAME, &["Deposited.v1"]);
    for key in ["100", "200", "100", "300", "200"] {
        append(&store, key, "Deposited.v1").await;
    }

    let (mut projector, shutdown) = projector(
        &projection,
        &store,
        &checkpoint,
        ProjectorConfig::default().with_checkpoint_interval(2),
    );
    let running = tokio::spawn(async move { projector.run().await });

    wait_until(|| projection.applied().len() == 5).await;
    wait_until(|| checkpoint.offset(NAME) >= 4).await;
    settle().await;
    shutdown.send(true).unwrap();

    assert_eq!(running.await.unwrap().unwrap(), 5);
    assert_eq!(checkpoint.offset(NAME), 5);
}

#[tokio::test]
async fn follows_events_appended_while_running() {
    let store = Arc::new(InMemoryEventStore::new());
    let checkpoint = InMemoryProjectionCheckpoint::new();
    let projection = RecordingProjection::new(NAME, &["Deposited.v1"]);

    let (mut projector, shutdown) =
        projector(&projection, &store, &checkpoint, ProjectorConfig::default());
    let running = tokio::spawn(async move { projector.run().await });

    append(&store, "100", "Deposited.v1").await;
    wait_until(|| projection.applied().len() == 1).await;
    append(&store, "100", "Deposited.v1").await;
    wait_until(|| projection.applied().len() == 2).await;

    settle().await;
    shutdown.send(true).unwrap();
    assert_eq!(running.await.unwrap().unwrap(), 2);
}

#[tokio::test]
async fn resumes_after_the_saved_checkpoint() {
    let store = Arc::new(InMemoryEventStore::new());
    let checkpoint = InMemoryProjectionCheckpoint::new();
    let projection = RecordingProjection::new(NAME, &["Deposited.v1"]);
    for key in ["100", "200", "300", "400", "500"] {
        append(&store, key, "Deposited.v1").await;
    }
    checkpoint
        .save_position(NAME, EventPosition::new(3, Utc::now()))
        .await
        .unwrap();

    let (mut projector, shutdown) =
        projector(&projection, &store, &checkpoint, ProjectorConfig::default());
    let running = tokio::spawn(async move { projector.run().await });

    wait_until(|| projection.applied().len() == 2).await;
    settle().await;
    shutdown.send(true).unwrap();
    running.await.unwrap().unwrap();

    let mut offsets = projection.applied_offsets();
    offsets.sort_unstable();
    assert_eq!(offsets, vec![4, 5]);
    assert_eq!(checkpoint.offset(NAME), 5);
}

#[tokio::test]
async fn unknown_event_types_are_acknowledged_and_committed() {
    let store = Arc::new(InMemoryEventStore::new());
    let checkpoint = InMemoryProjectionCheckpoint::new();
    let projection = RecordingProjection::new(NAME, &["Deposited.v1"]);
    append(&store, "100", "Closed.v1").await;
    append(&store, "100", "Deposited.v1").await;

    let (mut projector, shutdown) =
        projector(&projection, &store, &checkpoint, ProjectorConfig::default());
    let running = tokio::spawn(async move { projector.run().await });

    wait_until(|| projection.applied().len() == 1).await;
    settle().await;
    shutdown.send(true).unwrap();

    assert_eq!(running.await.unwrap().unwrap(), 2);
    assert_eq!(projection.applied_offsets(), vec![2]);
}

#[tokio::test]
async fn per_key_order_is_preserved_under_parallelism() {
    let store = Arc::new(InMemoryEventStore::new());
    let checkpoint = InMemoryProjectionCheckpoint::new();
    let projection = RecordingProjection::new(NAME, &["Deposited.v1"]);
    for i in 0..30 {
        append(&store, ["a", "b", "c"][i % 3], "Deposited.v1").await;
    }

    let (mut projector, shutdown) = projector(
        &projection,
        &store,
        &checkpoint,
        ProjectorConfig::default().with_parallelism(8),
    );
    let running = tokio::spawn(async move { projector.run().await });

    wait_until(|| projection.applied().len() == 30).await;
    settle().await;
    shutdown.send(true).unwrap();
    assert_eq!(running.await.unwrap().unwrap(), 30);

    for key in ["a", "b", "c"] {
        let sequence: Vec<u64> = projection
            .applied()
            .iter()
            .filter(|envelope| envelope.key.as_str() == key)
            .map(|envelope| envelope.sequence_nr.value())
            .collect();
        assert_eq!(sequence, (1..=10).collect::<Vec<_>>(), "key {key}");
    }
}

#[tokio::test]
async fn failed_update_stops_without_advancing_and_is_replayed() {
    let store = Arc::new(InMemoryEventStore::new());
    let checkpoint = InMemoryProjectionCheckpoint::new();
    let projection = RecordingProjection::new(NAME, &["Deposited.v1"]);
    for key in ["100", "100", "200"] {
        append(&store, key, "Deposited.v1").await;
    }
    projection.fail_next_applies(1);

    let config = ProjectorConfig::default()
        .with_parallelism(1)
        .with_checkpoint_interval(1)
        .with_retry_policy(RetryPolicy::no_retry());

    let (mut first, _shutdown) = projector(&projection, &store, &checkpoint, config.clone());
    assert!(first.run().await.is_err());
    assert_eq!(checkpoint.offset(NAME), 0);
    assert!(projection.applied().is_empty());

    let (mut second, shutdown) = projector(&projection, &store, &checkpoint, config);
    let running = tokio::spawn(async move { second.run().await });
    wait_until(|| projection.applied().len() == 3).await;
    settle().await;
    shutdown.send(true).unwrap();

    assert_eq!(running.await.unwrap().unwrap(), 3);
    assert_eq!(projection.applied_offsets(), vec![1, 2, 3]);
}

#[tokio::test]
async fn checkpoint_failures_do_not_stop_projection() {
    let store = Arc::new(InMemoryEventStore::new());
    let checkpoint = InMemoryProjectionCheckpoint::new();
    let projection = RecordingProjection::new(NAME, &["Deposited.v1"]);
    for key in ["100", "200", "300"] {
        append(&store, key, "Deposited.v1").await;
    }
    checkpoint.fail_next_saves(1);

    let (mut projector, shutdown) = projector(
        &projection,
        &store,
        &checkpoint,
        ProjectorConfig::default().with_checkpoint_interval(1),
    );
    let running = tokio::spawn(async move { projector.run().await });

    wait_until(|| checkpoint.offset(NAME) == 3).await;
    settle().await;
    shutdown.send(true).unwrap();
    assert_eq!(running.await.unwrap().unwrap(), 3);
}

#[tokio::test]
async fn rebuild_clears_the_view_and_resets_the_checkpoint() {
    let store = Arc::new(InMemoryEventStore::new());
    let checkpoint = InMemoryProjectionCheckpoint::new();
    let projection = RecordingProjection::new(NAME, &["Deposited.v1"]);
    append(&store, "100", "Deposited.v1").await;
    append(&store, "200", "Deposited.v1").await;

    let (mut projector, shutdown) =
        projector(&projection, &store, &checkpoint, ProjectorConfig::default());
    let running = tokio::spawn(async move {
        let offset = projector.run().await;
        (projector, offset)
    });
    wait_until(|| projection.applied().len() == 2).await;
    settle().await;
    shutdown.send(true).unwrap();
    let (projector, offset) = running.await.unwrap();
    assert_eq!(offset.unwrap(), 2);

    projector.rebuild().await.unwrap();
    assert!(projection.applied().is_empty());
    assert_eq!(checkpoint.offset(NAME), 0);
}
