//! Balance projection driven by the account event feed.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect
#![allow(clippy::panic)] // Tests can panic

use accounts::{AccountId, AccountProjection, AccountView, Accounts, InMemoryAccountView, Money};
use eventkeep_core::projection::{EventPosition, ProjectionCheckpoint};
use eventkeep_projections::{Projector, ProjectorConfig};
use eventkeep_runtime::RuntimeConfig;
use eventkeep_runtime::retry::RetryPolicy;
use eventkeep_testing::{InMemoryEventStore, InMemoryProjectionCheckpoint, init_tracing, test_clock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const NAME: &str = "account_balances";

struct Fixture {
    store: Arc<InMemoryEventStore>,
    accounts: Accounts,
    view: InMemoryAccountView,
    checkpoint: InMemoryProjectionCheckpoint,
}

impl Fixture {
    fn new() -> Self {
        init_tracing();
        let store = Arc::new(InMemoryEventStore::new());
        let accounts = Accounts::new(
            store.clone(),
            store.clone(),
            Arc::new(test_clock()),
            RuntimeConfig::default(),
        );
        Self {
            store,
            accounts,
            view: InMemoryAccountView::new(),
            checkpoint: InMemoryProjectionCheckpoint::new(),
        }
    }

    fn projector(&self, config: ProjectorConfig) -> (Projector<AccountProjection<InMemoryAccountView>>, watch::Sender<bool>) {
        Projector::new(
            AccountProjection::new(self.view.clone()),
            self.store.clone(),
            Arc::new(self.checkpoint.clone()),
            "account",
            config,
        )
    }

    fn spawn(&self, config: ProjectorConfig) -> (JoinHandle<u64>, watch::Sender<bool>) {
        let (mut projector, shutdown) = self.projector(config);
        let running = tokio::spawn(async move { projector.run().await.unwrap() });
        (running, shutdown)
    }

    async fn wait_for_balance(&self, id: &str, expected: &str) {
        let id = AccountId::new(id);
        let expected: Money = expected.parse().unwrap();
        for _ in 0..400 {
            if self.view.balance(&id).await.unwrap() == Some(expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "balance of {id} is {:?}, expected {expected}",
            self.view.balance(&id).await.unwrap()
        );
    }
}

fn money(s: &str) -> Money {
    s.parse().unwrap()
}

/// Let the projector commit acks that are already in.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn projected_balances_follow_the_write_side() {
    let fixture = Fixture::new();
    let (running, shutdown) = fixture.spawn(ProjectorConfig::default());

    let id = AccountId::new("100");
    fixture.accounts.deposit(&id, money("100")).await.unwrap();
    fixture.accounts.deposit(&id, money("200")).await.unwrap();
    fixture.accounts.withdraw(&id, money("99.95")).await.unwrap();
    fixture.accounts.withdraw(&AccountId::new("200"), money("1")).await.unwrap();

    fixture.wait_for_balance("100", "200.05").await;
    fixture.wait_for_balance("200", "-1").await;
    assert!(fixture.view.balance(&AccountId::new("999")).await.unwrap().is_none());

    settle().await;
    shutdown.send(true).unwrap();
    assert_eq!(running.await.unwrap(), 4);
    assert_eq!(fixture.checkpoint.offset(NAME), 4);
}

#[tokio::test]
async fn replaying_from_the_beginning_does_not_double_count() {
    let fixture = Fixture::new();
    let id = AccountId::new("100");
    fixture.accounts.deposit(&id, money("10")).await.unwrap();
    fixture.accounts.deposit(&id, money("5")).await.unwrap();

    let (running, shutdown) = fixture.spawn(ProjectorConfig::default());
    fixture.wait_for_balance("100", "15").await;
    settle().await;
    shutdown.send(true).unwrap();
    running.await.unwrap();

    // Forget the checkpoint but keep the view: every event is delivered again.
    fixture
        .checkpoint
        .save_position(NAME, EventPosition::beginning())
        .await
        .unwrap();
    fixture.accounts.deposit(&id, money("1")).await.unwrap();

    let (running, shutdown) = fixture.spawn(ProjectorConfig::default());
    fixture.wait_for_balance("100", "16").await;
    settle().await;
    shutdown.send(true).unwrap();
    assert_eq!(running.await.unwrap(), 3);
    assert_eq!(fixture.view.balance(&id).await.unwrap(), Some(money("16")));
}

#[tokio::test]
async fn failed_view_write_stops_and_replays_after_restart() {
    let fixture = Fixture::new();
    let id = AccountId::new("100");
    fixture.accounts.deposit(&id, money("10")).await.unwrap();
    fixture.accounts.deposit(&id, money("20")).await.unwrap();

    let config = ProjectorConfig::default()
        .with_parallelism(1)
        .with_checkpoint_interval(1)
        .with_retry_policy(RetryPolicy::no_retry());

    fixture.view.fail_next_writes(1);
    let (mut first, _shutdown) = fixture.projector(config.clone());
    assert!(first.run().await.is_err());
    assert_eq!(fixture.checkpoint.offset(NAME), 0);
    assert!(fixture.view.balance(&id).await.unwrap().is_none());

    let (running, shutdown) = fixture.spawn(config);
    fixture.wait_for_balance("100", "30").await;
    settle().await;
    shutdown.send(true).unwrap();
    assert_eq!(running.await.unwrap(), 2);
}

#[tokio::test]
async fn transient_view_failures_are_retried() {
    let fixture = Fixture::new();
    fixture.accounts.deposit(&AccountId::new("100"), money("7")).await.unwrap();

    let retries = RetryPolicy::builder()
        .max_retries(3)
        .initial_delay(Duration::from_millis(1))
        .jitter(false)
        .build();
    fixture.view.fail_next_writes(2);

    let (running, shutdown) = fixture.spawn(ProjectorConfig::default().with_retry_policy(retries));
    fixture.wait_for_balance("100", "7").await;
    settle().await;
    shutdown.send(true).unwrap();
    assert_eq!(running.await.unwrap(), 1);
}

#[tokio::test]
async fn rebuild_recomputes_the_view_from_scratch() {
    let fixture = Fixture::new();
    let id = AccountId::new("100");
    fixture.accounts.deposit(&id, money("3")).await.unwrap();

    let (running, shutdown) = fixture.spawn(ProjectorConfig::default());
    fixture.wait_for_balance("100", "3").await;
    settle().await;
    shutdown.send(true).unwrap();
    running.await.unwrap();

    let (projector, _shutdown) = fixture.projector(ProjectorConfig::default());
    projector.rebuild().await.unwrap();
    assert!(fixture.view.balance(&id).await.unwrap().is_none());
    assert_eq!(fixture.checkpoint.offset(NAME), 0);

    let (running, shutdown) = fixture.spawn(ProjectorConfig::default());
    fixture.wait_for_balance("100", "3").await;
    settle().await;
    shutdown.send(true).unwrap();
    assert_eq!(running.await.unwrap(), 1);
}
