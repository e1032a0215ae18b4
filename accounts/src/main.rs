//! Accounts demo.
//!
//! Runs deposits and withdrawals against in-memory stores, lets the account
//! instances passivate, reads them back, then projects the balances into the
//! read view (in memory, or `PostgreSQL` when
//! `ACCOUNTS_PROJECTION_DATABASE_URL` is set).

use accounts::{
    Account, AccountId, AccountProjection, AccountView, Accounts, AppConfig, InMemoryAccountView, Money,
    PostgresAccountView,
};
use anyhow::{Context, Result};
use eventkeep_core::entity::Entity;
use eventkeep_core::environment::SystemClock;
use eventkeep_core::event_feed::EventFeed;
use eventkeep_core::projection::ProjectionCheckpoint;
use eventkeep_projections::{PostgresProjectionCheckpoint, Projector};
use eventkeep_runtime::metrics::MetricsServer;
use eventkeep_testing::{InMemoryEventStore, InMemoryProjectionCheckpoint};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut metrics = config.metrics_addr.map(MetricsServer::new);
    if let Some(server) = metrics.as_mut() {
        server.start().context("failed to start metrics server")?;
    }

    let store = Arc::new(InMemoryEventStore::new());
    let accounts = Accounts::new(
        store.clone(),
        store.clone(),
        Arc::new(SystemClock),
        config.runtime_config(),
    );

    println!("=== Accounts: event-sourced balances ===\n");
    let ids = run_commands(&accounts).await?;

    println!(
        "\nWaiting {}s for idle accounts to passivate...",
        config.idle_timeout_secs
    );
    tokio::time::sleep(Duration::from_secs(config.idle_timeout_secs) + Duration::from_millis(500)).await;
    println!("Live account instances: {}", accounts.live_instances().await);

    let mut expected = Vec::with_capacity(ids.len());
    for id in &ids {
        let account = accounts
            .get(id)
            .await?
            .with_context(|| format!("account {id} lost its history"))?;
        println!("  {id}: {} (recovered)", account.balance);
        expected.push((account.id, account.balance));
    }

    match &config.projection_database_url {
        Some(url) => {
            info!("Projecting into PostgreSQL");
            let view = PostgresAccountView::connect(url).await?;
            view.migrate().await?;
            let checkpoint = PostgresProjectionCheckpoint::connect(url).await?;
            checkpoint.migrate().await?;
            project(&config, store, view, Arc::new(checkpoint), &expected).await?;
        }
        None => {
            info!("Projecting into the in-memory view");
            let checkpoint = Arc::new(InMemoryProjectionCheckpoint::new());
            project(&config, store, InMemoryAccountView::new(), checkpoint, &expected).await?;
        }
    }

    accounts.shutdown().await;
    if let Some(text) = metrics.as_ref().and_then(MetricsServer::render) {
        info!(bytes = text.len(), "Metrics rendered");
    }
    Ok(())
}

/// Deposit into and withdraw from a few accounts, printing every reply.
async fn run_commands(accounts: &Accounts) -> Result<Vec<AccountId>> {
    let main = AccountId::new("100");
    accounts.deposit(&main, "100".parse()?).await?;
    accounts.deposit(&main, "200".parse()?).await?;
    let event = accounts.withdraw(&main, "99.95".parse()?).await?;
    println!("Account 100 -> {event:?}");

    let others = ["200", "300", "400"].map(AccountId::new);
    for (i, id) in others.iter().enumerate() {
        let step = i64::try_from(i)?;
        accounts.deposit(id, Money::from_dollars(50 * (step + 1))).await?;
        accounts.withdraw(id, Money::from_cents(1_234)).await?;
    }

    println!("\nBalances:");
    for id in std::iter::once(&main).chain(others.iter()) {
        if let Some(account) = accounts.get(id).await? {
            println!("  {id}: {}", account.balance);
        }
    }

    let missing = AccountId::new("999");
    match accounts.get(&missing).await? {
        Some(account) => println!("  {missing}: {} (unexpected)", account.balance),
        None => println!("  {missing}: not found"),
    }

    let mut ids = vec![main];
    ids.extend(others);
    Ok(ids)
}

/// Run the balance projector until the view matches `expected`.
async fn project<V: AccountView + Clone>(
    config: &AppConfig,
    feed: Arc<dyn EventFeed>,
    view: V,
    checkpoint: Arc<dyn ProjectionCheckpoint>,
    expected: &[(AccountId, Money)],
) -> Result<()> {
    let (mut projector, shutdown) = Projector::new(
        AccountProjection::new(view.clone()),
        feed,
        checkpoint,
        Account::TAG,
        config.projector_config(),
    );

    // The event log lives in memory, so the view starts over on every run.
    projector.rebuild().await?;
    let running = tokio::spawn(async move { projector.run().await });

    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let mut caught_up = true;
        for (id, balance) in expected {
            if view.balance(id).await? != Some(*balance) {
                caught_up = false;
                break;
            }
        }
        if caught_up {
            break;
        }
        if Instant::now() >= deadline {
            tracing::warn!("Projection did not catch up within 5s");
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    shutdown.send(true).ok();
    let offset = running.await??;
    println!("\nProjected balances (checkpoint at offset {offset}):");
    for (id, _) in expected {
        let balance = view.balance(id).await?.unwrap_or(Money::ZERO);
        println!("  {id}: {balance}");
    }
    Ok(())
}
