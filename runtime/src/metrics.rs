//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for:
//! - Entity instances (commands, persists, recoveries, snapshots, passivation)
//! - Routers (activations, live instances, re-routed messages)
//! - Projections (acknowledged events, checkpoints)
//! - Retries
//!
//! Recording is a no-op until a recorder is installed, so library code records
//! unconditionally.
//!
//! # Example
//!
//! ```rust,no_run
//! use eventkeep_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! if let Some(text) = server.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Installs the global recorder and an HTTP listener for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server bound to `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions, install the recorder and start listening.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    /// A recorder that is already installed is not an error.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let (recorder, exporter) = builder
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;
        let handle = recorder.handle();

        match metrics::set_global_recorder(recorder) {
            Ok(()) => {
                tokio::spawn(exporter);
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(_) => {
                tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                Ok(())
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Entity metrics
    describe_counter!(
        "entity_commands_total",
        "Total number of commands handled by entity instances"
    );
    describe_counter!(
        "entity_events_persisted_total",
        "Total number of events persisted by entity instances"
    );
    describe_counter!(
        "entity_persist_failures_total",
        "Total number of commands whose event the store failed or rejected"
    );
    describe_histogram!(
        "entity_persist_duration_seconds",
        "Time taken to persist one event"
    );
    describe_counter!(
        "entity_recoveries_total",
        "Total number of successful instance recoveries"
    );
    describe_counter!(
        "entity_recovery_failures_total",
        "Total number of failed instance recoveries"
    );
    describe_histogram!(
        "entity_recovery_duration_seconds",
        "Time taken to recover an instance from snapshot and events"
    );
    describe_counter!(
        "entity_snapshots_saved_total",
        "Total number of snapshots saved"
    );
    describe_counter!(
        "entity_snapshot_failures_total",
        "Total number of failed snapshot saves"
    );
    describe_counter!(
        "entity_passivations_total",
        "Total number of instances stopped by idle timeout or request"
    );

    // Router metrics
    describe_counter!(
        "router_activations_total",
        "Total number of instances activated by routers"
    );
    describe_gauge!(
        "router_live_instances",
        "Number of instances currently registered in a router"
    );
    describe_counter!(
        "router_rerouted_messages_total",
        "Total number of messages re-routed because their instance was stopping"
    );

    // Projection metrics
    describe_counter!(
        "projection_events_total",
        "Total number of feed events acknowledged, by outcome"
    );
    describe_gauge!(
        "projection_checkpoint_offset",
        "Last checkpointed feed offset"
    );

    // Retry metrics
    describe_counter!(
        "retry_attempts_total",
        "Total number of retry attempts"
    );
    describe_counter!(
        "retry_successes_total",
        "Total number of successful retries"
    );
    describe_counter!(
        "retry_exhausted_total",
        "Total number of retry attempts that exhausted max retries"
    );
}

/// Entity instance metrics recorder.
pub struct EntityMetrics;

impl EntityMetrics {
    /// Record a handled command.
    pub fn record_command(kind: &'static str) {
        counter!("entity_commands_total", "kind" => kind).increment(1);
    }

    /// Record a persisted event.
    pub fn record_persist(kind: &'static str, duration: Duration) {
        counter!("entity_events_persisted_total", "kind" => kind).increment(1);
        histogram!("entity_persist_duration_seconds", "kind" => kind)
            .record(duration.as_secs_f64());
    }

    /// Record a failed persist.
    pub fn record_persist_failure(kind: &'static str) {
        counter!("entity_persist_failures_total", "kind" => kind).increment(1);
    }

    /// Record a successful recovery.
    pub fn record_recovery(kind: &'static str, duration: Duration) {
        counter!("entity_recoveries_total", "kind" => kind).increment(1);
        histogram!("entity_recovery_duration_seconds", "kind" => kind)
            .record(duration.as_secs_f64());
    }

    /// Record a failed recovery.
    pub fn record_recovery_failure(kind: &'static str) {
        counter!("entity_recovery_failures_total", "kind" => kind).increment(1);
    }

    /// Record a saved snapshot.
    pub fn record_snapshot(kind: &'static str) {
        counter!("entity_snapshots_saved_total", "kind" => kind).increment(1);
    }

    /// Record a failed snapshot.
    pub fn record_snapshot_failure(kind: &'static str) {
        counter!("entity_snapshot_failures_total", "kind" => kind).increment(1);
    }

    /// Record a stopped instance.
    pub fn record_passivation(kind: &'static str) {
        counter!("entity_passivations_total", "kind" => kind).increment(1);
    }
}

/// Router metrics recorder.
pub struct RouterMetrics;

impl RouterMetrics {
    /// Record an activation.
    pub fn record_activation(kind: &'static str) {
        counter!("router_activations_total", "kind" => kind).increment(1);
    }

    /// Record the number of registered instances.
    #[allow(clippy::cast_precision_loss)] // Instance counts are far below 2^52
    pub fn record_live_instances(kind: &'static str, count: usize) {
        gauge!("router_live_instances", "kind" => kind).set(count as f64);
    }

    /// Record a message bounced by a stopping instance.
    pub fn record_reroute(kind: &'static str) {
        counter!("router_rerouted_messages_total", "kind" => kind).increment(1);
    }
}

/// Projection metrics recorder.
pub struct ProjectionMetrics;

impl ProjectionMetrics {
    /// Record an acknowledged event with its outcome (`processed`, `duplicate`, `not_processed`).
    pub fn record_ack(projection: &str, outcome: &'static str) {
        counter!(
            "projection_events_total",
            "projection" => projection.to_string(),
            "outcome" => outcome
        )
        .increment(1);
    }

    /// Record a saved checkpoint.
    #[allow(clippy::cast_precision_loss)] // Offsets far below 2^52 in practice
    pub fn record_checkpoint(projection: &str, offset: u64) {
        gauge!("projection_checkpoint_offset", "projection" => projection.to_string())
            .set(offset as f64);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}
