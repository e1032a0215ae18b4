//! Configuration management for the accounts application.
//!
//! Loads configuration from environment variables with sensible defaults.

use eventkeep_projections::ProjectorConfig;
use eventkeep_runtime::RuntimeConfig;
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors from loading or validating [`AppConfig`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("{name}={value:?} is not a valid value")]
    Invalid {
        /// Variable name
        name: &'static str,
        /// Raw value
        value: String,
    },

    /// A setting is out of its allowed range.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Seconds an account instance stays live without commands (default: 10)
    pub idle_timeout_secs: u64,
    /// Seconds between snapshot attempts of a dirty account (default: 5)
    pub snapshot_interval_secs: u64,
    /// Envelopes the projector keeps in flight (default: 5)
    pub projection_parallelism: usize,
    /// Acknowledged envelopes between checkpoint saves (default: 100)
    pub checkpoint_interval: u64,
    /// Log level used when `RUST_LOG` is not set (default: info)
    pub log_level: String,
    /// Prometheus listener address; metrics are off when unset
    pub metrics_addr: Option<SocketAddr>,
    /// Read-side database; the in-memory view is used when unset
    pub projection_database_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 10,
            snapshot_interval_secs: 5,
            projection_parallelism: 5,
            checkpoint_interval: 100,
            log_level: "info".to_string(),
            metrics_addr: None,
            projection_database_url: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an unparseable or
    /// out-of-range value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a variable is set to an unparseable or
    /// out-of-range value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            idle_timeout_secs: parsed(&lookup, "ACCOUNTS_IDLE_TIMEOUT_SECS")?.unwrap_or(defaults.idle_timeout_secs),
            snapshot_interval_secs: parsed(&lookup, "ACCOUNTS_SNAPSHOT_INTERVAL_SECS")?
                .unwrap_or(defaults.snapshot_interval_secs),
            projection_parallelism: parsed(&lookup, "ACCOUNTS_PROJECTION_PARALLELISM")?
                .unwrap_or(defaults.projection_parallelism),
            checkpoint_interval: parsed(&lookup, "ACCOUNTS_CHECKPOINT_INTERVAL")?
                .unwrap_or(defaults.checkpoint_interval),
            log_level: lookup("ACCOUNTS_LOG_LEVEL").unwrap_or(defaults.log_level),
            metrics_addr: parsed(&lookup, "ACCOUNTS_METRICS_ADDR")?,
            projection_database_url: lookup("ACCOUNTS_PROJECTION_DATABASE_URL").filter(|url| !url.is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check that every interval and limit is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Zero`] naming the first zero setting.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::Zero("idle_timeout_secs"));
        }
        if self.snapshot_interval_secs == 0 {
            return Err(ConfigError::Zero("snapshot_interval_secs"));
        }
        if self.projection_parallelism == 0 {
            return Err(ConfigError::Zero("projection_parallelism"));
        }
        if self.checkpoint_interval == 0 {
            return Err(ConfigError::Zero("checkpoint_interval"));
        }
        Ok(())
    }

    /// Settings for the account entity runtime
    #[must_use]
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig::default()
            .with_idle_timeout(Duration::from_secs(self.idle_timeout_secs))
            .with_snapshot_interval(Duration::from_secs(self.snapshot_interval_secs))
    }

    /// Settings for the balance projector
    #[must_use]
    pub fn projector_config(&self) -> ProjectorConfig {
        ProjectorConfig::default()
            .with_parallelism(self.projection_parallelism)
            .with_checkpoint_interval(self.checkpoint_interval)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<Option<T>, ConfigError> {
    lookup(name)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid { name, value })
        })
        .transpose()
}
