//! Runtime configuration.

use std::time::Duration;

/// Configuration shared by every instance of an entity runtime.
///
/// # Example
///
/// ```
/// use eventkeep_runtime::RuntimeConfig;
/// use std::time::Duration;
///
/// let config = RuntimeConfig::default()
///     .with_idle_timeout(Duration::from_secs(30))
///     .with_snapshot_interval(Duration::from_secs(1));
///
/// assert_eq!(config.mailbox_capacity, 32);
/// ```
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// An instance stops after this long without a handled command.
    pub idle_timeout: Duration,
    /// How often a dirty instance saves a snapshot. Values below 1ms are
    /// treated as 1ms.
    pub snapshot_interval: Duration,
    /// Bounded inbox size per instance. Values below 1 are treated as 1.
    pub mailbox_capacity: usize,
}

impl RuntimeConfig {
    /// Create a new configuration with custom values
    #[must_use]
    pub const fn new(
        idle_timeout: Duration,
        snapshot_interval: Duration,
        mailbox_capacity: usize,
    ) -> Self {
        Self {
            idle_timeout,
            snapshot_interval,
            mailbox_capacity,
        }
    }

    /// Set the idle timeout
    #[must_use]
    pub const fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the snapshot interval
    #[must_use]
    pub const fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = interval;
        self
    }

    /// Set the mailbox capacity
    #[must_use]
    pub const fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(10),
            snapshot_interval: Duration::from_secs(5),
            mailbox_capacity: 32,
        }
    }
}
