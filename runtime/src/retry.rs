//! Retry logic with exponential backoff for transient failures.
//!
//! Used wherever a failed store write can simply be tried again, such as a
//! read-side view update.
//!
//! # Example
//!
//! ```rust
//! use eventkeep_runtime::retry::{RetryPolicy, retry_with_backoff};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(10))
//!     .build();
//!
//! let value = retry_with_backoff(&policy, || async { Ok::<_, String>(42) }).await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use crate::metrics::RetryMetrics;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `initial_delay`: 100ms
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0 (delay doubles each retry)
/// - `jitter`: on (each delay is scaled by a random factor in `0.5..=1.0`)
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first try
    pub max_retries: usize,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
    /// Randomize delays so concurrent retries spread out
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// A policy that never retries.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self::builder().max_retries(0).build()
    }

    /// Undithered delay before retry number `attempt` (0-based).
    ///
    /// `initial_delay * multiplier^attempt`, capped at `max_delay`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn base_delay(&self, attempt: usize) -> Duration {
        let exponent = attempt.min(i32::MAX as usize) as i32;
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let max_ms = self.max_delay.as_millis() as f64;

        if !delay_ms.is_finite() || delay_ms >= max_ms {
            self.max_delay
        } else {
            Duration::from_millis(delay_ms as u64)
        }
    }

    /// Delay actually slept before retry number `attempt`, jitter included.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter {
            base.mul_f64(rand::thread_rng().gen_range(0.5..=1.0))
        } else {
            base
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: usize,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter: bool,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    #[must_use]
    pub const fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub const fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            multiplier: self.multiplier,
            jitter: self.jitter,
        }
    }
}

/// Retry an async operation with exponential backoff.
///
/// Returns the first success, or the last error once `max_retries` retries
/// have failed.
///
/// # Errors
///
/// Returns the operation's last error when every attempt failed.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_predicate(policy, operation, |_| true).await
}

/// Retry an async operation while `is_retryable` accepts its error.
///
/// A rejected error is returned immediately.
///
/// # Errors
///
/// Returns the first non-retryable error, or the last error once retries are
/// exhausted.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    RetryMetrics::record_success();
                    tracing::info!(attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) if !is_retryable(&err) => {
                tracing::warn!(error = %err, "Error is not retryable, failing immediately");
                return Err(err);
            }
            Err(err) if attempt >= policy.max_retries => {
                RetryMetrics::record_exhausted();
                tracing::error!(attempt, error = %err, "Operation failed after max retries");
                return Err(err);
            }
            Err(err) => {
                let delay = policy.delay_for_attempt(attempt);
                RetryMetrics::record_attempt();
                tracing::warn!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Operation failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
