//! Exponential backoff for transient store and queue failures.
//!
//! Used to bootstrap the consumer group at worker start and to pace recovery
//! passes while the store or database is failing.
//!
//! # Example
//!
//! ```rust
//! use seckill_runtime::backoff::{BackoffPolicy, retry_with_backoff};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = BackoffPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(20))
//!     .max_delay(Duration::from_secs(2))
//!     .build();
//!
//! let value = retry_with_backoff(&policy, || async { Ok::<_, String>(42) }).await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;
use tokio::time::sleep;

/// Backoff configuration.
///
/// # Default Values
///
/// - `max_retries`: 5
/// - `initial_delay`: 20ms
/// - `max_delay`: 2 seconds
/// - `multiplier`: 2.0
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Maximum number of retries for [`retry_with_backoff`]
    pub max_retries: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap for the exponential delay
    pub max_delay: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl BackoffPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> BackoffPolicyBuilder {
        BackoffPolicyBuilder {
            max_retries: 5,
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    ///
    /// `initial_delay * multiplier ^ attempt`, capped at `max_delay`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        // Exponent saturates well before f64 overflow matters; the cap applies anyway.
        let exponent = attempt.min(63) as i32;
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let max_ms = self.max_delay.as_millis() as f64;

        if !delay_ms.is_finite() || delay_ms >= max_ms {
            self.max_delay
        } else {
            Duration::from_millis(delay_ms as u64)
        }
    }
}

/// Builder for [`BackoffPolicy`].
#[derive(Debug, Clone)]
pub struct BackoffPolicyBuilder {
    max_retries: usize,
    initial_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
}

impl BackoffPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the delay before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the cap for the exponential delay.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the growth factor.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Build the [`BackoffPolicy`].
    #[must_use]
    pub const fn build(self) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: self.max_retries,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            multiplier: self.multiplier,
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
/// Returns the operation's error after the retry budget is spent.
pub async fn retry_with_backoff<F, Fut, T, E>(policy: &BackoffPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                if attempt >= policy.max_retries {
                    tracing::error!(attempt, error = %err, "Operation failed after max retries");
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Operation failed, retrying..."
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
