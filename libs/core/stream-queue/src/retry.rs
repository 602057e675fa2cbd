//! Retry executor with exponential backoff.
//!
//! Every call the queue makes to the log store goes through
//! [`retry_with_backoff_if`]. The operation is invoked once, then retried up
//! to `max_retries` more times, sleeping an exponentially growing delay
//! between attempts. When every attempt fails the last error is returned.
//!
//! ```rust,ignore
//! use stream_queue::retry::{retry_with_backoff, RetryConfig};
//!
//! let config = RetryConfig::new().with_max_retries(5);
//! let id = retry_with_backoff(|| store.append(&stream, &fields), &config).await?;
//! ```

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry configuration for log store operations
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: u64,

    /// Upper bound for a single delay in milliseconds
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff (typically 2.0)
    pub backoff_multiplier: f64,

    /// Randomize each delay between 50% and 100% of its nominal value
    pub use_jitter: bool,
}

impl RetryConfig {
    /// Create a new retry configuration with defaults
    ///
    /// Defaults:
    /// - max_retries: 5
    /// - initial_delay_ms: 100
    /// - max_delay_ms: 5000
    /// - backoff_multiplier: 2.0
    /// - use_jitter: false
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the initial delay
    pub fn with_initial_delay(mut self, delay_ms: u64) -> Self {
        self.initial_delay_ms = delay_ms;
        self
    }

    /// Set the maximum delay
    pub fn with_max_delay(mut self, delay_ms: u64) -> Self {
        self.max_delay_ms = delay_ms;
        self
    }

    /// Enable jitter
    pub fn with_jitter(mut self) -> Self {
        self.use_jitter = true;
        self
    }

    /// Total number of attempts, including the first one
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Nominal delay before retry number `retry` (0-based), without jitter
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(retry.min(i32::MAX as u32) as i32);
        let delay = (self.initial_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(delay as u64)
    }

    /// Disable all retries (single attempt)
    pub fn no_retry() -> Self {
        Self::default().with_max_retries(0)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
            use_jitter: false,
        }
    }
}

/// Retry an async operation with exponential backoff
///
/// Every error is considered transient. Use [`retry_with_backoff_if`] to stop
/// early on errors that cannot succeed on a second attempt.
pub async fn retry_with_backoff<F, Fut, T, E>(operation: F, config: &RetryConfig) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_backoff_if(operation, config, |_| true).await
}

/// Retry an async operation with exponential backoff while `should_retry`
/// accepts the error.
pub async fn retry_with_backoff_if<F, Fut, T, E, P>(
    mut operation: F,
    config: &RetryConfig,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut retry: u32 = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if retry > 0 {
                    debug!(retries = retry, "Operation succeeded after retries");
                }
                return Ok(result);
            }
            Err(e) => {
                if !should_retry(&e) {
                    debug!(error = %e, "Operation failed with non-retryable error");
                    return Err(e);
                }

                if retry >= config.max_retries {
                    warn!(
                        attempts = config.max_attempts(),
                        error = %e,
                        "Operation failed after all attempts"
                    );
                    return Err(e);
                }

                let nominal = config.delay_for_retry(retry);
                let delay = if config.use_jitter {
                    apply_jitter(nominal)
                } else {
                    nominal
                };

                retry += 1;
                debug!(
                    attempt = retry,
                    max_attempts = config.max_attempts(),
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Scale a delay to a pseudo-random value between 50% and 100% of itself
fn apply_jitter(delay: Duration) -> Duration {
    use std::collections::hash_map::RandomState;
    use std::hash::BuildHasher;

    let random_factor =
        (RandomState::new().hash_one(std::time::SystemTime::now()) % 50) as f64 / 100.0 + 0.5;

    delay.mul_f64(random_factor)
}
