//! Retry logic with exponential backoff
//!
//! Used for transient connection failures (SFTP session dials). Backoff is
//! exponential with optional jitter to avoid thundering-herd reconnects
//! when a seedbox comes back up.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::error::TransferError;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, connection resets) should return `true`;
/// permanent failures (bad credentials, host key mismatch) `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for TransferError {
    fn is_retryable(&self) -> bool {
        match self {
            TransferError::ConnectionFailed(_) => true,
            TransferError::Protocol(msg) => {
                msg.contains("timeout") || msg.contains("temporar") || msg.contains("reset")
            }
            // Host key and auth problems need operator action
            TransferError::HostKey(_) => false,
            TransferError::RemoteFile(_) => false,
            TransferError::LocalFile(_) => false,
            TransferError::Cancelled => false,
        }
    }
}

/// Retry policy: attempt count and backoff shape
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for the backed-off delay
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failure
    pub backoff_multiplier: f64,
    /// Randomize each delay by ±25%
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(15),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Execute an async operation, retrying transient failures per the policy
///
/// Returns the successful result, or the last error once attempts are
/// exhausted or a non-retryable error occurs.
pub async fn with_retry<F, Fut, T, E>(policy: &RetryPolicy, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = policy.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                attempt += 1;
                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis(),
                    "operation failed, retrying"
                );

                let wait = if policy.jitter { add_jitter(delay) } else { delay };
                tokio::time::sleep(wait).await;

                delay = Duration::from_secs_f64(delay.as_secs_f64() * policy.backoff_multiplier)
                    .min(policy.max_delay);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Randomize a delay by ±25% to spread reconnect attempts
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let factor = rng.gen_range(0.75..=1.25);
    Duration::from_secs_f64(delay.as_secs_f64() * factor)
}
