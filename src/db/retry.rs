//! Bounded retry of a fallible async operation.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Default number of retries after the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Default pause between attempts, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 10;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(DEFAULT_RETRY_DELAY_MS);

/// How many times to retry and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `0` disables retrying.
    pub max_retries: u32,
    /// Fixed pause before each retry.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Run the operation exactly once.
    pub fn never() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Upper bound on attempts: the first one plus every retry.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY)
    }
}

/// Run `operation` until it succeeds, fails with an error `retryable` rejects,
/// or the policy is exhausted.
///
/// The operation receives the zero-based attempt number. The last error is
/// returned unchanged once retries run out.
pub async fn with_retry<T, E, F, Fut, C>(
    policy: RetryPolicy,
    retryable: C,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    C: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.max_retries && retryable(&err) => {
                attempt += 1;
                warn!(
                    attempt,
                    max_retries = policy.max_retries,
                    error = %err,
                    "Retrying after transient failure"
                );
                if !policy.delay.is_zero() {
                    tokio::time::sleep(policy.delay).await;
                }
            }
            Err(err) => return Err(err),
        }
    }
}
