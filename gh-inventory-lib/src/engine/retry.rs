//! Exponential backoff with jitter for retryable failures.

use super::InventoryError;
use core::time::Duration;
use rand::Rng;
use tokio_util::sync::CancellationToken;

const LOG_TARGET: &str = "     retry";

/// How persistently an operation is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries on top of the first attempt.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay: Duration::from_secs(60),
        }
    }

    #[must_use]
    pub const fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Compute the delay that follows `previous`: double it and add up to 50% jitter.
    fn next_delay(&self, previous: Duration) -> Duration {
        let doubled = previous.saturating_mul(2);
        let jitter = rand::thread_rng().gen_range(0.0..=0.5);
        doubled.mul_f64(1.0 + jitter).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Run `op`, retrying retryable failures.
///
/// A non-retryable failure is returned immediately. A retryable one is retried after
/// `initial_delay`, and the delay doubles (plus up to 50% jitter) on every further attempt.
/// A server-requested delay takes precedence when it is longer. After `max_attempts`
/// retries the last cause is returned wrapped in a "max retries reached" error.
///
/// Once `cancel` fires no further attempt is made: a pending backoff returns the last
/// failure, an attempt in flight is dropped.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, cancel: &CancellationToken, mut op: F) -> Result<T, InventoryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, InventoryError>>,
{
    let mut delay = policy.initial_delay;
    let mut retries = 0u32;

    loop {
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(InventoryError::general("run cancelled")),
            outcome = op() => outcome,
        };

        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !err.is_retryable() {
            return Err(err);
        }

        if retries >= policy.max_attempts {
            return Err(InventoryError::max_retries(retries + 1, err));
        }

        let wait = err.retry_after().map_or(delay, |requested| requested.max(delay));
        retries += 1;
        log::debug!(
            target: LOG_TARGET,
            "Retrying after {} failure (retry {retries}/{}, delay {}ms): {err}",
            err.kind(),
            policy.max_attempts,
            wait.as_millis()
        );

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                log::debug!(target: LOG_TARGET, "Cancelled while backing off, giving up");
                return Err(err);
            }
            () = tokio::time::sleep(wait) => {}
        }

        delay = policy.next_delay(delay);
    }
}
