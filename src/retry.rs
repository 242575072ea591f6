//! Retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

/// Result of [`RetryPolicy::run`] when every attempt failed or a
/// non-retryable error stopped it early.
#[derive(Debug)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub last_error: E,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    /// 3 attempts, waiting 2s then 4s between them.
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after the failed attempt number `attempt` (1-based): `base * 2^attempt`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Run `op` until it succeeds, hits a non-retryable error, or attempts run out.
    ///
    /// On success returns the value and the number of attempts it took.
    /// Sleeping only suspends the calling task.
    pub async fn run<T, E, F, Fut, P>(&self, mut op: F, is_retryable: P) -> Result<(T, u32), RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok((value, attempt)),
                Err(error) => {
                    if !is_retryable(&error) {
                        tracing::warn!(attempt, error = %error, "Non-retryable failure, giving up");
                        return Err(RetryError { attempts: attempt, last_error: error });
                    }
                    if attempt >= self.max_attempts {
                        return Err(RetryError { attempts: attempt, last_error: error });
                    }
                    let delay = self.delay_after(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
