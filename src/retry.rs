//! Retry with backoff for transient provider failures.
//!
//! Provider calls are wrapped in a [`RetryPolicy`]. The caller decides which
//! errors may be retried; everything else is returned on the first failure so
//! genuine rejections surface unchanged. Delays double from
//! `initial_delay` up to `max_delay`, with equal jitter (half the delay fixed,
//! half random). Both the backoff sleep and every attempt respect a
//! [`CancellationToken`].
//!
//! # Example
//!
//! ```rust,ignore
//! use tiernet::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(20));
//!
//! let vpc_id = policy
//!     .execute("create_vpc", &cancel, || provider.create_network("10.1.0.0/16"), |e| e.is_throttled())
//!     .await?;
//! ```

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Why [`RetryPolicy::execute`] gave up.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RetryError<E> {
    /// The operation failed with a non-retryable error, or retries ran out.
    #[error("{0}")]
    Failed(E),

    /// Cancellation was requested before the next attempt.
    #[error("cancelled")]
    Cancelled,
}

/// Retry policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 means no retries, just the initial attempt).
    pub max_retries: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Cap on the delay between retries.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1), Duration::from_secs(20))
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
        }
    }

    /// Delay before retry `attempt` (0-indexed) ignoring jitter:
    /// `initial_delay * 2^attempt`, capped at `max_delay`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Jittered delay before retry `attempt`, within `[base/2, base]`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let half = base / 2;
        let half_millis = u64::try_from(half.as_millis()).unwrap_or(u64::MAX);
        if half_millis == 0 {
            return base;
        }
        half + Duration::from_millis(rand::thread_rng().gen_range(0..=half_millis))
    }

    /// Run `operation`, retrying while `is_retryable` accepts the error.
    ///
    /// Returns the first success, the first non-retryable error, the last
    /// error once retries are exhausted, or [`RetryError::Cancelled`] if
    /// `cancel` fires before an attempt or during a backoff sleep.
    pub async fn execute<F, Fut, T, E, R>(
        &self,
        operation_name: &str,
        cancel: &CancellationToken,
        mut operation: F,
        is_retryable: R,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        R: Fn(&E) -> bool,
    {
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                debug!("{} not attempted: cancelled", operation_name);
                return Err(RetryError::Cancelled);
            }

            let e = match operation().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(
                            "{} succeeded after {} retry attempts",
                            operation_name, attempt
                        );
                    }
                    return Ok(result);
                }
                Err(e) => e,
            };

            if !is_retryable(&e) {
                return Err(RetryError::Failed(e));
            }
            if attempt >= self.max_retries {
                warn!(
                    "{} still failing after {} attempts: {}",
                    operation_name,
                    attempt + 1,
                    e
                );
                return Err(RetryError::Failed(e));
            }

            let delay = self.delay_for_attempt(attempt);
            warn!(
                "{} attempt {} failed ({}), retrying in {:?}",
                operation_name,
                attempt + 1,
                e,
                delay
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("{} backoff interrupted: cancelled", operation_name);
                    return Err(RetryError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(10), Duration::from_secs(1))
    }

    /// Fails with `error` for the first `failures` calls, then returns 42.
    fn flaky(
        counter: &Arc<AtomicU32>,
        failures: u32,
        error: &'static str,
    ) -> impl FnMut() -> std::future::Ready<Result<i32, &'static str>> {
        let c = counter.clone();
        move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if n < failures { Err(error) } else { Ok(42) })
        }
    }

    #[test]
    fn test_delay_doubles_then_caps() {
        let policy = RetryPolicy::new(10, Duration::from_secs(1), Duration::from_secs(20));

        assert_eq!(policy.base_delay(0), Duration::from_secs(1));
        assert_eq!(policy.base_delay(1), Duration::from_secs(2));
        assert_eq!(policy.base_delay(3), Duration::from_secs(8));
        assert_eq!(policy.base_delay(5), Duration::from_secs(20));
        assert_eq!(policy.base_delay(40), Duration::from_secs(20));
    }

    #[test]
    fn test_jitter_stays_within_half_and_full_delay() {
        let policy = RetryPolicy::new(10, Duration::from_secs(10), Duration::from_secs(20));

        for _ in 0..100 {
            let delay = policy.delay_for_attempt(0);
            assert!(delay >= Duration::from_secs(5));
            assert!(delay <= Duration::from_secs(10));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let counter = Arc::new(AtomicU32::new(0));
        let result = policy(3)
            .execute(
                "op",
                &CancellationToken::new(),
                flaky(&counter, 2, "throttled"),
                |e| *e == "throttled",
            )
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let result = policy(5)
            .execute(
                "op",
                &CancellationToken::new(),
                flaky(&counter, 10, "InvalidParameterValue"),
                |e| *e == "throttled",
            )
            .await;

        assert_eq!(result, Err(RetryError::Failed("InvalidParameterValue")));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausted_returns_last_error() {
        let counter = Arc::new(AtomicU32::new(0));
        let result = policy(2)
            .execute(
                "op",
                &CancellationToken::new(),
                flaky(&counter, 10, "throttled"),
                |_| true,
            )
            .await;

        assert_eq!(result, Err(RetryError::Failed("throttled")));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_token_prevents_first_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = policy(3)
            .execute("op", &cancel, flaky(&counter, 0, "throttled"), |_| true)
            .await;

        assert_eq!(result, Err(RetryError::Cancelled));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_stops_retrying() {
        let counter = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let slow = RetryPolicy::new(3, Duration::from_secs(10), Duration::from_secs(10));
        let start = tokio::time::Instant::now();
        let result = slow
            .execute("op", &cancel, flaky(&counter, 3, "throttled"), |_| true)
            .await;

        assert_eq!(result, Err(RetryError::Cancelled));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
