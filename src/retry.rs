//! Retry with exponential backoff.
//!
//! Transient provider failures (rate limits, 5xx, timeouts, network
//! errors) are retried with a deterministic exponential backoff: the delay
//! before attempt *k* (0-indexed) is `initial_delay * 2^k`, capped at
//! `max_delay`. Non-retryable errors fail fast, and after the retry budget
//! is exhausted the last error is re-raised.
//!
//! The agent loop runs its own attempt loop around streaming calls so that
//! `retry` events interleave correctly with the event stream; the
//! [`retry_with_backoff`] helper here backs non-streaming calls such as
//! compaction summarization.
//!
//! # Examples
//!
//! ```rust,no_run
//! use agent_core::retry::{retry_with_backoff, RetryPolicy};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), agent_core::Error> {
//! let policy = RetryPolicy::new(3, Duration::from_secs(1));
//!
//! let value = retry_with_backoff(&policy, || async {
//!     Ok::<_, agent_core::Error>(42)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::Result;

/// One retry about to happen; carried on `retry` events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryNotice {
    /// 0-indexed attempt that just failed.
    pub attempt: u32,
    /// Configured retry budget.
    pub max_retries: u32,
    /// Stable kind string of the failing error.
    pub error_kind: String,
}

/// Deterministic exponential backoff policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Number of retries after the initial attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the default 60 s delay cap.
    pub fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            ..Self::default()
        }
    }

    /// Sets the delay cap.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// The backoff delay before retrying after attempt `attempt`
    /// (0-indexed): `initial_delay * 2^attempt`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .initial_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        exp.min(self.max_delay)
    }
}

/// Retries an async operation with exponential backoff.
///
/// Only errors where [`Error::is_retryable`] holds are retried; anything
/// else is returned immediately. After `max_retries` retries the last
/// error is re-raised.
pub async fn retry_with_backoff<F, Fut, T>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_backoff_notify(policy, &mut operation, |_| {}).await
}

/// [`retry_with_backoff`] with a synchronous callback invoked before each
/// backoff sleep.
pub async fn retry_with_backoff_notify<F, Fut, T, N>(
    policy: &RetryPolicy,
    operation: &mut F,
    mut notify: N,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    N: FnMut(RetryNotice),
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() || attempt >= policy.max_retries {
                    return Err(err);
                }
                let delay = policy.delay_for(attempt);
                log::warn!(
                    "transient provider failure ({}), retry {}/{} in {:?}",
                    err.kind(),
                    attempt + 1,
                    policy.max_retries,
                    delay
                );
                notify(RetryNotice {
                    attempt,
                    max_retries: policy.max_retries,
                    error_kind: err.kind().to_string(),
                });
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RetryPolicy::new(5, Duration::from_millis(100));
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy =
            RetryPolicy::new(10, Duration::from_secs(1)).with_max_delay(Duration::from_secs(4));
        assert_eq!(policy.delay_for(8), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = retry_with_backoff(&policy, move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async { Ok::<i32, Error>(7) }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let mut op = move || {
            let n = calls_clone.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(Error::rate_limit("slow down"))
                } else {
                    Ok::<i32, Error>(7)
                }
            }
        };
        let mut notices = Vec::new();
        let result = retry_with_backoff_notify(&policy, &mut op, |n| notices.push(n)).await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[0].attempt, 0);
        assert_eq!(notices[0].error_kind, "rate_limit");
        assert_eq!(notices[1].attempt, 1);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_fast() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = retry_with_backoff(&policy, move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, Error>(Error::auth("denied")) }
        })
        .await;

        assert!(matches!(result, Err(Error::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_budget_and_reraises() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let result = retry_with_backoff(&policy, move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, Error>(Error::server("boom")) }
        })
        .await;

        assert!(matches!(result, Err(Error::Server(_))));
        // Initial attempt plus two retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
