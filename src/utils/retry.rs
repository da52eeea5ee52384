//! Polling loop for eventually consistent API reads.

use std::future::Future;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::{ApplyError, ProviderError, Result};

/// Outcome of one polling attempt that did not succeed.
#[derive(Debug)]
pub enum RetryError {
    /// Try again after the interval.
    Retryable(ProviderError),
    /// Stop immediately with this error.
    Fatal(ProviderError),
}

/// When to stop polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// Give up once this much time has passed.
    Timeout(Duration),
    /// Give up after this many attempts.
    Attempts(u32),
}

/// Calls `f` every `interval` until it succeeds, fails fatally, or the
/// deadline passes. On expiry the last retryable error is returned.
///
/// # Errors
///
/// Returns the fatal error, or the last retryable error once the deadline passes.
pub async fn retry<T, F, Fut>(deadline: Deadline, interval: Duration, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, RetryError>>,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let err = match f().await {
            Ok(value) => return Ok(value),
            Err(RetryError::Fatal(err)) => return Err(err),
            Err(RetryError::Retryable(err)) => err,
        };

        let exhausted = match deadline {
            Deadline::Timeout(limit) => started.elapsed() + interval > limit,
            Deadline::Attempts(max) => attempt >= max,
        };
        if exhausted {
            debug!("Giving up after {attempt} attempt(s): {err}");
            return Err(err);
        }

        debug!("Attempt {attempt} not done yet: {err}");
        tokio::time::sleep(interval).await;
    }
}

/// [`retry`] bounded by a wall-clock timeout.
///
/// # Errors
///
/// See [`retry`].
pub async fn retry_with_timeout<T, F, Fut>(timeout: Duration, interval: Duration, f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, RetryError>>,
{
    retry(Deadline::Timeout(timeout), interval, f).await
}

/// Wraps a retryable error so the caller can tell the budget ran out.
#[must_use]
pub fn exhausted(attempts: u32, resource: impl Into<String>) -> ProviderError {
    ApplyError::MaxRetriesExceeded {
        attempts,
        resource: resource.into(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry(Deadline::Attempts(5), Duration::from_millis(1), || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(RetryError::Retryable(ProviderError::internal("not yet")))
            } else {
                Ok(n)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> = retry(Deadline::Attempts(2), Duration::from_millis(1), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(RetryError::Retryable(ProviderError::internal("still there")))
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fatal_stops_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<()> =
            retry_with_timeout(Duration::from_secs(5), Duration::from_millis(1), || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(RetryError::Fatal(ProviderError::internal("bad request")))
            })
            .await;

        tokio_test::assert_err!(result);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
