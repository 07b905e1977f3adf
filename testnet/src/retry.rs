//! Retry transient failures with exponential backoff.
//!
//! A [RetryPolicy] is passed explicitly to every call site that polls: readiness checks retry
//! forever (until canceled) while height polling gives up after a fixed number of attempts.

use crate::Error;
use std::{future::Future, time::Duration};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Exponential delay between attempts: `base * 2^attempt`, never exceeding `cap`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Backoff {
    pub const fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay to wait after the `attempt`-th failure (starting at 0).
    pub fn delay(&self, attempt: usize) -> Duration {
        let factor = u32::try_from(attempt)
            .ok()
            .and_then(|shift| 1u32.checked_shl(shift))
            .unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// How many times to attempt an operation and how long to wait in between.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (`None` retries until canceled).
    pub attempts: Option<usize>,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub const fn unbounded(backoff: Backoff) -> Self {
        Self {
            attempts: None,
            backoff,
        }
    }

    /// A policy making at most `attempts` attempts (at least one attempt is always made).
    pub const fn bounded(attempts: usize, backoff: Backoff) -> Self {
        Self {
            attempts: Some(attempts),
            backoff,
        }
    }

    /// Run `op` until it succeeds, fails with a non-transient error, exhausts the policy or
    /// `token` is canceled.
    ///
    /// If the policy is exhausted, the last transient error is returned.
    pub async fn run<T, F, Fut>(&self, token: &CancellationToken, mut op: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::Canceled),
                result = op() => result,
            };
            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) => err,
            };
            attempt += 1;
            if let Some(max) = self.attempts {
                if attempt >= max {
                    return Err(err);
                }
            }

            // Wait before the next attempt
            let delay = self.backoff.delay(attempt - 1);
            debug!(attempt, ?delay, error = %err, "retrying");
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(Error::Canceled),
                _ = sleep(delay) => {},
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn backoff() -> Backoff {
        Backoff::new(Duration::from_millis(100), Duration::from_secs(1))
    }

    fn transient() -> Error {
        Error::Query {
            endpoint: "localhost:26657".into(),
            reason: "connection refused".into(),
        }
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let backoff = backoff();
        assert_eq!(backoff.delay(0), Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(800));
        assert_eq!(backoff.delay(4), Duration::from_secs(1));
        assert_eq!(backoff.delay(64), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_stops_after_attempts() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let policy = RetryPolicy::bounded(15, backoff());
        let result: Result<(), _> = policy
            .run(&CancellationToken::new(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            })
            .await;
        assert!(matches!(result, Err(Error::Query { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let policy = RetryPolicy::unbounded(backoff());
        let result = policy
            .run(&CancellationToken::new(), move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 20 {
                    return Err(transient());
                }
                Ok(42)
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 21);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let policy = RetryPolicy::unbounded(backoff());
        let result: Result<(), _> = policy
            .run(&CancellationToken::new(), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::InvalidInput("bad".into()))
            })
            .await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let token = CancellationToken::new();
        let canceler = token.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(5)).await;
            canceler.cancel();
        });
        let policy = RetryPolicy::unbounded(backoff());
        let result: Result<(), _> = policy.run(&token, || async { Err(transient()) }).await;
        assert!(matches!(result, Err(Error::Canceled)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_canceled_before_first_attempt() {
        let token = CancellationToken::new();
        token.cancel();
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let policy = RetryPolicy::bounded(3, backoff());
        let result = policy
            .run(&token, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::Canceled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
