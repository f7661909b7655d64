//! Exponential backoff for provider submission calls.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{error, warn};

use crate::provider::ProviderError;

/// Default first backoff step.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
/// Default ceiling on submission attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Outcome of classifying a failed attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryDecision {
    /// Sleep for the given duration and try again.
    Retry(Duration),
    /// Abort immediately.
    Fail,
}

/// Errors surfaced once a submission gives up.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RetryError {
    /// The provider rejected the call with a non-retryable error.
    #[error("{action} failed: {source}")]
    Fatal {
        /// Action being submitted.
        action: String,
        /// Error returned by the provider.
        #[source]
        source: ProviderError,
    },
    /// Every attempt failed with a transient error.
    #[error("{action} failed after {attempts} attempts")]
    Exhausted {
        /// Action being submitted.
        action: String,
        /// Number of attempts made.
        attempts: u32,
    },
}

/// Classifies provider errors and computes backoff delays.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    base: Duration,
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    /// Creates a policy with a custom base delay and attempt ceiling.
    #[must_use]
    pub const fn new(base: Duration, max_attempts: u32) -> Self {
        Self { base, max_attempts }
    }

    /// Total attempts allowed.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait before retrying after the zero-indexed `attempt`: `base * 2^attempt`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor)
    }

    /// Decides whether the failed `attempt` should be retried.
    #[must_use]
    pub fn decide(&self, err: &ProviderError, attempt: u32) -> RetryDecision {
        if err.is_retryable() && attempt < self.max_attempts {
            RetryDecision::Retry(self.delay_for(attempt))
        } else {
            RetryDecision::Fail
        }
    }

    /// Runs `call` until it succeeds, fails fatally, or exhausts the policy.
    ///
    /// A sleep follows every transient failure, including the last one, so a
    /// fully exhausted run waits `base * (2^max_attempts - 1)` in total.
    ///
    /// # Errors
    ///
    /// Returns [`RetryError::Fatal`] on the first non-retryable error and
    /// [`RetryError::Exhausted`] once the attempt ceiling is reached.
    pub async fn submit<T, F, Fut>(&self, action: &str, mut call: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        for attempt in 0..self.max_attempts {
            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match self.decide(&err, attempt) {
                RetryDecision::Retry(wait) => {
                    warn!(
                        action,
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "retryable provider error"
                    );
                    sleep(wait).await;
                }
                RetryDecision::Fail => {
                    error!(action, error = %err, "non-retryable provider error");
                    return Err(RetryError::Fatal {
                        action: action.to_owned(),
                        source: err,
                    });
                }
            }
        }

        error!(
            action,
            attempts = self.max_attempts,
            "provider retries exhausted"
        );
        Err(RetryError::Exhausted {
            action: action.to_owned(),
            attempts: self.max_attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(1), 5)
    }

    #[test]
    fn delays_double_from_base() {
        let delays: Vec<_> = (0..5).map(|attempt| policy().delay_for(attempt)).collect();
        assert_eq!(
            delays,
            [1, 2, 4, 8, 16].map(Duration::from_secs).to_vec()
        );
    }

    #[test]
    fn delay_saturates_on_large_attempts() {
        assert_eq!(policy().delay_for(200), Duration::from_secs(1).saturating_mul(u32::MAX));
    }

    #[test]
    fn client_errors_are_never_retried() {
        let err = ProviderError::with_status(404, "missing");
        assert_eq!(policy().decide(&err, 0), RetryDecision::Fail);
    }

    #[tokio::test(start_paused = true)]
    async fn server_errors_exhaust_after_five_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let started = Instant::now();

        let result: Result<(), RetryError> = policy()
            .submit("create", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::with_status(503, "busy")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                action: String::from("create"),
                attempts: 5,
            })
        );
        let elapsed = started.elapsed();
        assert!(
            elapsed >= Duration::from_secs(31) && elapsed < Duration::from_secs(32),
            "unexpected total backoff: {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_stops_without_sleeping() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let started = Instant::now();

        let result: Result<(), RetryError> = policy()
            .submit("delete", || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(ProviderError::fatal("no status")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(RetryError::Fatal { .. })));
        assert!(started.elapsed() < Duration::from_millis(1));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = policy()
            .submit("create", || {
                let seen = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if seen < 2 {
                        Err(ProviderError::with_status(500, "flaky"))
                    } else {
                        Ok(seen)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(2));
    }
}
