//! Polling of provider-side asynchronous operations.

use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep};
use tracing::{debug, error, info};

use crate::provider::{
    CloudProvider, OperationHandle, OperationStatus, ProviderError, Submission,
};

/// Default delay between status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Errors raised while waiting for an operation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OperationError {
    /// The status check itself failed; status checks are not retried.
    #[error("failed to check status of operation {token} in zone {zone}: {source}")]
    Poll {
        /// Zone of the operation.
        zone: String,
        /// Operation identifier.
        token: String,
        /// Underlying provider failure.
        #[source]
        source: ProviderError,
    },
    /// The operation completed with an embedded error.
    #[error("operation {token} in zone {zone} failed: {message}")]
    Failed {
        /// Zone of the operation.
        zone: String,
        /// Operation identifier.
        token: String,
        /// Error text reported by the provider.
        message: String,
    },
    /// The optional wait bound elapsed before the operation finished.
    #[error("operation {token} in zone {zone} still pending after {} seconds", timeout.as_secs())]
    Timeout {
        /// Zone of the operation.
        zone: String,
        /// Operation identifier.
        token: String,
        /// Configured bound.
        timeout: Duration,
    },
}

/// Polls an [`OperationHandle`] until the provider reports a final status.
///
/// Without a timeout the loop is unbounded: an operation stuck in a pending
/// state keeps the caller waiting. [`OperationWaiter::with_timeout`] adds an
/// upper bound.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OperationWaiter {
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl Default for OperationWaiter {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl OperationWaiter {
    /// Creates an unbounded waiter with the given poll interval.
    #[must_use]
    pub const fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            timeout: None,
        }
    }

    /// Bounds the wait; `None` restores the unbounded loop.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Waits for `submission` to finish, returning at once when the provider
    /// completed it synchronously.
    ///
    /// # Errors
    ///
    /// See [`OperationWaiter::wait`].
    pub async fn await_submission<P>(
        &self,
        provider: &P,
        submission: &Submission,
    ) -> Result<(), OperationError>
    where
        P: CloudProvider + ?Sized,
    {
        match &submission.operation {
            Some(operation) => self.wait(provider, operation).await,
            None => {
                debug!(
                    resource_id = %submission.resource_id,
                    "provider completed the request synchronously"
                );
                Ok(())
            }
        }
    }

    /// Re-fetches the operation status every poll interval until it is
    /// terminal.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::Poll`] when a status check fails,
    /// [`OperationError::Failed`] when the operation carries an error, and
    /// [`OperationError::Timeout`] when a configured bound elapses.
    pub async fn wait<P>(&self, provider: &P, operation: &OperationHandle) -> Result<(), OperationError>
    where
        P: CloudProvider + ?Sized,
    {
        let deadline = self.timeout.map(|limit| Instant::now() + limit);
        loop {
            let status = provider
                .operation_status(operation)
                .await
                .map_err(|source| OperationError::Poll {
                    zone: operation.zone.clone(),
                    token: operation.token.clone(),
                    source,
                })?;

            match status {
                OperationStatus::Done => {
                    info!(operation = %operation.token, zone = %operation.zone, "operation completed");
                    return Ok(());
                }
                OperationStatus::Failed { message } => {
                    error!(operation = %operation.token, zone = %operation.zone, %message, "operation failed");
                    return Err(OperationError::Failed {
                        zone: operation.zone.clone(),
                        token: operation.token.clone(),
                        message,
                    });
                }
                OperationStatus::Pending { state } => {
                    info!(operation = %operation.token, %state, "waiting for operation");
                }
            }

            let delay = match (self.timeout, deadline) {
                (Some(limit), Some(at)) => {
                    let now = Instant::now();
                    if now >= at {
                        return Err(OperationError::Timeout {
                            zone: operation.zone.clone(),
                            token: operation.token.clone(),
                            timeout: limit,
                        });
                    }
                    // Poll once more exactly at the deadline.
                    self.poll_interval.min(at - now)
                }
                _ => self.poll_interval,
            };
            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedProvider;

    fn handle() -> OperationHandle {
        OperationHandle {
            zone: String::from("z1"),
            token: String::from("op-1"),
        }
    }

    fn pending() -> Result<OperationStatus, ProviderError> {
        Ok(OperationStatus::Pending {
            state: String::from("RUNNING"),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn returns_after_pending_responses_drain() {
        let provider = ScriptedProvider::new();
        for _ in 0..3 {
            provider.push_status(pending());
        }
        provider.push_status(Ok(OperationStatus::Done));

        OperationWaiter::default()
            .wait(&provider, &handle())
            .await
            .expect("operation should complete");

        assert_eq!(provider.status_polls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn embedded_error_is_fatal() {
        let provider = ScriptedProvider::new();
        provider.push_status(pending());
        provider.push_status(Ok(OperationStatus::Failed {
            message: String::from("quota exceeded"),
        }));

        let err = OperationWaiter::default()
            .wait(&provider, &handle())
            .await
            .expect_err("failed operation should surface");

        assert!(
            matches!(err, OperationError::Failed { ref message, .. } if message == "quota exceeded"),
            "unexpected error: {err}"
        );
        assert_eq!(provider.status_polls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn status_check_failure_is_not_retried() {
        let provider = ScriptedProvider::new();
        provider.push_status(Err(ProviderError::with_status(503, "unavailable")));
        provider.push_status(Ok(OperationStatus::Done));

        let err = OperationWaiter::default()
            .wait(&provider, &handle())
            .await
            .expect_err("poll failure should surface");

        assert!(matches!(err, OperationError::Poll { .. }));
        assert_eq!(provider.status_polls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn optional_timeout_bounds_pending_operation() {
        let provider = ScriptedProvider::new();
        for _ in 0..10 {
            provider.push_status(pending());
        }

        let started = Instant::now();

        let err = OperationWaiter::default()
            .with_timeout(Some(Duration::from_secs(5)))
            .wait(&provider, &handle())
            .await
            .expect_err("pending operation should time out");

        assert!(matches!(err, OperationError::Timeout { .. }));
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert_eq!(provider.status_polls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn operation_finishing_at_the_bound_succeeds() {
        let provider = ScriptedProvider::new();
        for _ in 0..3 {
            provider.push_status(pending());
        }
        provider.push_status(Ok(OperationStatus::Done));

        OperationWaiter::default()
            .with_timeout(Some(Duration::from_secs(5)))
            .wait(&provider, &handle())
            .await
            .expect("timeout must not fire before five seconds have passed");

        assert_eq!(provider.status_polls(), 4);
    }

    #[tokio::test]
    async fn synchronous_submission_skips_polling() {
        let provider = ScriptedProvider::new();

        OperationWaiter::default()
            .await_submission(&provider, &Submission::completed("disk-1"))
            .await
            .expect("completed submission needs no wait");

        assert_eq!(provider.status_polls(), 0);
    }
}
