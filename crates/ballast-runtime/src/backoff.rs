use crate::error::{Result, RuntimeError};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Exponential backoff for retried cluster operations
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base: Duration,
    /// Upper bound for any single delay
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base: Duration::from_millis(200),
            max: Duration::from_secs(10),
        }
    }
}

impl BackoffPolicy {
    /// Delay after the given failed attempt (0-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Run `op` until it succeeds, fails permanently, runs out of attempts or
    /// the token is cancelled. Only transient errors are retried.
    pub async fn retry<T, F, Fut>(
        &self,
        operation: &str,
        token: &CancellationToken,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ballast_core::Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if token.is_cancelled() {
                return Err(RuntimeError::cancelled(operation));
            }

            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e.into()),
                Err(e) => e,
            };

            attempt += 1;
            if attempt >= attempts {
                warn!("{} failed after {} attempts: {}", operation, attempt, err);
                return Err(RuntimeError::retries_exhausted(
                    operation,
                    attempt,
                    err.to_string(),
                ));
            }

            let delay = self.delay(attempt - 1);
            debug!(
                "{} failed (attempt {}/{}), retrying in {:?}: {}",
                operation, attempt, attempts, delay, err
            );

            if !sleep_or_cancel(delay, token).await {
                return Err(RuntimeError::cancelled(operation));
            }
        }
    }
}

/// Sleep for `delay`; returns false if the token fired first
pub async fn sleep_or_cancel(delay: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
