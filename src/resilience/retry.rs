// src/resilience/retry.rs

use std::future::Future;
use tracing::{debug, warn};

use crate::error::{ErrorClass, GuardError, Result};
use crate::resilience::exponential_backoff::{ExponentialBackoff, RetryConfig};

/// Re-invokes a fallible async operation on a chosen set of error classes.
///
/// Side effects of a failed attempt are not undone, so operations passed to
/// [`RetryPolicy::run`] should be idempotent.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    retry_on: Vec<ErrorClass>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Retries `StoreUnavailable` only
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            retry_on: vec![ErrorClass::StoreUnavailable],
        }
    }

    /// Replaces the set of retried error classes
    pub fn retry_on(mut self, classes: impl IntoIterator<Item = ErrorClass>) -> Self {
        self.retry_on = classes.into_iter().collect();
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn should_retry(&self, err: &GuardError) -> bool {
        self.retry_on.contains(&err.class())
    }

    /// Runs `op` until it succeeds, fails with a non-retried error, or all
    /// attempts are spent. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = ExponentialBackoff::new(self.config.clone());
        let mut attempt = 1;

        loop {
            let err = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !self.should_retry(&err) {
                return Err(err);
            }

            let Some(delay) = backoff.next_backoff() else {
                warn!(attempts = attempt, error = %err, "Giving up after final attempt");
                return Err(err);
            };

            warn!(
                attempt,
                max_attempts = self.config.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Operation failed, retrying"
            );

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
