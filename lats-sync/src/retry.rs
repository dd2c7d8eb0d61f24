//! Bounded exponential-backoff retry for idempotent reads.

use lats_core::{LatsError, LatsResult, RetryConfig, TransientKind};
use std::future::Future;
use std::time::Duration;

/// One scheduled retry: which attempt failed, how long we wait, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAttempt {
    pub attempt_number: u32,
    pub delay: Duration,
    pub error_class: &'static str,
}

/// Retries an operation while it fails with a transient network error.
///
/// Only [`LatsError::Transient`] is retried. Everything else propagates on
/// first occurrence. Wrapped operations must be safe to repeat.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// `base_delay * 2^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.config
            .base_delay()
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
            .min(self.config.max_delay())
    }

    pub async fn execute<T, F, Fut>(&self, operation: F) -> LatsResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LatsResult<T>>,
    {
        self.execute_observed(operation, |_| {}).await
    }

    /// Like [`execute`](Self::execute), reporting every scheduled retry to
    /// `on_retry` before sleeping.
    pub async fn execute_observed<T, F, Fut, O>(&self, mut operation: F, mut on_retry: O) -> LatsResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = LatsResult<T>>,
        O: FnMut(&RetryAttempt),
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = match self.config.attempt_timeout() {
                Some(limit) => match tokio::time::timeout(limit, operation()).await {
                    Ok(result) => result,
                    Err(_) => Err(LatsError::transient(
                        TransientKind::Timeout,
                        format!("attempt exceeded {}ms", limit.as_millis()),
                    )),
                },
                None => operation().await,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !err.is_transient() || attempt >= max_attempts {
                return Err(err);
            }

            let retry = RetryAttempt {
                attempt_number: attempt,
                delay: self.delay_for(attempt),
                error_class: err.class(),
            };
            tracing::warn!(
                attempt = retry.attempt_number,
                max_attempts,
                delay_ms = retry.delay.as_millis() as u64,
                error_class = retry.error_class,
                error = %err,
                "Transient failure, retrying"
            );
            on_retry(&retry);
            tokio::time::sleep(retry.delay).await;
            attempt += 1;
        }
    }
}
