// Retry policy for optimistic store transactions.
// An attempt re-reads, re-stages and commits; only write conflicts are retried.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::config::LedgerConfig;
use crate::observability::{workflow_metrics, WorkflowMetrics};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::from(&LedgerConfig::default())
    }
}

impl From<&LedgerConfig> for RetryConfig {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            jitter: true,
        }
    }
}

/// Errors that know whether another attempt could succeed.
pub trait Retryable: Sized {
    fn is_retryable(&self) -> bool;

    /// Error surfaced once every attempt hit contention.
    fn exhausted(operation: &str, attempts: u32) -> Self;

    /// Count one retried conflict against the counter owned by this error's
    /// subsystem.
    fn record_conflict(metrics: &WorkflowMetrics);
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Exponential backoff for the given (1-based) attempt, capped and
    /// optionally jittered down to as little as half the nominal delay.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let nominal = self
            .config
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.config.max_delay);

        if !self.config.jitter || nominal.is_zero() {
            return nominal;
        }
        let nominal_ms = nominal.as_millis() as u64;
        let jittered = rand::rng().random_range(nominal_ms / 2..=nominal_ms);
        Duration::from_millis(jittered)
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or runs out of attempts.
    pub async fn execute_with_retry<T, E, F, Fut>(&self, operation: &str, attempt_fn: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        self.execute_recorded(operation, workflow_metrics(), attempt_fn).await
    }

    /// `execute_with_retry` with conflicts counted on the given metrics.
    pub async fn execute_recorded<T, E, F, Fut>(
        &self,
        operation: &str,
        metrics: &WorkflowMetrics,
        mut attempt_fn: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let mut attempt = 1;
        loop {
            match attempt_fn().await {
                Ok(value) => {
                    debug!(operation = %operation, attempt, "Atomic operation committed");
                    return Ok(value);
                }
                Err(e) if e.is_retryable() => {
                    E::record_conflict(metrics);
                    if attempt >= self.config.max_attempts {
                        error!(
                            operation = %operation,
                            attempts = attempt,
                            "Giving up after repeated write conflicts"
                        );
                        return Err(E::exhausted(operation, attempt));
                    }
                    let delay = self.delay_for(attempt);
                    warn!(
                        operation = %operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Write conflict, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
