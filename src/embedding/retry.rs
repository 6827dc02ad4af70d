//! Retry policy for provider calls.
//!
//! Rate-limit responses back off exponentially (`base_delay × 2^attempt`,
//! capped at `max_delay`, or the provider's `Retry-After` when it sends one).
//! Other transient failures retry a fixed number of times with a flat delay.
//! Fatal errors are returned immediately.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::embedding::ProviderError;

/// Retry limits and delays.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries allowed after rate-limit responses
    pub rate_limit_retries: u32,

    /// First backoff delay for rate limits, doubled on every retry
    pub base_delay: Duration,

    /// Upper bound for any single backoff delay
    pub max_delay: Duration,

    /// Retries allowed after other transient failures
    pub transient_retries: u32,

    /// Flat delay between transient retries
    pub transient_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            rate_limit_retries: config.rate_limit_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            transient_retries: config.transient_retries,
            transient_delay: Duration::from_millis(config.transient_delay_ms),
        }
    }
}

/// Outcome of a call that gave up.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryExhausted {
    /// Total number of calls made, including the first one
    pub attempts: u32,

    /// Error returned by the last call
    pub last_error: ProviderError,
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            rate_limit_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            transient_retries: 0,
            transient_delay: Duration::ZERO,
        }
    }

    /// Backoff before rate-limit retry number `attempt` (0-based).
    #[must_use]
    pub fn rate_limit_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        retry_after.unwrap_or(exponential).min(self.max_delay)
    }

    /// Runs `operation` until it succeeds, fails fatally, or runs out of
    /// retries.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, RetryExhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut rate_limited = 0u32;
        let mut transient = 0u32;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let delay = match &error {
                ProviderError::RateLimited { retry_after, .. }
                    if rate_limited < self.rate_limit_retries =>
                {
                    let delay = self.rate_limit_delay(rate_limited, *retry_after);
                    rate_limited += 1;
                    Some(delay)
                }
                ProviderError::Transient(_) if transient < self.transient_retries => {
                    transient += 1;
                    Some(self.transient_delay)
                }
                _ => None,
            };
            let Some(delay) = delay else {
                warn!(
                    attempts,
                    retryable = error.is_retryable(),
                    error = %error,
                    "Embedding request failed, giving up"
                );
                return Err(RetryExhausted {
                    attempts,
                    last_error: error,
                });
            };

            debug!(
                attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying embedding request"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
