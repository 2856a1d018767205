// =============================================================================
// Retry Executor — bounded exponential backoff around one upstream call
// =============================================================================
//
// Every attempt passes the rate limiter first. Only 429 and 5xx responses are
// retried; the wait is the server's Retry-After hint when it sent a positive
// one, otherwise `backoff_base * 2^(attempt - 1)`. Timeouts and every other
// failure surface on the first occurrence.
// =============================================================================

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use super::rate_limit::RateLimiter;
use crate::config::ClientConfig;
use crate::error::ApiResult;

/// Largest exponent applied to the backoff base.
const MAX_BACKOFF_SHIFT: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first try included.
    pub max_retries: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            backoff_base: config.backoff_base(),
        }
    }

    /// Backoff used when the server gave no hint. `attempt` starts at 1.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
        self.backoff_base.saturating_mul(1u32 << shift)
    }

    /// Run `operation` until it succeeds, fails terminally, or the attempt
    /// budget is spent. The last error is returned unchanged.
    pub async fn execute<T, F, Fut>(&self, limiter: &RateLimiter, mut operation: F) -> ApiResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ApiResult<T>>,
    {
        let mut attempt: u32 = 1;
        loop {
            limiter.gate().await;

            let err = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "upstream call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= self.max_retries {
                if err.is_retryable() {
                    warn!(attempt, error = %err, "retry budget exhausted");
                } else {
                    debug!(attempt, error = %err, "terminal upstream failure");
                }
                return Err(err);
            }

            let wait = err
                .retry_after()
                .unwrap_or_else(|| self.backoff_for(attempt));
            warn!(
                attempt,
                max_retries = self.max_retries,
                status = ?err.status(),
                wait_ms = wait.as_millis() as u64,
                hinted = err.retry_after().is_some(),
                "retryable upstream failure, backing off"
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
