// =============================================================================
// Upstream — gated, retried dispatch to the market-data API
// =============================================================================
//
// Every real request passes the shared rate limiter and then the retry
// policy before it reaches the transport. Cache hits never get here.
// =============================================================================

use std::sync::Arc;

use serde_json::Value;

use super::rate_limit::{RateLimiter, RateLimits};
use super::retry::RetryPolicy;
use crate::config::ClientConfig;
use crate::error::ApiResult;
use crate::transport::Transport;

/// Transport plus the policies every real dispatch goes through.
///
/// Cheap to clone; all clones share one rate-limit ledger.
#[derive(Clone)]
pub(crate) struct Upstream {
    transport: Arc<dyn Transport>,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl Upstream {
    pub fn new(config: &ClientConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            limiter: RateLimiter::new(RateLimits::from_config(config)),
            retry: RetryPolicy::from_config(config),
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Gated, retried GET.
    pub async fn get(&self, path: &str, params: Vec<(String, String)>) -> ApiResult<Value> {
        let transport = &self.transport;
        let params = &params;
        self.retry
            .execute(&self.limiter, || transport.send(path, params))
            .await
    }
}
