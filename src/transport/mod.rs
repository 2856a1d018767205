// =============================================================================
// Transport — the seam between the client and the wire
// =============================================================================
//
// The client never talks to `reqwest` directly. It holds an
// `Arc<dyn Transport>`, so tests can swap in a scripted fake and the binary
// plugs in the HTTP implementation.
// =============================================================================

pub mod http;
#[cfg(test)]
pub(crate) mod mock;

pub use http::HttpTransport;

use async_trait::async_trait;

use crate::error::ApiResult;

/// A single read-only GET against the upstream API.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue `GET {base}{path}?{params}` and return the decoded JSON body.
    ///
    /// Non-success responses must be mapped through
    /// [`ApiError::from_status`](crate::error::ApiError::from_status) so the
    /// retry executor sees the status and any retry hint.
    async fn send(&self, path: &str, params: &[(String, String)]) -> ApiResult<serde_json::Value>;
}
