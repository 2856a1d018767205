// =============================================================================
// Upstream error taxonomy
// =============================================================================
//
// Every failure on the request path is classified into one of these variants
// so the retry executor can decide between backing off and surfacing the
// error. Errors are `Clone` because one failed batch fails every waiter
// registered against it with the same value.
// =============================================================================

use std::time::Duration;

use thiserror::Error;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    /// HTTP 429. Retried, honoring `retry_after` when the server sent one.
    #[error("upstream rate limit hit (429)")]
    RateLimited { retry_after: Option<Duration> },

    /// HTTP 5xx. Retried with the same policy as `RateLimited`.
    #[error("upstream unavailable ({status})")]
    UpstreamUnavailable {
        status: u16,
        retry_after: Option<Duration>,
    },

    /// Any other non-success status. Never retried.
    #[error("request rejected ({status}): {body}")]
    RequestRejected { status: u16, body: String },

    /// No response within the per-call timeout. Never retried.
    #[error("no response within {0:?}")]
    TransportTimeout(Duration),

    /// Connection-level failure with no status code.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The upstream answered with a payload we could not interpret.
    #[error("malformed upstream payload: {0}")]
    Decode(String),
}

impl ApiError {
    /// Classify a non-success HTTP response.
    ///
    /// `retry_after` is the raw `Retry-After` header value; only a positive
    /// number of seconds is honored.
    pub fn from_status(status: u16, retry_after: Option<&str>, body: impl Into<String>) -> Self {
        let hint = retry_after.and_then(parse_retry_after);
        match status {
            429 => Self::RateLimited { retry_after: hint },
            500..=599 => Self::UpstreamUnavailable {
                status,
                retry_after: hint,
            },
            _ => Self::RequestRejected {
                status,
                body: body.into(),
            },
        }
    }

    /// HTTP status, if the failure carried one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::UpstreamUnavailable { status, .. } | Self::RequestRejected { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::UpstreamUnavailable { .. }
        )
    }

    /// Server-supplied wait hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } | Self::UpstreamUnavailable { retry_after, .. } => {
                *retry_after
            }
            _ => None,
        }
    }
}

fn parse_retry_after(raw: &str) -> Option<Duration> {
    let secs: f64 = raw.trim().parse().ok()?;
    if secs > 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statuses() {
        assert!(matches!(
            ApiError::from_status(429, None, ""),
            ApiError::RateLimited { retry_after: None }
        ));
        assert!(matches!(
            ApiError::from_status(503, None, ""),
            ApiError::UpstreamUnavailable { status: 503, .. }
        ));
        assert!(matches!(
            ApiError::from_status(404, None, "not found"),
            ApiError::RequestRejected { status: 404, .. }
        ));
    }

    #[test]
    fn only_429_and_5xx_are_retryable() {
        assert!(ApiError::from_status(429, None, "").is_retryable());
        assert!(ApiError::from_status(500, None, "").is_retryable());
        assert!(ApiError::from_status(599, None, "").is_retryable());
        assert!(!ApiError::from_status(400, None, "").is_retryable());
        assert!(!ApiError::from_status(600, None, "").is_retryable());
        assert!(!ApiError::TransportTimeout(Duration::from_secs(12)).is_retryable());
        assert!(!ApiError::Transport("reset".into()).is_retryable());
    }

    #[test]
    fn retry_after_must_be_positive_seconds() {
        let err = ApiError::from_status(429, Some("2"), "");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));

        let err = ApiError::from_status(429, Some("0"), "");
        assert_eq!(err.retry_after(), None);

        let err = ApiError::from_status(429, Some("-3"), "");
        assert_eq!(err.retry_after(), None);

        let err = ApiError::from_status(503, Some("Wed, 21 Oct 2015 07:28:00 GMT"), "");
        assert_eq!(err.retry_after(), None);
        assert_eq!(err.status(), Some(503));
    }
}
