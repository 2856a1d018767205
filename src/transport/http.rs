// =============================================================================
// HTTP Transport — reqwest-backed GET client for the market-data API
// =============================================================================
//
// SECURITY: The API key is never logged or serialised; it only travels as the
// `x-cg-demo-api-key` header. Every call is bounded by the configured
// wall-clock timeout and a timeout is reported as `TransportTimeout`.
// =============================================================================

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, RETRY_AFTER};
use tracing::{debug, instrument, warn};

use super::Transport;
use crate::config::ClientConfig;
use crate::error::{ApiError, ApiResult};

/// Header carrying the optional demo API key.
const API_KEY_HEADER: &str = "x-cg-demo-api-key";

/// Upper bound on how much of an error body is kept in `RequestRejected`.
const MAX_ERROR_BODY: usize = 512;

#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpTransport {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Build a transport from the client configuration.
    pub fn new(config: &ClientConfig) -> anyhow::Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(key) = config.api_key.as_deref() {
            let val = HeaderValue::from_str(key)
                .map_err(|_| anyhow::anyhow!("API key contains invalid header characters"))?;
            default_headers.insert(API_KEY_HEADER, val);
        }

        let timeout = config.request_timeout();
        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build reqwest client: {e}"))?;

        let base_url = config.base_url.trim_end_matches('/').to_string();
        debug!(base_url = %base_url, timeout_ms = timeout.as_millis() as u64, "HttpTransport initialised");

        Ok(Self {
            base_url,
            timeout,
            client,
        })
    }

    fn map_send_error(&self, err: reqwest::Error) -> ApiError {
        if err.is_timeout() {
            ApiError::TransportTimeout(self.timeout)
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, params), name = "http::get")]
    async fn send(&self, path: &str, params: &[(String, String)]) -> ApiResult<serde_json::Value> {
        let url = format!("{}{}", self.base_url, path);

        let resp = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let mut body = resp.text().await.unwrap_or_default();
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            warn!(path, status = status.as_u16(), retry_after = ?retry_after, "upstream returned non-success status");
            return Err(ApiError::from_status(
                status.as_u16(),
                retry_after.as_deref(),
                body,
            ));
        }

        let body: serde_json::Value = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::TransportTimeout(self.timeout)
            } else {
                ApiError::Decode(format!("{path}: {e}"))
            }
        })?;

        debug!(path, "upstream response decoded");
        Ok(body)
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    use super::*;

    /// Transport pointed at a local listener; bypasses any proxy set in the
    /// environment.
    fn transport_for(base_url: String, timeout_ms: u64) -> HttpTransport {
        let timeout = Duration::from_millis(timeout_ms);
        HttpTransport {
            base_url,
            timeout,
            client: reqwest::Client::builder()
                .no_proxy()
                .timeout(timeout)
                .build()
                .unwrap(),
        }
    }

    /// Accept one connection, hand back its request head and answer with
    /// `response` verbatim.
    async fn serve_once(response: String) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (head_tx, head_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 1024];
            while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            let _ = head_tx.send(String::from_utf8_lossy(&buf).into_owned());
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });

        (format!("http://{addr}"), head_rx)
    }

    fn http_response(status_line: &str, extra_headers: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status_line}\r\n{extra_headers}Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn success_decodes_json_and_sends_query() {
        let (base, head) = serve_once(http_response(
            "200 OK",
            "Content-Type: application/json\r\n",
            r#"{"bitcoin":{"usd":65000.5}}"#,
        ))
        .await;
        let transport = transport_for(base, 2_000);

        let body = transport
            .send("/simple/price", &params(&[("ids", "bitcoin"), ("vs_currencies", "usd")]))
            .await
            .unwrap();
        assert_eq!(body["bitcoin"]["usd"].as_f64(), Some(65000.5));

        let head = head.await.unwrap();
        assert!(head.starts_with("GET /simple/price?ids=bitcoin&vs_currencies=usd "));
    }

    #[tokio::test]
    async fn too_many_requests_carries_retry_after() {
        let (base, _head) = serve_once(http_response(
            "429 Too Many Requests",
            "Retry-After: 2\r\n",
            "slow down",
        ))
        .await;
        let transport = transport_for(base, 2_000);

        let err = transport.send("/simple/price", &[]).await.unwrap_err();
        assert_eq!(
            err,
            ApiError::RateLimited {
                retry_after: Some(Duration::from_secs(2))
            }
        );
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn not_found_is_rejected_with_body() {
        let (base, _head) =
            serve_once(http_response("404 Not Found", "", r#"{"error":"coin not found"}"#)).await;
        let transport = transport_for(base, 2_000);

        let err = transport.send("/coins/nope", &[]).await.unwrap_err();
        assert_eq!(
            err,
            ApiError::RequestRejected {
                status: 404,
                body: r#"{"error":"coin not found"}"#.to_string()
            }
        );
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn long_error_body_is_cut_on_a_char_boundary() {
        // One ASCII byte then two-byte chars, so byte 512 falls mid-char.
        let body = format!("x{}", "é".repeat(600));
        let (base, _head) = serve_once(http_response("400 Bad Request", "", &body)).await;
        let transport = transport_for(base, 2_000);

        match transport.send("/simple/price", &[]).await.unwrap_err() {
            ApiError::RequestRejected { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body.len(), MAX_ERROR_BODY - 1);
                assert!(body.ends_with('é'));
            }
            other => panic!("expected RequestRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });
        let transport = transport_for(format!("http://{addr}"), 50);

        let err = transport.send("/simple/price", &[]).await.unwrap_err();
        assert_eq!(err, ApiError::TransportTimeout(Duration::from_millis(50)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let cfg = ClientConfig {
            base_url: "https://example.test/api/v3/".into(),
            ..ClientConfig::default()
        };
        let transport = HttpTransport::new(&cfg).unwrap();
        assert_eq!(transport.base_url, "https://example.test/api/v3");
        assert_eq!(transport.timeout, Duration::from_secs(12));
    }

    #[test]
    fn debug_output_omits_api_key() {
        let cfg = ClientConfig {
            api_key: Some("super-secret".into()),
            ..ClientConfig::default()
        };
        let transport = HttpTransport::new(&cfg).unwrap();
        let rendered = format!("{transport:?}");
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn rejects_unprintable_api_key() {
        let cfg = ClientConfig {
            api_key: Some("bad\nkey".into()),
            ..ClientConfig::default()
        };
        assert!(HttpTransport::new(&cfg).is_err());
    }
}
