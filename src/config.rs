// =============================================================================
// Configuration — client limits and watch-loop settings with atomic save
// =============================================================================
//
// Every tunable of the upstream client lives in `ClientConfig`; the binary's
// watchlist settings live in `WatchConfig`. Both load from JSON with
// `#[serde(default)]` on every field so older files keep loading after new
// fields are added, and both can be overridden from the environment.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.
// =============================================================================

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_base_url() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}

fn default_requests_per_window() -> u32 {
    25
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_min_gap_ms() -> u64 {
    1_200
}

fn default_window_margin_ms() -> u64 {
    50
}

fn default_price_ttl_ms() -> u64 {
    30_000
}

fn default_meta_ttl_ms() -> u64 {
    3_600_000
}

fn default_max_retries() -> u32 {
    4
}

fn default_backoff_base_ms() -> u64 {
    1_500
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_request_timeout_ms() -> u64 {
    12_000
}

fn default_assets() -> Vec<String> {
    vec![
        "bitcoin".to_string(),
        "ethereum".to_string(),
        "solana".to_string(),
    ]
}

fn default_currency() -> String {
    "usd".to_string()
}

fn default_interval_secs() -> u64 {
    60
}

fn default_state_path() -> PathBuf {
    PathBuf::from("tracker_state.json")
}

// =============================================================================
// ClientConfig
// =============================================================================

/// Limits and cache lifetimes for the upstream market-data client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL every request path is appended to.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Optional demo API key, sent as `x-cg-demo-api-key`.
    #[serde(default)]
    pub api_key: Option<String>,

    // --- Rate limiting ------------------------------------------------------

    /// Maximum dispatches inside one rolling window.
    #[serde(default = "default_requests_per_window")]
    pub requests_per_window: u32,

    /// Length of the rolling window.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Minimum spacing between two consecutive dispatches.
    #[serde(default = "default_min_gap_ms")]
    pub min_gap_ms: u64,

    /// Extra wait added once the window is full, so the oldest dispatch has
    /// definitely left it before we re-check.
    #[serde(default = "default_window_margin_ms")]
    pub window_margin_ms: u64,

    // --- Caching ------------------------------------------------------------

    #[serde(default = "default_price_ttl_ms")]
    pub price_ttl_ms: u64,

    #[serde(default = "default_meta_ttl_ms")]
    pub meta_ttl_ms: u64,

    // --- Retries ------------------------------------------------------------

    /// Total attempts allowed for one upstream call (first try included).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff step; doubles on each further attempt.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    // --- Batching & transport -----------------------------------------------

    /// Debounce window for coalescing concurrent price requests.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Wall-clock timeout for a single transport call.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            requests_per_window: default_requests_per_window(),
            window_ms: default_window_ms(),
            min_gap_ms: default_min_gap_ms(),
            window_margin_ms: default_window_margin_ms(),
            price_ttl_ms: default_price_ttl_ms(),
            meta_ttl_ms: default_meta_ttl_ms(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            debounce_ms: default_debounce_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ClientConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn min_gap(&self) -> Duration {
        Duration::from_millis(self.min_gap_ms)
    }

    pub fn window_margin(&self) -> Duration {
        Duration::from_millis(self.window_margin_ms)
    }

    pub fn price_ttl(&self) -> Duration {
        Duration::from_millis(self.price_ttl_ms)
    }

    pub fn meta_ttl(&self) -> Duration {
        Duration::from_millis(self.meta_ttl_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Apply `PRICEWATCH_BASE_URL` / `PRICEWATCH_API_KEY` if set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("PRICEWATCH_BASE_URL") {
            let url = url.trim().trim_end_matches('/');
            if !url.is_empty() {
                self.base_url = url.to_string();
            }
        }
        if let Ok(key) = std::env::var("PRICEWATCH_API_KEY") {
            let key = key.trim();
            if !key.is_empty() {
                self.api_key = Some(key.to_string());
            }
        }
    }
}

// =============================================================================
// WatchConfig
// =============================================================================

/// Settings for the watch loop run by the binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Upstream asset ids to track.
    #[serde(default = "default_assets")]
    pub assets: Vec<String>,

    /// Quote currency the tracker reduces prices in.
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Seconds between refreshes.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Where highest prices and histories are persisted.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,

    #[serde(default)]
    pub client: ClientConfig,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            assets: default_assets(),
            currency: default_currency(),
            interval_secs: default_interval_secs(),
            state_path: default_state_path(),
            client: ClientConfig::default(),
        }
    }
}

impl WatchConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read watch config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse watch config from {}", path.display()))?;

        info!(
            path = %path.display(),
            assets = ?config.assets,
            currency = %config.currency,
            "watch config loaded"
        );

        Ok(config)
    }

    /// Persist the configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise watch config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "watch config saved (atomic)");
        Ok(())
    }

    /// Apply environment overrides on top of the loaded file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(assets) = std::env::var("PRICEWATCH_ASSETS") {
            let parsed: Vec<String> = assets
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !parsed.is_empty() {
                self.assets = parsed;
            }
        }
        if let Ok(currency) = std::env::var("PRICEWATCH_CURRENCY") {
            let currency = currency.trim().to_lowercase();
            if !currency.is_empty() {
                self.currency = currency;
            }
        }
        if let Ok(raw) = std::env::var("PRICEWATCH_INTERVAL_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.interval_secs = secs,
                _ => warn!(value = %raw, "ignoring invalid PRICEWATCH_INTERVAL_SECS"),
            }
        }
        self.client.apply_env_overrides();
    }
}
