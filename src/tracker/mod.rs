// =============================================================================
// Price Tracker — per-asset rolling history, high-water mark and alerts
// =============================================================================
//
// Every observed price for an asset is reduced into:
//
//   - a bounded history of the last 24 samples (FIFO eviction)
//   - a persisted highest price that only moves up until explicitly reset
//   - a short-term trend over the last three samples
//   - alerts for new highs and large moves against the previous price
//
// State is cached in memory and written through to a `KeyValueStore` under
// `highest:{id}` and `history:{id}` so it survives restarts.
// =============================================================================

pub mod history;
pub mod store;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use self::history::{AssetHistory, PriceSample, Trend, MAX_SAMPLES};
pub use self::store::{JsonFileStore, KeyValueStore, MemoryStore};

/// Absolute move, in percent, that raises a `SignificantChange` alert.
const SIGNIFICANT_CHANGE_PCT: f64 = 5.0;
/// Absolute move that raises an `ExtremeVolatility` alert.
const EXTREME_VOLATILITY_PCT: f64 = 10.0;
/// Extreme moves at or above this are `High` severity.
const HIGH_SEVERITY_PCT: f64 = 20.0;

// ---------------------------------------------------------------------------
// Output types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    NewHigh,
    SignificantChange,
    ExtremeVolatility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    /// Only set on `ExtremeVolatility`.
    pub severity: Option<Severity>,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Result of feeding one observation into the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceChange {
    pub asset_id: String,
    pub highest_price: f64,
    /// `true` when this observation set a new high.
    pub price_changed: bool,
    pub price_change_percent: f64,
    pub alerts: Vec<Alert>,
    pub trend: Trend,
}

// ---------------------------------------------------------------------------
// PriceTracker
// ---------------------------------------------------------------------------

pub struct PriceTracker {
    store: Arc<dyn KeyValueStore>,
    histories: Mutex<HashMap<String, AssetHistory>>,
}

fn highest_key(asset_id: &str) -> String {
    format!("highest:{asset_id}")
}

fn history_key(asset_id: &str) -> String {
    format!("history:{asset_id}")
}

impl PriceTracker {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            histories: Mutex::new(HashMap::new()),
        }
    }

    /// Tracker backed by a process-local store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Reduce one observation of `asset_id`.
    ///
    /// `previous_price` and `prior_highest` are what the caller last saw; the
    /// returned `highest_price` never drops below either `prior_highest` or
    /// the persisted high. Non-positive prices are ignored.
    pub fn track_price_change(
        &self,
        asset_id: &str,
        current_price: f64,
        previous_price: f64,
        prior_highest: f64,
    ) -> Result<PriceChange> {
        let mut histories = self.histories.lock();
        let history = self.load_locked(&mut histories, asset_id)?;

        if !(current_price > 0.0) {
            debug!(asset = asset_id, price = current_price, "ignoring non-positive price");
            return Ok(PriceChange {
                asset_id: asset_id.to_string(),
                highest_price: prior_highest,
                price_changed: false,
                price_change_percent: 0.0,
                alerts: Vec::new(),
                trend: history.trend(),
            });
        }

        let now = Utc::now();
        let mut alerts = Vec::new();

        // --- High-water mark ------------------------------------------------
        // Memory only follows the store once a write has succeeded.
        let prior_saved = history.highest_price;
        if current_price > prior_saved {
            self.store
                .set(&highest_key(asset_id), serde_json::json!(current_price))
                .with_context(|| format!("failed to persist highest price for {asset_id}"))?;
            history.highest_price = current_price;
        }

        let effective_prior = prior_highest.max(prior_saved);
        let (highest_price, price_changed) = if current_price > effective_prior {
            alerts.push(Alert {
                kind: AlertKind::NewHigh,
                severity: None,
                message: format!(
                    "{asset_id} reached a new high of {current_price} (previous {effective_prior})"
                ),
                at: now,
            });
            (current_price, true)
        } else {
            (effective_prior, false)
        };

        // --- Move against previous observation ------------------------------
        let price_change_percent = if previous_price > 0.0 {
            (current_price - previous_price) / previous_price * 100.0
        } else {
            0.0
        };
        let magnitude = price_change_percent.abs();

        if magnitude >= SIGNIFICANT_CHANGE_PCT {
            alerts.push(Alert {
                kind: AlertKind::SignificantChange,
                severity: None,
                message: format!("{asset_id} moved {price_change_percent:+.2}%"),
                at: now,
            });
        }
        if magnitude >= EXTREME_VOLATILITY_PCT {
            let severity = if magnitude >= HIGH_SEVERITY_PCT {
                Severity::High
            } else {
                Severity::Medium
            };
            alerts.push(Alert {
                kind: AlertKind::ExtremeVolatility,
                severity: Some(severity),
                message: format!(
                    "extreme volatility on {asset_id}: {price_change_percent:+.2}% since last update"
                ),
                at: now,
            });
        }

        // --- History & trend ------------------------------------------------
        let mut next = history.clone();
        next.push(PriceSample {
            price: current_price,
            time: now.timestamp_millis(),
        });
        let samples = next.samples();
        self.store
            .set(&history_key(asset_id), serde_json::to_value(&samples)?)
            .with_context(|| format!("failed to persist history for {asset_id}"))?;
        *history = next;
        let trend = history.trend();

        for alert in &alerts {
            match alert.severity {
                Some(Severity::High) => warn!(asset = asset_id, kind = ?alert.kind, "{}", alert.message),
                _ => info!(asset = asset_id, kind = ?alert.kind, "{}", alert.message),
            }
        }
        debug!(
            asset = asset_id,
            price = current_price,
            highest = highest_price,
            pct = price_change_percent,
            samples = samples.len(),
            trend = %trend,
            "price tracked"
        );

        Ok(PriceChange {
            asset_id: asset_id.to_string(),
            highest_price,
            price_changed,
            price_change_percent,
            alerts,
            trend,
        })
    }

    /// Forget the persisted high for `asset_id`; the next positive price
    /// becomes the new mark.
    pub fn reset_highest(&self, asset_id: &str) -> Result<()> {
        let mut histories = self.histories.lock();
        let history = self.load_locked(&mut histories, asset_id)?;
        self.store
            .delete(&highest_key(asset_id))
            .with_context(|| format!("failed to reset highest price for {asset_id}"))?;
        history.highest_price = 0.0;
        info!(asset = asset_id, "highest price reset");
        Ok(())
    }

    pub fn clear_history(&self, asset_id: &str) -> Result<()> {
        let mut histories = self.histories.lock();
        let history = self.load_locked(&mut histories, asset_id)?;
        self.store
            .delete(&history_key(asset_id))
            .with_context(|| format!("failed to clear history for {asset_id}"))?;
        history.clear();
        info!(asset = asset_id, "price history cleared");
        Ok(())
    }

    /// Persisted high for `asset_id`, if one has been recorded.
    pub fn saved_highest(&self, asset_id: &str) -> Result<Option<f64>> {
        let mut histories = self.histories.lock();
        let history = self.load_locked(&mut histories, asset_id)?;
        Ok((history.highest_price > 0.0).then_some(history.highest_price))
    }

    /// Samples oldest-first.
    pub fn history(&self, asset_id: &str) -> Result<Vec<PriceSample>> {
        let mut histories = self.histories.lock();
        Ok(self.load_locked(&mut histories, asset_id)?.samples())
    }

    pub fn trend(&self, asset_id: &str) -> Result<Trend> {
        let mut histories = self.histories.lock();
        Ok(self.load_locked(&mut histories, asset_id)?.trend())
    }

    /// Fetch the in-memory history, loading it from the store on first use.
    fn load_locked<'a>(
        &self,
        histories: &'a mut HashMap<String, AssetHistory>,
        asset_id: &str,
    ) -> Result<&'a mut AssetHistory> {
        if !histories.contains_key(asset_id) {
            let highest = self
                .store
                .get(&highest_key(asset_id))?
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);
            let samples: Vec<PriceSample> = match self.store.get(&history_key(asset_id))? {
                Some(raw) => serde_json::from_value(raw)
                    .with_context(|| format!("corrupt stored history for {asset_id}"))?,
                None => Vec::new(),
            };
            debug!(
                asset = asset_id,
                highest,
                samples = samples.len(),
                "tracker state loaded"
            );
            histories.insert(
                asset_id.to_string(),
                AssetHistory::restore(asset_id, samples, highest),
            );
        }

        histories
            .get_mut(asset_id)
            .context("tracker history missing after load")
    }
}

impl std::fmt::Debug for PriceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceTracker")
            .field("loaded_assets", &self.histories.lock().len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
