// =============================================================================
// Watch Service — periodic refresh of a watchlist into the price tracker
// =============================================================================
//
// One `refresh()` fetches every watched asset in a single coalesced call,
// then feeds each quoted price into the tracker together with the price and
// high this service saw last time. When the upstream fails the error is
// returned alongside the last cached prices so the caller can keep showing
// something.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::gecko::GeckoClient;
use crate::tracker::{PriceChange, PriceTracker};
use crate::types::{AssetIds, CurrencySet, PriceMap};

/// Per-asset outcome of one refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetUpdate {
    pub asset_id: String,
    /// `None` when the upstream had no quote for this asset.
    pub price: Option<f64>,
    /// `None` when there was no price to track.
    pub change: Option<PriceChange>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Fresh(Vec<AssetUpdate>),
    Degraded { error: ApiError, last_known: PriceMap },
}

#[derive(Debug, Clone, Copy)]
struct LastSeen {
    price: f64,
    highest: f64,
}

pub struct WatchService {
    client: GeckoClient,
    tracker: Arc<PriceTracker>,
    assets: AssetIds,
    currency: String,
    last: Mutex<HashMap<String, LastSeen>>,
}

impl WatchService {
    pub fn new(
        client: GeckoClient,
        tracker: Arc<PriceTracker>,
        assets: impl Into<AssetIds>,
        currency: &str,
    ) -> Self {
        Self {
            client,
            tracker,
            assets: assets.into(),
            currency: currency.trim().to_lowercase(),
            last: Mutex::new(HashMap::new()),
        }
    }

    pub fn assets(&self) -> &AssetIds {
        &self.assets
    }

    pub fn tracker(&self) -> &PriceTracker {
        &self.tracker
    }

    /// Fetch the watchlist once and push every quoted price into the tracker.
    ///
    /// Upstream failures are not errors here; they come back as
    /// `RefreshOutcome::Degraded`. Only tracker persistence failures are.
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        let currencies = CurrencySet::from(self.currency.as_str());

        let prices = match self.client.get_prices(self.assets.clone(), currencies.clone()).await {
            Ok(prices) => prices,
            Err(error) => {
                let last_known = self.client.last_known_prices(self.assets.clone(), currencies);
                warn!(
                    error = %error,
                    stale_assets = last_known.len(),
                    "refresh failed, serving last known prices"
                );
                return Ok(RefreshOutcome::Degraded { error, last_known });
            }
        };

        let mut updates = Vec::with_capacity(self.assets.len());
        for asset_id in self.assets.iter() {
            let price = prices
                .get(asset_id)
                .and_then(|row| row.get(&self.currency).copied().flatten());

            let change = match price {
                Some(px) => {
                    let seen = self.last_seen(asset_id)?;
                    let change =
                        self.tracker
                            .track_price_change(asset_id, px, seen.price, seen.highest)?;
                    self.last.lock().insert(
                        asset_id.clone(),
                        LastSeen {
                            price: px,
                            highest: change.highest_price,
                        },
                    );
                    Some(change)
                }
                None => {
                    debug!(asset = %asset_id, currency = %self.currency, "no quote for asset");
                    None
                }
            };

            updates.push(AssetUpdate {
                asset_id: asset_id.clone(),
                price,
                change,
            });
        }

        let alerts: usize = updates
            .iter()
            .filter_map(|u| u.change.as_ref())
            .map(|c| c.alerts.len())
            .sum();
        info!(assets = updates.len(), alerts, "watchlist refreshed");

        Ok(RefreshOutcome::Fresh(updates))
    }

    /// What this service saw last for `asset_id`, falling back to the
    /// tracker's persisted state on the first sighting after a restart.
    fn last_seen(&self, asset_id: &str) -> Result<LastSeen> {
        if let Some(seen) = self.last.lock().get(asset_id).copied() {
            return Ok(seen);
        }
        let price = self
            .tracker
            .history(asset_id)?
            .last()
            .map(|s| s.price)
            .unwrap_or_default();
        let highest = self.tracker.saved_highest(asset_id)?.unwrap_or_default();
        Ok(LastSeen { price, highest })
    }
}

impl std::fmt::Debug for WatchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchService")
            .field("assets", &self.assets)
            .field("currency", &self.currency)
            .field("client", &self.client)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::ClientConfig;
    use crate::tracker::AlertKind;
    use crate::transport::mock::MockTransport;

    fn service(transport: Arc<MockTransport>) -> WatchService {
        let client = GeckoClient::new(ClientConfig::default(), transport);
        WatchService::new(
            client,
            Arc::new(PriceTracker::in_memory()),
            ["bitcoin", "ghost"],
            "USD",
        )
    }

    fn fresh(outcome: RefreshOutcome) -> Vec<AssetUpdate> {
        match outcome {
            RefreshOutcome::Fresh(updates) => updates,
            other => panic!("expected fresh outcome, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_tracks_quoted_assets() {
        let transport = MockTransport::simple_prices(|id| (id == "bitcoin").then_some(100.0));
        let svc = service(transport.clone());

        let updates = fresh(svc.refresh().await.unwrap());
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].asset_id, "bitcoin");
        assert_eq!(updates[0].price, Some(100.0));
        let change = updates[0].change.as_ref().unwrap();
        assert!(change.alerts.iter().any(|a| a.kind == AlertKind::NewHigh));
        assert_eq!(updates[1].price, None);
        assert!(updates[1].change.is_none());
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_refresh_compares_against_previous_price() {
        let transport = MockTransport::simple_prices(|_| Some(100.0));
        let svc = service(transport.clone());
        svc.refresh().await.unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        transport.push(Ok(serde_json::json!({ "bitcoin": { "usd": 112.0 } })));
        let updates = fresh(svc.refresh().await.unwrap());

        let change = updates[0].change.as_ref().unwrap();
        assert!((change.price_change_percent - 12.0).abs() < 1e-9);
        assert_eq!(change.highest_price, 112.0);
        assert_eq!(svc.tracker().history("bitcoin").unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn first_refresh_after_restart_uses_stored_history() {
        let tracker = Arc::new(PriceTracker::in_memory());
        tracker.track_price_change("bitcoin", 100.0, 0.0, 0.0).unwrap();

        let transport = MockTransport::simple_prices(|_| Some(112.0));
        let client = GeckoClient::new(ClientConfig::default(), transport);
        let svc = WatchService::new(client, tracker, ["bitcoin"], "usd");

        let updates = fresh(svc.refresh().await.unwrap());
        let change = updates[0].change.as_ref().unwrap();
        assert!((change.price_change_percent - 12.0).abs() < 1e-9);
        assert!(change.alerts.iter().any(|a| a.kind == AlertKind::ExtremeVolatility));
        assert_eq!(change.highest_price, 112.0);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_returns_last_known_prices() {
        let transport = MockTransport::simple_prices(|_| Some(100.0));
        let svc = service(transport.clone());
        svc.refresh().await.unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        transport.push(Err(ApiError::from_status(400, None, "bad request")));

        match svc.refresh().await.unwrap() {
            RefreshOutcome::Degraded { error, last_known } => {
                assert!(matches!(error, ApiError::RequestRejected { status: 400, .. }));
                assert_eq!(last_known["bitcoin"]["usd"], Some(100.0));
            }
            other => panic!("expected degraded outcome, got {other:?}"),
        }
        assert_eq!(svc.tracker().history("bitcoin").unwrap().len(), 1);
    }
}
