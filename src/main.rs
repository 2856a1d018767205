// =============================================================================
// pricewatch — Main Entry Point
// =============================================================================
//
// Loads the watch config, then refreshes the watchlist on a fixed interval
// until Ctrl+C, logging alerts and degraded refreshes as they happen.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pricewatch::tracker::{JsonFileStore, PriceTracker};
use pricewatch::{GeckoClient, RefreshOutcome, WatchConfig, WatchService};

const CONFIG_PATH: &str = "pricewatch.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        pricewatch — Starting Up                         ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = WatchConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        WatchConfig::default()
    });
    config.apply_env_overrides();

    info!(
        assets = ?config.assets,
        currency = %config.currency,
        interval_secs = config.interval_secs,
        state_path = %config.state_path.display(),
        "Watchlist configured"
    );

    // ── 2. Client, tracker, service ──────────────────────────────────────
    let client = GeckoClient::from_config(config.client.clone())
        .context("failed to build market-data client")?;
    let store = JsonFileStore::open(&config.state_path)
        .with_context(|| format!("failed to open tracker state {}", config.state_path.display()))?;
    let tracker = Arc::new(PriceTracker::new(Arc::new(store)));
    let service = WatchService::new(client.clone(), tracker, config.assets.clone(), &config.currency);

    // ── 3. Refresh loop ──────────────────────────────────────────────────
    let mut interval = tokio::time::interval(Duration::from_secs(config.interval_secs.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    info!("Watch loop running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match service.refresh().await {
                    Ok(RefreshOutcome::Fresh(updates)) => {
                        for update in &updates {
                            let Some(change) = &update.change else {
                                warn!(asset = %update.asset_id, "no price returned");
                                continue;
                            };
                            info!(
                                asset = %update.asset_id,
                                price = update.price.unwrap_or_default(),
                                highest = change.highest_price,
                                change_pct = format_args!("{:+.2}", change.price_change_percent),
                                trend = %change.trend,
                                alerts = change.alerts.len(),
                                "price update"
                            );
                        }
                    }
                    Ok(RefreshOutcome::Degraded { error, last_known }) => {
                        warn!(
                            error = %error,
                            stale_assets = last_known.len(),
                            "Refresh degraded, showing last known prices"
                        );
                        for (asset, row) in &last_known {
                            if let Some(Some(px)) = row.get(&config.currency) {
                                info!(asset = %asset, price = px, "last known price");
                            }
                        }
                    }
                    Err(e) => error!(error = %e, "Refresh failed"),
                }
                let snap = client.rate_limit_snapshot();
                info!(
                    in_window = snap.in_window,
                    limit = snap.requests_per_window,
                    total = snap.total_dispatched,
                    "rate limit status"
                );
            }
            _ = &mut shutdown => {
                warn!("Shutdown signal received — stopping gracefully");
                break;
            }
        }
    }

    info!("pricewatch shut down complete.");
    Ok(())
}
