// =============================================================================
// Gecko Client — rate-limited, batching, caching market-data client
// =============================================================================
//
// Request path for prices:
//
//   get_prices ─► price cache ─hit──────────────────────────────► caller
//                    │ miss
//                    ▼
//               batch coalescer ─(debounce)─► rate limiter ─► retry ─► transport
//                    │                                                   │
//                    └──────── price cache ◄── fan out to waiters ◄──────┘
//
// Metadata, contract addresses and the approximate ATH are fetched per id,
// concurrently, through the same limiter and retry policy and cached in the
// long-lived metadata cache.
//
// A `GeckoClient` is an explicit instance: tests build isolated clients with
// their own configuration and a fake transport.
// =============================================================================

pub mod cache;
pub mod rate_limit;
pub mod retry;

mod batcher;
mod endpoints;
mod upstream;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures_util::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, instrument};

use self::batcher::PriceBatcher;
use self::cache::TtlCache;
use self::endpoints::{
    coin_params, coin_path, contract_path, ohlc_params, ohlc_path, parse_ath, parse_coin_meta,
    parse_contract,
};
use self::rate_limit::DispatchSnapshot;
use self::upstream::Upstream;
use crate::config::ClientConfig;
use crate::error::{ApiError, ApiResult};
use crate::transport::{HttpTransport, Transport};
use crate::types::{AssetIds, CoinMeta, ContractInfo, CurrencySet, PriceMap, PriceRow};

// =============================================================================
// Cache keys & records
// =============================================================================

/// Price cache key: one asset quoted in one currency set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PriceKey {
    pub asset_id: String,
    pub currency_key: String,
}

impl PriceKey {
    pub fn new(asset_id: String, currency_key: String) -> Self {
        Self {
            asset_id,
            currency_key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum MetaKind {
    Coin,
    Contract,
    Ath,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct MetaKey {
    kind: MetaKind,
    asset_id: String,
}

#[derive(Debug, Clone)]
enum MetaRecord {
    Coin(CoinMeta),
    Contract(ContractInfo),
    /// `None` when the upstream returned no candles for the coin.
    Ath(Option<f64>),
}

/// One upstream metadata fetch that every concurrent caller for the same key
/// awaits.
type MetaFetch = Shared<BoxFuture<'static, ApiResult<MetaRecord>>>;

// =============================================================================
// GeckoClient
// =============================================================================

/// Cloneable handle; clones share caches, batches and the rate-limit ledger.
#[derive(Clone)]
pub struct GeckoClient {
    config: Arc<ClientConfig>,
    upstream: Upstream,
    price_cache: Arc<TtlCache<PriceKey, PriceRow>>,
    meta_cache: Arc<TtlCache<MetaKey, MetaRecord>>,
    meta_inflight: Arc<Mutex<HashMap<MetaKey, MetaFetch>>>,
    batcher: PriceBatcher,
}

impl GeckoClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    pub fn new(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let upstream = Upstream::new(&config, transport);
        let price_cache = Arc::new(TtlCache::new());
        let batcher = PriceBatcher::new(
            upstream.clone(),
            price_cache.clone(),
            config.price_ttl(),
            config.debounce(),
        );

        debug!(
            base_url = %config.base_url,
            requests_per_window = config.requests_per_window,
            window_ms = config.window_ms,
            min_gap_ms = config.min_gap_ms,
            "GeckoClient initialised"
        );

        Self {
            config: Arc::new(config),
            upstream,
            price_cache,
            meta_cache: Arc::new(TtlCache::new()),
            meta_inflight: Arc::new(Mutex::new(HashMap::new())),
            batcher,
        }
    }

    /// Build a client that talks HTTP to `config.base_url`.
    pub fn from_config(config: ClientConfig) -> anyhow::Result<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    pub fn rate_limit_snapshot(&self) -> DispatchSnapshot {
        self.upstream.limiter().snapshot()
    }

    // -------------------------------------------------------------------------
    // Prices
    // -------------------------------------------------------------------------

    /// Prices for `ids` in every currency of `vs_currencies`.
    ///
    /// Fresh cache entries are served directly; the rest join the current
    /// batch. Every requested id appears in the result, with `None` for any
    /// currency the upstream did not quote.
    #[instrument(skip_all, name = "gecko::get_prices")]
    pub async fn get_prices(
        &self,
        ids: impl Into<AssetIds>,
        vs_currencies: impl Into<CurrencySet>,
    ) -> ApiResult<PriceMap> {
        let ids = ids.into();
        let currencies = vs_currencies.into();
        let currency_key = currencies.key();

        if ids.is_empty() {
            return Ok(PriceMap::new());
        }
        if currencies.is_empty() {
            return Ok(ids.iter().map(|id| (id.clone(), PriceRow::new())).collect());
        }

        let mut out = PriceMap::with_capacity(ids.len());
        let mut misses = Vec::new();
        for id in ids.iter() {
            match self
                .price_cache
                .get(&PriceKey::new(id.clone(), currency_key.clone()))
            {
                Some(row) => {
                    out.insert(id.clone(), row);
                }
                None => misses.push(id.clone()),
            }
        }

        debug!(
            currencies = %currency_key,
            hits = out.len(),
            misses = misses.len(),
            "price cache lookup"
        );

        if !misses.is_empty() {
            let fetched = self.batcher.fetch(misses, &currencies).await?;
            out.extend(fetched);
        }

        Ok(out)
    }

    /// Last cached prices regardless of age, for showing degraded values
    /// after a failed refresh. Ids never fetched are left out.
    pub fn last_known_prices(
        &self,
        ids: impl Into<AssetIds>,
        vs_currencies: impl Into<CurrencySet>,
    ) -> PriceMap {
        let currency_key = vs_currencies.into().key();
        ids.into()
            .iter()
            .filter_map(|id| {
                self.price_cache
                    .get_stale(&PriceKey::new(id.clone(), currency_key.clone()))
                    .map(|row| (id.clone(), row))
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Metadata
    // -------------------------------------------------------------------------

    /// Symbol, name and image URLs per coin.
    #[instrument(skip_all, name = "gecko::get_meta")]
    pub async fn get_meta(&self, ids: impl Into<AssetIds>) -> ApiResult<HashMap<String, CoinMeta>> {
        let records = self
            .cached_per_id(ids.into(), MetaKind::Coin, |upstream, id| async move {
                upstream
                    .get(&coin_path(&id), coin_params())
                    .await
                    .and_then(|body| parse_coin_meta(&id, &body))
                    .map(MetaRecord::Coin)
            })
            .await?;

        Ok(records
            .into_iter()
            .filter_map(|(id, rec)| match rec {
                MetaRecord::Coin(meta) => Some((id, meta)),
                _ => None,
            })
            .collect())
    }

    #[instrument(skip_all, name = "gecko::get_contract_addresses")]
    pub async fn get_contract_addresses(
        &self,
        ids: impl Into<AssetIds>,
    ) -> ApiResult<HashMap<String, ContractInfo>> {
        let records = self
            .cached_per_id(ids.into(), MetaKind::Contract, |upstream, id| async move {
                upstream
                    .get(&contract_path(&id), Vec::new())
                    .await
                    .and_then(|body| parse_contract(&body))
                    .map(MetaRecord::Contract)
            })
            .await?;

        Ok(records
            .into_iter()
            .filter_map(|(id, rec)| match rec {
                MetaRecord::Contract(info) => Some((id, info)),
                _ => None,
            })
            .collect())
    }

    /// Approximate all-time high in USD: the largest `high` among the OHLC
    /// candles the upstream returns for `days=max`. Coins without candles are
    /// left out.
    #[instrument(skip_all, name = "gecko::get_ath")]
    pub async fn get_ath(&self, ids: impl Into<AssetIds>) -> ApiResult<HashMap<String, f64>> {
        let records = self
            .cached_per_id(ids.into(), MetaKind::Ath, |upstream, id| async move {
                upstream
                    .get(&ohlc_path(&id), ohlc_params())
                    .await
                    .and_then(|body| parse_ath(&body))
                    .map(MetaRecord::Ath)
            })
            .await?;

        Ok(records
            .into_iter()
            .filter_map(|(id, rec)| match rec {
                MetaRecord::Ath(Some(ath)) => Some((id, ath)),
                _ => None,
            })
            .collect())
    }

    /// Serve `ids` from the metadata cache, fetching misses concurrently.
    ///
    /// A miss that another caller is already fetching joins that fetch
    /// instead of sending a second request. Successful fetches are cached
    /// even when a sibling fails; the first failure is then returned for the
    /// whole call.
    async fn cached_per_id<F, Fut>(
        &self,
        ids: AssetIds,
        kind: MetaKind,
        fetch: F,
    ) -> ApiResult<Vec<(String, MetaRecord)>>
    where
        F: Fn(Upstream, String) -> Fut,
        Fut: Future<Output = ApiResult<MetaRecord>> + Send + 'static,
    {
        let mut out = Vec::with_capacity(ids.len());
        let mut pending: Vec<(MetaKey, MetaFetch)> = Vec::new();
        let mut joined = 0usize;

        for id in ids.iter() {
            let key = MetaKey {
                kind,
                asset_id: id.clone(),
            };
            if let Some(rec) = self.meta_cache.get(&key) {
                out.push((id.clone(), rec));
                continue;
            }

            let mut inflight = self.meta_inflight.lock();
            // Re-check under the lock: a fetch may have landed since the miss.
            if let Some(rec) = self.meta_cache.get(&key) {
                out.push((id.clone(), rec));
                continue;
            }
            let fut = match inflight.get(&key) {
                Some(existing) => {
                    joined += 1;
                    existing.clone()
                }
                None => {
                    let fut = fetch(self.upstream.clone(), id.clone()).boxed().shared();
                    inflight.insert(key.clone(), fut.clone());
                    fut
                }
            };
            pending.push((key, fut));
        }

        debug!(
            kind = ?kind,
            hits = out.len(),
            misses = pending.len(),
            joined,
            "metadata cache lookup"
        );

        let results = join_all(pending.iter().map(|(_, fut)| fut.clone())).await;

        let mut first_error: Option<ApiError> = None;
        for ((key, fut), result) in pending.into_iter().zip(results) {
            if let Ok(rec) = &result {
                self.meta_cache
                    .set(key.clone(), rec.clone(), self.config.meta_ttl());
            }
            {
                let mut inflight = self.meta_inflight.lock();
                if inflight.get(&key).is_some_and(|f| f.ptr_eq(&fut)) {
                    inflight.remove(&key);
                }
            }
            match result {
                Ok(rec) => out.push((key.asset_id, rec)),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(out),
        }
    }
}

impl std::fmt::Debug for GeckoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeckoClient")
            .field("base_url", &self.config.base_url)
            .field("cached_prices", &self.price_cache.len())
            .field("cached_meta", &self.meta_cache.len())
            .field("limiter", self.upstream.limiter())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
