// =============================================================================
// Batch Coalescer — many concurrent price requests, one upstream call
// =============================================================================
//
// Requests arriving within the debounce window are grouped by currency set.
// Each group keeps the union of requested ids plus one waiter per caller.
// When the window closes every group is dispatched once, the result is
// written to the price cache, and each waiter receives exactly the ids it
// asked for. A failed dispatch fails every waiter of that group with the same
// error.
// =============================================================================

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::cache::TtlCache;
use super::endpoints::{null_row, parse_simple_price, simple_price_params, SIMPLE_PRICE_PATH};
use super::upstream::Upstream;
use super::PriceKey;
use crate::error::{ApiError, ApiResult};
use crate::types::{CurrencySet, PriceMap, PriceRow};

type Reply = oneshot::Sender<ApiResult<PriceMap>>;

struct Waiter {
    wanted: Vec<String>,
    reply: Reply,
}

/// Everything requested for one currency set during the current window.
struct PendingBatch {
    currencies: CurrencySet,
    ids: BTreeSet<String>,
    waiters: Vec<Waiter>,
}

#[derive(Default)]
struct BatchState {
    pending: HashMap<String, PendingBatch>,
    flush_scheduled: bool,
}

struct BatcherInner {
    upstream: Upstream,
    cache: Arc<TtlCache<PriceKey, PriceRow>>,
    price_ttl: Duration,
    debounce: Duration,
    state: Mutex<BatchState>,
}

#[derive(Clone)]
pub(crate) struct PriceBatcher {
    inner: Arc<BatcherInner>,
}

impl PriceBatcher {
    pub fn new(
        upstream: Upstream,
        cache: Arc<TtlCache<PriceKey, PriceRow>>,
        price_ttl: Duration,
        debounce: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(BatcherInner {
                upstream,
                cache,
                price_ttl,
                debounce,
                state: Mutex::new(BatchState::default()),
            }),
        }
    }

    /// Register `ids` for the next flush and wait for their prices.
    pub async fn fetch(&self, ids: Vec<String>, currencies: &CurrencySet) -> ApiResult<PriceMap> {
        let rx = self.request(ids, currencies);
        rx.await
            .map_err(|_| ApiError::Transport("price batch dropped before completion".into()))?
    }

    /// Register `ids` and return the handle the result will arrive on.
    ///
    /// Registration is synchronous, so every caller that reaches this point
    /// before the flush timer fires shares the same upstream call.
    pub fn request(
        &self,
        ids: Vec<String>,
        currencies: &CurrencySet,
    ) -> oneshot::Receiver<ApiResult<PriceMap>> {
        let (reply, rx) = oneshot::channel();
        let key = currencies.key();

        let schedule_flush = {
            let mut state = self.inner.state.lock();
            let batch = state
                .pending
                .entry(key.clone())
                .or_insert_with(|| PendingBatch {
                    currencies: currencies.clone(),
                    ids: BTreeSet::new(),
                    waiters: Vec::new(),
                });
            batch.ids.extend(ids.iter().cloned());
            batch.waiters.push(Waiter { wanted: ids, reply });
            debug!(
                currencies = %key,
                batch_ids = batch.ids.len(),
                waiters = batch.waiters.len(),
                "price request joined batch"
            );

            !std::mem::replace(&mut state.flush_scheduled, true)
        };

        if schedule_flush {
            let this = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(this.inner.debounce).await;
                this.flush().await;
            });
        }

        rx
    }

    async fn flush(&self) {
        let batches: Vec<(String, PendingBatch)> = {
            let mut state = self.inner.state.lock();
            state.flush_scheduled = false;
            state.pending.drain().collect()
        };

        if batches.is_empty() {
            return;
        }
        debug!(batches = batches.len(), "flushing price batches");

        join_all(
            batches
                .into_iter()
                .map(|(key, batch)| self.dispatch(key, batch)),
        )
        .await;
    }

    async fn dispatch(&self, key: String, batch: PendingBatch) {
        let ids: Vec<String> = batch.ids.into_iter().collect();
        let currencies = batch.currencies.currencies();

        let result = self
            .inner
            .upstream
            .get(SIMPLE_PRICE_PATH, simple_price_params(&ids, &key))
            .await
            .and_then(|body| parse_simple_price(&body, &ids, currencies));

        match result {
            Ok(rows) => {
                for (id, row) in &rows {
                    self.inner.cache.set(
                        PriceKey::new(id.clone(), key.clone()),
                        row.clone(),
                        self.inner.price_ttl,
                    );
                }
                info!(
                    currencies = %key,
                    ids = ids.len(),
                    waiters = batch.waiters.len(),
                    "price batch resolved"
                );
                for waiter in batch.waiters {
                    let subset: PriceMap = waiter
                        .wanted
                        .iter()
                        .map(|id| {
                            let row = rows.get(id).cloned().unwrap_or_else(|| null_row(currencies));
                            (id.clone(), row)
                        })
                        .collect();
                    let _ = waiter.reply.send(Ok(subset));
                }
            }
            Err(err) => {
                warn!(
                    currencies = %key,
                    ids = ids.len(),
                    waiters = batch.waiters.len(),
                    error = %err,
                    "price batch failed"
                );
                for waiter in batch.waiters {
                    let _ = waiter.reply.send(Err(err.clone()));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
