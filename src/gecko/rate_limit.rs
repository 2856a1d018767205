// =============================================================================
// Rate Limiter — minimum gap + sliding window over real dispatches
// =============================================================================
//
// The public market-data API enforces a per-minute request budget and bans
// clients that burst. Two rules are applied before every real dispatch,
// retries included:
//
//   - Minimum gap:    never send two requests closer than `min_gap`.
//   - Sliding window: never send more than `requests_per_window` requests in
//                     any rolling `window`.
//
// The ledger is shared by every clone of the limiter. The check and the
// append happen under one lock so two callers can never both claim the last
// free slot; the lock is released before sleeping.
// =============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::ClientConfig;

/// Floor for a computed wait so a zero-length sleep never spins the loop.
const MIN_WAIT: Duration = Duration::from_millis(1);

/// Static limits the ledger is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimits {
    pub requests_per_window: u32,
    pub window: Duration,
    pub min_gap: Duration,
    /// Added to the window wait so the oldest dispatch has surely left it.
    pub margin: Duration,
}

impl RateLimits {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            requests_per_window: config.requests_per_window.max(1),
            window: config.window(),
            min_gap: config.min_gap(),
            margin: config.window_margin(),
        }
    }
}

/// Serialisable view of the ledger for logs and status output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchSnapshot {
    pub in_window: usize,
    pub requests_per_window: u32,
    pub total_dispatched: u64,
    pub ms_since_last_dispatch: Option<u64>,
}

// ---------------------------------------------------------------------------
// DispatchLedger
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DispatchLedger {
    timestamps: VecDeque<Instant>,
    last_sent_at: Option<Instant>,
    total_dispatched: u64,
}

impl DispatchLedger {
    /// Drop timestamps that have aged out of the window.
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.timestamps.front() {
            if now.duration_since(oldest) >= window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }
    }

    /// How long the caller must wait before it may dispatch, if at all.
    fn required_wait(&self, now: Instant, limits: &RateLimits) -> Option<Duration> {
        if let Some(last) = self.last_sent_at {
            let since = now.duration_since(last);
            if since < limits.min_gap {
                return Some((limits.min_gap - since).max(MIN_WAIT));
            }
        }

        if self.timestamps.len() >= limits.requests_per_window as usize {
            let oldest = *self.timestamps.front()?;
            let leaves_at = oldest + limits.window + limits.margin;
            return Some(leaves_at.saturating_duration_since(now).max(MIN_WAIT));
        }

        None
    }

    fn record(&mut self, now: Instant) {
        self.timestamps.push_back(now);
        self.last_sent_at = Some(now);
        self.total_dispatched += 1;
    }
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// Cloneable handle to one shared dispatch ledger.
#[derive(Clone)]
pub struct RateLimiter {
    limits: RateLimits,
    ledger: Arc<Mutex<DispatchLedger>>,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            ledger: Arc::new(Mutex::new(DispatchLedger::default())),
        }
    }

    /// Suspend until a dispatch is allowed, then record it.
    ///
    /// Returns only once the caller's slot has been appended to the ledger,
    /// so the caller must send immediately afterwards.
    pub async fn gate(&self) {
        loop {
            let (wait, in_window) = {
                let mut ledger = self.ledger.lock();
                let now = Instant::now();
                ledger.prune(now, self.limits.window);
                match ledger.required_wait(now, &self.limits) {
                    None => {
                        ledger.record(now);
                        trace!(in_window = ledger.timestamps.len(), "dispatch slot granted");
                        return;
                    }
                    Some(wait) => (wait, ledger.timestamps.len()),
                }
            };

            if in_window >= self.limits.requests_per_window as usize {
                warn!(
                    in_window,
                    limit = self.limits.requests_per_window,
                    wait_ms = wait.as_millis() as u64,
                    "rate window saturated, holding dispatch"
                );
            } else {
                debug!(wait_ms = wait.as_millis() as u64, "spacing dispatch to honor minimum gap");
            }

            tokio::time::sleep(wait).await;
        }
    }

    pub fn snapshot(&self) -> DispatchSnapshot {
        let mut ledger = self.ledger.lock();
        let now = Instant::now();
        ledger.prune(now, self.limits.window);
        DispatchSnapshot {
            in_window: ledger.timestamps.len(),
            requests_per_window: self.limits.requests_per_window,
            total_dispatched: ledger.total_dispatched,
            ms_since_last_dispatch: ledger
                .last_sent_at
                .map(|t| now.duration_since(t).as_millis() as u64),
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ledger = self.ledger.lock();
        f.debug_struct("RateLimiter")
            .field("limits", &self.limits)
            .field("in_window", &ledger.timestamps.len())
            .field("total_dispatched", &ledger.total_dispatched)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(per_window: u32, window_ms: u64, gap_ms: u64) -> RateLimits {
        RateLimits {
            requests_per_window: per_window,
            window: Duration::from_millis(window_ms),
            min_gap: Duration::from_millis(gap_ms),
            margin: Duration::from_millis(50),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_dispatch_is_immediate() {
        let limiter = RateLimiter::new(limits(5, 60_000, 1_200));
        let start = Instant::now();
        limiter.gate().await;
        assert_eq!(Instant::now(), start);
        assert_eq!(limiter.snapshot().total_dispatched, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_dispatches_respect_min_gap() {
        let limiter = RateLimiter::new(limits(100, 60_000, 1_200));
        let mut stamps = Vec::new();
        for _ in 0..4 {
            limiter.gate().await;
            stamps.push(Instant::now());
        }
        for pair in stamps.windows(2) {
            assert!(pair[1].duration_since(pair[0]) >= Duration::from_millis(1_200));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn full_window_holds_until_oldest_ages_out() {
        let limiter = RateLimiter::new(limits(3, 1_000, 10));
        let first = Instant::now();
        for _ in 0..3 {
            limiter.gate().await;
        }
        limiter.gate().await;
        let fourth = Instant::now();

        assert!(fourth.duration_since(first) >= Duration::from_millis(1_000));
        let snap = limiter.snapshot();
        assert_eq!(snap.total_dispatched, 4);
        assert!(snap.in_window <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_ledger() {
        let limiter = RateLimiter::new(limits(2, 1_000, 0));
        let stamps = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let limiter = limiter.clone();
            let stamps = stamps.clone();
            handles.push(tokio::spawn(async move {
                limiter.gate().await;
                stamps.lock().push(Instant::now());
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let mut stamps = stamps.lock().clone();
        stamps.sort();
        assert_eq!(stamps.len(), 6);
        // No three dispatches may fall inside one rolling second.
        for triple in stamps.windows(3) {
            assert!(triple[2].duration_since(triple[0]) >= Duration::from_millis(1_000));
        }
    }

    #[test]
    fn zero_budget_is_clamped_to_one() {
        let cfg = ClientConfig {
            requests_per_window: 0,
            ..ClientConfig::default()
        };
        assert_eq!(RateLimits::from_config(&cfg).requests_per_window, 1);
    }
}
