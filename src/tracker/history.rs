// =============================================================================
// Asset History — bounded sample ring and short-term trend
// =============================================================================
//
// Keeps the last 24 observed prices per asset, oldest-first, alongside the
// persisted high-water mark. The trend compares the first and last of the
// trailing three samples against a 3% band.
// =============================================================================

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Samples retained per asset; older ones fall off the front.
pub const MAX_SAMPLES: usize = 24;

/// Number of trailing samples the trend is computed from.
const TREND_SAMPLES: usize = 3;

/// Move, in percent, across the trend samples that counts as directional.
const TREND_THRESHOLD_PCT: f64 = 3.0;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// One observed price with its wall-clock time in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    pub price: f64,
    pub time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

impl Trend {
    /// Classify the last three samples by their first-to-last move.
    pub fn classify(samples: &[PriceSample]) -> Self {
        if samples.len() < TREND_SAMPLES {
            return Trend::Neutral;
        }
        let tail = &samples[samples.len() - TREND_SAMPLES..];
        let first = tail[0].price;
        let last = tail[TREND_SAMPLES - 1].price;
        if first <= 0.0 {
            return Trend::Neutral;
        }

        let change_pct = (last - first) / first * 100.0;
        if change_pct > TREND_THRESHOLD_PCT {
            Trend::Bullish
        } else if change_pct < -TREND_THRESHOLD_PCT {
            Trend::Bearish
        } else {
            Trend::Neutral
        }
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Trend::Bullish => write!(f, "bullish"),
            Trend::Bearish => write!(f, "bearish"),
            Trend::Neutral => write!(f, "neutral"),
        }
    }
}

// ---------------------------------------------------------------------------
// AssetHistory -- bounded ring of observations per asset
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct AssetHistory {
    pub asset_id: String,
    samples: VecDeque<PriceSample>,
    pub highest_price: f64,
}

impl AssetHistory {
    pub fn new(asset_id: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            samples: VecDeque::with_capacity(MAX_SAMPLES + 1),
            highest_price: 0.0,
        }
    }

    /// Rebuild from persisted samples, keeping only the newest `MAX_SAMPLES`.
    pub fn restore(asset_id: impl Into<String>, samples: Vec<PriceSample>, highest: f64) -> Self {
        let mut history = Self::new(asset_id);
        for sample in samples {
            history.push(sample);
        }
        history.highest_price = highest.max(0.0);
        history
    }

    /// Append a sample and trim the oldest ones to stay within budget.
    pub fn push(&mut self, sample: PriceSample) {
        self.samples.push_back(sample);
        while self.samples.len() > MAX_SAMPLES {
            self.samples.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Samples oldest-first.
    pub fn samples(&self) -> Vec<PriceSample> {
        self.samples.iter().copied().collect()
    }

    pub fn trend(&self) -> Trend {
        let tail_start = self.samples.len().saturating_sub(TREND_SAMPLES);
        let tail: Vec<PriceSample> = self.samples.iter().skip(tail_start).copied().collect();
        Trend::classify(&tail)
    }
}
