// =============================================================================
// Shared types used across the price client and the tracker
// =============================================================================

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// Price per quote currency for one asset. `None` means the upstream did not
/// quote the asset in that currency.
pub type PriceRow = HashMap<String, Option<f64>>;

/// Prices keyed by asset id.
pub type PriceMap = HashMap<String, PriceRow>;

// ---------------------------------------------------------------------------
// Request inputs
// ---------------------------------------------------------------------------

/// A normalised list of asset ids: trimmed, non-empty, first occurrence wins.
///
/// Built from either a list or a comma separated string, so callers can pass
/// `"bitcoin,ethereum"` or `vec!["bitcoin", "ethereum"]` interchangeably.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetIds(Vec<String>);

impl AssetIds {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for id in ids {
            let id = id.as_ref().trim();
            if !id.is_empty() && seen.insert(id.to_string()) {
                out.push(id.to_string());
            }
        }
        Self(out)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.0.iter()
    }
}

impl From<&str> for AssetIds {
    fn from(raw: &str) -> Self {
        Self::new(raw.split(','))
    }
}

impl From<String> for AssetIds {
    fn from(raw: String) -> Self {
        Self::from(raw.as_str())
    }
}

impl From<Vec<String>> for AssetIds {
    fn from(ids: Vec<String>) -> Self {
        Self::new(ids)
    }
}

impl From<&[String]> for AssetIds {
    fn from(ids: &[String]) -> Self {
        Self::new(ids)
    }
}

impl From<Vec<&str>> for AssetIds {
    fn from(ids: Vec<&str>) -> Self {
        Self::new(ids)
    }
}

impl From<&[&str]> for AssetIds {
    fn from(ids: &[&str]) -> Self {
        Self::new(ids.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for AssetIds {
    fn from(ids: [&str; N]) -> Self {
        Self::new(ids)
    }
}

/// A set of quote currencies, lower-cased and sorted so that `["USD", "eur"]`
/// and `"eur,usd"` share the same batch and cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CurrencySet(Vec<String>);

impl CurrencySet {
    pub fn new<I, S>(currencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set: BTreeSet<String> = currencies
            .into_iter()
            .map(|c| c.as_ref().trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        Self(set.into_iter().collect())
    }

    /// Stable key used for batching and caching, e.g. `"eur,usd"`.
    pub fn key(&self) -> String {
        self.0.join(",")
    }

    pub fn currencies(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for CurrencySet {
    fn from(raw: &str) -> Self {
        Self::new(raw.split(','))
    }
}

impl From<String> for CurrencySet {
    fn from(raw: String) -> Self {
        Self::from(raw.as_str())
    }
}

impl From<Vec<String>> for CurrencySet {
    fn from(currencies: Vec<String>) -> Self {
        Self::new(currencies)
    }
}

impl From<Vec<&str>> for CurrencySet {
    fn from(currencies: Vec<&str>) -> Self {
        Self::new(currencies)
    }
}

impl From<&[&str]> for CurrencySet {
    fn from(currencies: &[&str]) -> Self {
        Self::new(currencies.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for CurrencySet {
    fn from(currencies: [&str; N]) -> Self {
        Self::new(currencies)
    }
}

// ---------------------------------------------------------------------------
// Metadata records
// ---------------------------------------------------------------------------

/// Image URLs published for a coin. Any of them may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageUrls {
    #[serde(default)]
    pub thumb: Option<String>,
    #[serde(default)]
    pub small: Option<String>,
    #[serde(default)]
    pub large: Option<String>,
}

/// Descriptive metadata for a single coin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoinMeta {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub image_urls: ImageUrls,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContractInfo {
    pub contract_address: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_ids_accept_list_or_comma_string() {
        let from_str = AssetIds::from(" bitcoin, ethereum ,,bitcoin");
        let from_vec = AssetIds::from(vec!["bitcoin", "ethereum"]);
        assert_eq!(from_str, from_vec);
        assert_eq!(from_str.as_slice(), ["bitcoin", "ethereum"]);
    }

    #[test]
    fn currency_set_key_is_order_insensitive() {
        let a = CurrencySet::from(vec!["USD", "eur"]);
        let b = CurrencySet::from("eur, usd,usd");
        assert_eq!(a, b);
        assert_eq!(a.key(), "eur,usd");
        assert!(CurrencySet::from("").is_empty());
    }
}
