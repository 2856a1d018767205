// =============================================================================
// Endpoint paths, query parameters and response decoding
// =============================================================================
//
//   /simple/price                                 batched spot prices
//   /coins/{id}                                   descriptive metadata
//   /coins/{id}/contract/contract_addresses       token contract address
//   /coins/{id}/ohlc?vs_currency=usd&days=max     candles, for approximate ATH
//
// Decoders are tolerant of missing fields but reject payloads of the wrong
// JSON shape with `ApiError::Decode`.
// =============================================================================

use serde_json::Value;

use crate::error::{ApiError, ApiResult};
use crate::types::{CoinMeta, ContractInfo, ImageUrls, PriceMap, PriceRow};

pub(crate) const SIMPLE_PRICE_PATH: &str = "/simple/price";

/// Platforms checked first when a coin lists several contract addresses.
const PREFERRED_PLATFORMS: &[&str] = &["ethereum", "binance-smart-chain", "solana"];

// ---------------------------------------------------------------------------
// Paths & params
// ---------------------------------------------------------------------------

pub(crate) fn simple_price_params(ids: &[String], currency_key: &str) -> Vec<(String, String)> {
    vec![
        ("ids".to_string(), ids.join(",")),
        ("vs_currencies".to_string(), currency_key.to_string()),
    ]
}

pub(crate) fn coin_path(id: &str) -> String {
    format!("/coins/{}", urlencoding::encode(id))
}

pub(crate) fn coin_params() -> Vec<(String, String)> {
    [
        "localization",
        "tickers",
        "market_data",
        "community_data",
        "developer_data",
        "sparkline",
    ]
    .iter()
    .map(|k| (k.to_string(), "false".to_string()))
    .collect()
}

pub(crate) fn contract_path(id: &str) -> String {
    format!("/coins/{}/contract/contract_addresses", urlencoding::encode(id))
}

pub(crate) fn ohlc_path(id: &str) -> String {
    format!("/coins/{}/ohlc", urlencoding::encode(id))
}

pub(crate) fn ohlc_params() -> Vec<(String, String)> {
    vec![
        ("vs_currency".to_string(), "usd".to_string()),
        ("days".to_string(), "max".to_string()),
    ]
}

// ---------------------------------------------------------------------------
// Decoders
// ---------------------------------------------------------------------------

/// Decode `{ "bitcoin": { "usd": 1.0 }, ... }` into one row per requested id.
///
/// Every id in `ids` gets a row with every currency; anything the upstream
/// left out becomes an explicit `None`.
pub(crate) fn parse_simple_price(
    body: &Value,
    ids: &[String],
    currencies: &[String],
) -> ApiResult<PriceMap> {
    let obj = body
        .as_object()
        .ok_or_else(|| ApiError::Decode("simple/price response is not an object".into()))?;

    let rows = ids
        .iter()
        .map(|id| {
            let quoted = obj.get(id);
            let row: PriceRow = currencies
                .iter()
                .map(|c| {
                    let px = quoted.and_then(|q| q.get(c)).and_then(Value::as_f64);
                    (c.clone(), px)
                })
                .collect();
            (id.clone(), row)
        })
        .collect();

    Ok(rows)
}

/// A row with every currency set to `None`.
pub(crate) fn null_row(currencies: &[String]) -> PriceRow {
    currencies.iter().map(|c| (c.clone(), None)).collect()
}

pub(crate) fn parse_coin_meta(requested_id: &str, body: &Value) -> ApiResult<CoinMeta> {
    if !body.is_object() {
        return Err(ApiError::Decode(format!(
            "coin response for {requested_id} is not an object"
        )));
    }

    let text = |field: &str| body.get(field).and_then(Value::as_str).map(str::to_owned);
    let image = body.get("image");
    let image_url = |size: &str| {
        image
            .and_then(|img| img.get(size))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    };

    Ok(CoinMeta {
        id: text("id").unwrap_or_else(|| requested_id.to_string()),
        symbol: text("symbol").unwrap_or_default(),
        name: text("name").unwrap_or_default(),
        image_urls: ImageUrls {
            thumb: image_url("thumb"),
            small: image_url("small"),
            large: image_url("large"),
        },
    })
}

/// Pull a contract address out of a coin record.
///
/// Uses the top-level `contract_address` when present, otherwise the first
/// non-empty entry of `platforms`, preferring well-known chains.
pub(crate) fn parse_contract(body: &Value) -> ApiResult<ContractInfo> {
    if !body.is_object() {
        return Err(ApiError::Decode("contract response is not an object".into()));
    }

    let non_empty = |v: &Value| v.as_str().filter(|s| !s.trim().is_empty()).map(str::to_owned);

    if let Some(addr) = body.get("contract_address").and_then(non_empty) {
        return Ok(ContractInfo {
            contract_address: Some(addr),
        });
    }

    let platforms = body.get("platforms").and_then(Value::as_object);
    let contract_address = platforms.and_then(|p| {
        PREFERRED_PLATFORMS
            .iter()
            .find_map(|chain| p.get(*chain).and_then(non_empty))
            .or_else(|| p.values().find_map(non_empty))
    });

    Ok(ContractInfo { contract_address })
}

/// Maximum `high` across `[time, open, high, low, close]` candles.
///
/// This is only as good as the candle range the upstream returns; it is an
/// approximation of the all-time high, not a guaranteed one. `None` when no
/// candle carried a usable high.
pub(crate) fn parse_ath(body: &Value) -> ApiResult<Option<f64>> {
    let candles = body
        .as_array()
        .ok_or_else(|| ApiError::Decode("ohlc response is not an array".into()))?;

    let ath = candles
        .iter()
        .filter_map(|c| c.as_array())
        .filter_map(|c| c.get(2).and_then(Value::as_f64))
        .filter(|h| h.is_finite())
        .fold(None, |best: Option<f64>, h| Some(best.map_or(h, |b| b.max(h))));

    Ok(ath)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn missing_ids_and_currencies_become_explicit_nulls() {
        let body = json!({ "bitcoin": { "usd": 65000.5 } });
        let rows = parse_simple_price(
            &body,
            &strings(&["bitcoin", "ghost"]),
            &strings(&["eur", "usd"]),
        )
        .unwrap();

        assert_eq!(rows["bitcoin"]["usd"], Some(65000.5));
        assert_eq!(rows["bitcoin"]["eur"], None);
        assert_eq!(rows["ghost"].len(), 2);
        assert!(rows["ghost"].values().all(Option::is_none));
    }

    #[test]
    fn simple_price_rejects_non_object() {
        let err = parse_simple_price(&json!([1, 2]), &strings(&["bitcoin"]), &strings(&["usd"]));
        assert!(matches!(err, Err(ApiError::Decode(_))));
    }

    #[test]
    fn coin_meta_reads_images() {
        let body = json!({
            "id": "bitcoin",
            "symbol": "btc",
            "name": "Bitcoin",
            "image": { "thumb": "t.png", "small": "s.png", "large": "" }
        });
        let meta = parse_coin_meta("bitcoin", &body).unwrap();
        assert_eq!(meta.symbol, "btc");
        assert_eq!(meta.name, "Bitcoin");
        assert_eq!(meta.image_urls.thumb.as_deref(), Some("t.png"));
        assert_eq!(meta.image_urls.large, None);
    }

    #[test]
    fn contract_prefers_top_level_then_known_chains() {
        let top = json!({ "contract_address": "0xabc", "platforms": { "ethereum": "0xdef" } });
        assert_eq!(parse_contract(&top).unwrap().contract_address.as_deref(), Some("0xabc"));

        let platforms = json!({ "platforms": { "polygon-pos": "0x111", "ethereum": "0x222" } });
        assert_eq!(
            parse_contract(&platforms).unwrap().contract_address.as_deref(),
            Some("0x222")
        );

        let native = json!({ "platforms": { "": "" } });
        assert_eq!(parse_contract(&native).unwrap().contract_address, None);
    }

    #[test]
    fn ath_is_max_of_ohlc_highs() {
        let body = json!([
            [1_700_000_000_000i64, 10.0, 12.5, 9.0, 11.0],
            [1_700_000_400_000i64, 11.0, 19.25, 10.0, 18.0],
            [1_700_000_800_000i64, 18.0, 18.5, 15.0, 16.0]
        ]);
        assert_eq!(parse_ath(&body).unwrap(), Some(19.25));
        assert_eq!(parse_ath(&json!([])).unwrap(), None);
        assert!(parse_ath(&json!({})).is_err());
    }

    #[test]
    fn ids_are_encoded_into_paths() {
        assert_eq!(coin_path("bitcoin"), "/coins/bitcoin");
        assert_eq!(ohlc_path("a/b"), "/coins/a%2Fb/ohlc");
        assert_eq!(coin_path("wrapped bitcoin"), "/coins/wrapped%20bitcoin");
        assert_eq!(
            contract_path("usd-coin"),
            "/coins/usd-coin/contract/contract_addresses"
        );
    }
}
