// =============================================================================
// pricewatch — rate-limited market-data client and price tracker
// =============================================================================

pub mod config;
pub mod error;
pub mod gecko;
pub mod tracker;
pub mod transport;
pub mod types;
pub mod watch;

pub use config::{ClientConfig, WatchConfig};
pub use error::{ApiError, ApiResult};
pub use gecko::GeckoClient;
pub use tracker::{Alert, AlertKind, PriceChange, PriceTracker, Severity, Trend};
pub use transport::{HttpTransport, Transport};
pub use types::{AssetIds, CoinMeta, ContractInfo, CurrencySet, ImageUrls, PriceMap, PriceRow};
pub use watch::{AssetUpdate, RefreshOutcome, WatchService};
