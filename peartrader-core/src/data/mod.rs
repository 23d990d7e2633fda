//! Ingestion collaborator: fetching, importing, caching, and aligning price
//! series. Nothing in `analytics` depends on how these series were obtained.

pub mod align;
pub mod cache;
pub mod circuit_breaker;
pub mod csv_import;
pub mod download;
pub mod provider;
pub mod universe;
pub mod yahoo;

pub use align::{align_series, AlignedPrices};
pub use cache::{CacheMeta, CacheStatus, CoverageResult, ParquetCache};
pub use circuit_breaker::CircuitBreaker;
pub use download::{download_symbols, DownloadSummary};
pub use provider::{
    bars_to_series, normalize_bars, DataError, DataProvider, DataSource, FetchResult, PriceFetch,
    PriceField, PriceSource, RawBar, StaticPrices,
};
pub use universe::Universe;
pub use yahoo::YahooProvider;
