//! Price provider traits and structured error types.
//!
//! Two seams live here. [`DataProvider`] fetches one symbol from one source
//! (Yahoo, CSV, cache). [`PriceSource`] is what the analytics pipeline is fed
//! from: a batch of symbols over a window, with partial failure reported as
//! data rather than as an error.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::domain::{AnalysisWindow, PricePoint, PriceSeries, PriceTable};

/// Daily closing data for one symbol, before it is turned into a
/// [`PriceSeries`]. Missing values are NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBar {
    pub date: NaiveDate,
    pub close: f64,
    pub adj_close: f64,
    pub volume: u64,
}

impl RawBar {
    /// Bar whose adjusted close equals its close, as for sources that carry
    /// no adjustment column.
    pub fn unadjusted(date: NaiveDate, close: f64, volume: u64) -> Self {
        Self {
            date,
            close,
            adj_close: close,
            volume,
        }
    }
}

/// Which close a series is built from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceField {
    Close,
    /// Split- and dividend-adjusted close.
    #[default]
    AdjClose,
}

impl PriceField {
    pub fn pick(self, bar: &RawBar) -> f64 {
        match self {
            Self::Close => bar.close,
            Self::AdjClose => bar.adj_close,
        }
    }
}

impl fmt::Display for PriceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Close => write!(f, "close"),
            Self::AdjClose => write!(f, "adj_close"),
        }
    }
}

/// Sort by date and keep the first bar of each date.
pub fn normalize_bars(mut bars: Vec<RawBar>) -> Vec<RawBar> {
    bars.sort_by_key(|b| b.date);
    bars.dedup_by_key(|b| b.date);
    bars
}

/// Project bars onto a price series. Non-finite or non-positive closes
/// become missing points, so the cleaning step sees the gap.
pub fn bars_to_series(bars: &[RawBar], field: PriceField) -> PriceSeries {
    PriceSeries::new(
        bars.iter()
            .map(|bar| {
                let price = field.pick(bar);
                if price > 0.0 {
                    PricePoint::new(bar.date, price)
                } else {
                    PricePoint::missing(bar.date)
                }
            })
            .collect(),
    )
}

/// Errors from fetching, importing, or caching price data.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("provider is blocking requests (circuit breaker open)")]
    CircuitBreakerTripped,

    #[error("cache error: {0}")]
    CacheError(String),

    #[error("no cached data for symbol '{symbol}'; run `peartrader download` first")]
    NoCachedData { symbol: String },

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("csv error in {path}: {message}")]
    Csv { path: String, message: String },

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("data error: {0}")]
    Other(String),
}

impl DataError {
    /// Short reason suitable for an exclusion report.
    pub fn reason(&self) -> String {
        match self {
            Self::SymbolNotFound { .. } => "symbol not found".into(),
            Self::NoCachedData { .. } => "not cached".into(),
            Self::CircuitBreakerTripped => "provider blocked".into(),
            Self::RateLimited { .. } => "rate limited".into(),
            other => other.to_string(),
        }
    }
}

/// Where a series came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    YahooFinance,
    CsvImport,
    Cache,
    Synthetic,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::YahooFinance => "yahoo_finance",
            Self::CsvImport => "csv_import",
            Self::Cache => "cache",
            Self::Synthetic => "synthetic",
        };
        f.write_str(name)
    }
}

/// Bars fetched for one symbol.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub symbol: String,
    pub bars: Vec<RawBar>,
    pub source: DataSource,
}

/// A single-symbol data source. The cache sits above this trait.
pub trait DataProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Daily bars for `symbol` with `start <= date < end`.
    fn fetch(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<FetchResult, DataError>;

    /// False while the provider is rate limited or blocked.
    fn is_available(&self) -> bool;
}

/// Prices for a batch of symbols, plus the symbols that could not be
/// obtained at all.
#[derive(Debug, Clone, Default)]
pub struct PriceFetch {
    pub prices: PriceTable,
    pub sources: BTreeMap<String, DataSource>,
    /// Symbol → reason it could not be obtained.
    pub unavailable: BTreeMap<String, String>,
}

impl PriceFetch {
    pub fn insert(&mut self, symbol: &str, series: PriceSeries, source: DataSource) {
        self.prices.insert(symbol.to_string(), series);
        self.sources.insert(symbol.to_string(), source);
    }

    pub fn mark_unavailable(&mut self, symbol: &str, reason: impl Into<String>) {
        self.unavailable.insert(symbol.to_string(), reason.into());
    }

    pub fn has_synthetic(&self) -> bool {
        self.sources.values().any(|s| *s == DataSource::Synthetic)
    }
}

/// Batch price supply consumed by the analysis pipeline.
///
/// Per-symbol failures go to [`PriceFetch::unavailable`]; an `Err` is
/// reserved for failures that make the whole batch meaningless.
pub trait PriceSource {
    fn fetch_prices(
        &self,
        symbols: &[String],
        window: &AnalysisWindow,
    ) -> Result<PriceFetch, DataError>;
}

/// Fixed in-memory prices. Symbols not present are reported unavailable.
#[derive(Debug, Clone, Default)]
pub struct StaticPrices {
    prices: PriceTable,
}

impl StaticPrices {
    pub fn new(prices: PriceTable) -> Self {
        Self { prices }
    }
}

impl PriceSource for StaticPrices {
    fn fetch_prices(
        &self,
        symbols: &[String],
        _window: &AnalysisWindow,
    ) -> Result<PriceFetch, DataError> {
        let mut fetch = PriceFetch::default();
        for symbol in symbols {
            match self.prices.get(symbol) {
                Some(series) => fetch.insert(symbol, series.clone(), DataSource::CsvImport),
                None => fetch.mark_unavailable(symbol, "not supplied"),
            }
        }
        Ok(fetch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn series_uses_selected_field() {
        let bars = vec![RawBar {
            date: d(2),
            close: 100.0,
            adj_close: 98.5,
            volume: 10,
        }];
        assert_eq!(bars_to_series(&bars, PriceField::Close).points()[0].close, Some(100.0));
        assert_eq!(bars_to_series(&bars, PriceField::AdjClose).points()[0].close, Some(98.5));
    }

    #[test]
    fn unusable_prices_become_missing_points() {
        let bars = vec![
            RawBar::unadjusted(d(2), f64::NAN, 0),
            RawBar::unadjusted(d(3), 0.0, 0),
            RawBar::unadjusted(d(4), 101.0, 0),
        ];
        let series = bars_to_series(&bars, PriceField::Close);
        assert_eq!(series.len(), 3);
        assert!(!series.points()[0].is_present());
        assert!(!series.points()[1].is_present());
        assert!(series.points()[2].is_present());
    }

    #[test]
    fn normalize_sorts_and_dedups() {
        let bars = normalize_bars(vec![
            RawBar::unadjusted(d(3), 2.0, 0),
            RawBar::unadjusted(d(2), 1.0, 0),
            RawBar::unadjusted(d(3), 9.0, 0),
        ]);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].date, d(2));
    }

    #[test]
    fn static_prices_report_missing_symbols() {
        let mut table = PriceTable::new();
        table.insert("A".into(), PriceSeries::from_closes([(d(2), 1.0)]));
        let window = AnalysisWindow::new(d(1), d(31)).unwrap();
        let fetch = StaticPrices::new(table)
            .fetch_prices(&["A".to_string(), "B".to_string()], &window)
            .unwrap();
        assert!(fetch.prices.contains_key("A"));
        assert_eq!(fetch.unavailable["B"], "not supplied");
        assert!(!fetch.has_synthetic());
    }
}
