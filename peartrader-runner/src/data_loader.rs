//! Price loading and data resolution for the runner.
//!
//! For each requested symbol the loader applies a fallback policy:
//! 1. If the cache covers the window → use it
//! 2. If not and a provider is reachable → download, cache, use
//! 3. If `synthetic` is set → generate sector-factor prices (tagged)
//! 4. Otherwise → report the symbol unavailable with the reason
//!
//! A symbol that cannot be loaded never fails the batch; the analysis
//! decides whether enough symbols survived.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use peartrader_core::data::{
    bars_to_series, normalize_bars, CoverageResult, DataError, DataProvider, DataSource,
    ParquetCache, PriceField, PriceFetch, PriceSource, Universe,
};
use peartrader_core::domain::{AnalysisWindow, PriceSeries, PriceTable};

/// Why one symbol could not be loaded.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no cached data and no network access (enable synthetic data to continue)")]
    NoCachedDataOffline,

    #[error("no cached data and download failed: {reason}")]
    DownloadFailed { reason: String },

    #[error("data error: {0}")]
    Data(#[from] DataError),
}

/// Options controlling how prices are loaded.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Never make network requests.
    pub offline: bool,
    /// Generate synthetic prices when real data is unavailable.
    pub synthetic: bool,
    /// Refetch even when the cache covers the window.
    pub force: bool,
    pub price_field: PriceField,
}

/// [`PriceSource`] backed by the Parquet cache and an optional provider.
pub struct PriceLoader<'a> {
    cache: &'a ParquetCache,
    provider: Option<&'a dyn DataProvider>,
    universe: Option<&'a Universe>,
    opts: LoadOptions,
}

impl<'a> PriceLoader<'a> {
    pub fn new(cache: &'a ParquetCache, opts: LoadOptions) -> Self {
        Self {
            cache,
            provider: None,
            universe: None,
            opts,
        }
    }

    pub fn with_provider(mut self, provider: &'a dyn DataProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Sector membership for synthetic prices. Without it every symbol gets
    /// its own factor.
    pub fn with_universe(mut self, universe: &'a Universe) -> Self {
        self.universe = Some(universe);
        self
    }

    fn load_one(
        &self,
        symbol: &str,
        window: &AnalysisWindow,
    ) -> Result<(PriceSeries, DataSource), LoadError> {
        let coverage = self.cache.covers(symbol, window);

        if !self.opts.force && coverage == CoverageResult::FullyCovered {
            let bars = self.cache.load_window(symbol, window)?;
            return Ok((bars_to_series(&bars, self.opts.price_field), DataSource::Cache));
        }

        let download_error = match self.download(symbol, window) {
            Ok(series) => return Ok((series, DataSource::YahooFinance)),
            Err(e) => e,
        };

        // Partial coverage still beats nothing when the network is out.
        if let CoverageResult::PartiallyCovered { cached } = coverage {
            let bars = self.cache.load_window(symbol, window)?;
            if !bars.is_empty() {
                log::warn!("{symbol}: using cached {cached}, which only partly covers {window}");
                return Ok((bars_to_series(&bars, self.opts.price_field), DataSource::Cache));
            }
        }

        if self.opts.synthetic {
            log::warn!("generating synthetic prices for {symbol}; results will be tagged synthetic");
            let sector = self
                .universe
                .and_then(|u| u.sector_of(symbol))
                .unwrap_or(symbol);
            return Ok((synthetic_series(symbol, sector, window), DataSource::Synthetic));
        }

        Err(download_error)
    }

    fn download(&self, symbol: &str, window: &AnalysisWindow) -> Result<PriceSeries, LoadError> {
        if self.opts.offline {
            return Err(LoadError::NoCachedDataOffline);
        }
        let provider = self.provider.ok_or_else(|| LoadError::DownloadFailed {
            reason: "no data provider configured".into(),
        })?;
        if !provider.is_available() {
            return Err(LoadError::DownloadFailed {
                reason: format!("{} is unavailable", provider.name()),
            });
        }

        let fetch = provider
            .fetch(symbol, window.start(), window.end())
            .map_err(|e| LoadError::DownloadFailed { reason: e.reason() })?;
        let bars = normalize_bars(fetch.bars);
        if bars.is_empty() {
            return Err(LoadError::DownloadFailed {
                reason: format!("{} returned no bars in {window}", provider.name()),
            });
        }
        self.cache.write(symbol, &bars, *window, fetch.source)?;
        log::debug!("{symbol}: cached {} bars from {}", bars.len(), provider.name());
        Ok(bars_to_series(&bars, self.opts.price_field))
    }
}

impl PriceSource for PriceLoader<'_> {
    fn fetch_prices(
        &self,
        symbols: &[String],
        window: &AnalysisWindow,
    ) -> Result<PriceFetch, DataError> {
        let mut fetch = PriceFetch::default();
        for (i, symbol) in symbols.iter().enumerate() {
            log::debug!("[{}/{}] loading {symbol}", i + 1, symbols.len());
            match self.load_one(symbol, window) {
                Ok((series, source)) => fetch.insert(symbol, series, source),
                Err(e) => {
                    log::warn!("{symbol}: {e}");
                    fetch.mark_unavailable(symbol, e.to_string());
                }
            }
        }
        log::info!(
            "Loaded {} of {} symbols ({} unavailable)",
            fetch.prices.len(),
            symbols.len(),
            fetch.unavailable.len()
        );
        Ok(fetch)
    }
}

/// Deterministic BLAKE3 hash over every close in the table.
///
/// Iterates symbols in key order, so the hash depends only on content.
pub fn dataset_hash(prices: &PriceTable) -> String {
    let mut hasher = blake3::Hasher::new();
    for (symbol, series) in prices {
        hasher.update(symbol.as_bytes());
        for point in series.points() {
            hasher.update(point.date.to_string().as_bytes());
            let bits = point.close.map_or(u64::MAX, f64::to_bits);
            hasher.update(&bits.to_le_bytes());
        }
    }
    hasher.finalize().to_hex().to_string()
}

fn seeded_rng(parts: &[&str]) -> StdRng {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(&[0]);
    }
    StdRng::from_seed(*hasher.finalize().as_bytes())
}

fn business_days(window: &AnalysisWindow) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut current = window.start();
    while current < window.end() {
        if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
            days.push(current);
        }
        current += Duration::days(1);
    }
    days
}

/// One-factor synthetic prices: a shared sector return plus an
/// idiosyncratic return, compounded from 100.
///
/// Symbols in the same sector draw the same factor path, so they correlate
/// strongly with each other and weakly with everything else.
fn synthetic_series(symbol: &str, sector: &str, window: &AnalysisWindow) -> PriceSeries {
    let start = window.start().to_string();
    let end = window.end().to_string();
    let mut factor = seeded_rng(&["sector", sector, &start, &end]);
    let mut idio = seeded_rng(&["symbol", symbol, &start, &end]);

    let mut price = 100.0_f64;
    let closes: Vec<(NaiveDate, f64)> = business_days(window)
        .into_iter()
        .map(|date| {
            let r = factor.gen_range(-0.02..0.02) + idio.gen_range(-0.01..0.01);
            price *= 1.0 + r;
            (date, price)
        })
        .collect();
    PriceSeries::from_closes(closes)
}
