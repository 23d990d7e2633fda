//! Batch download into the Parquet cache.

use super::cache::{CoverageResult, ParquetCache};
use super::provider::{DataError, DataProvider};
use crate::domain::AnalysisWindow;

#[derive(Debug, Default)]
pub struct DownloadSummary {
    pub total: usize,
    /// Symbols already covered by the cache and not refetched.
    pub cached: Vec<String>,
    pub downloaded: Vec<String>,
    pub failed: Vec<(String, DataError)>,
}

impl DownloadSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Fetch each symbol and cache it, skipping symbols whose cached window
/// already covers `window` unless `force` is set.
///
/// Stops contacting the provider once it reports itself unavailable; the
/// remaining symbols are recorded as failed with the breaker error.
pub fn download_symbols<S: AsRef<str>>(
    provider: &dyn DataProvider,
    cache: &ParquetCache,
    symbols: &[S],
    window: &AnalysisWindow,
    force: bool,
) -> DownloadSummary {
    let mut summary = DownloadSummary {
        total: symbols.len(),
        ..Default::default()
    };

    for (i, symbol) in symbols.iter().enumerate() {
        let symbol = symbol.as_ref();
        if !force && cache.covers(symbol, window) == CoverageResult::FullyCovered {
            log::debug!("{symbol}: cache covers {window}");
            summary.cached.push(symbol.to_string());
            continue;
        }
        if !provider.is_available() {
            for rest in &symbols[i..] {
                summary
                    .failed
                    .push((rest.as_ref().to_string(), DataError::CircuitBreakerTripped));
            }
            log::warn!(
                "{} is unavailable; skipped {} remaining symbol(s)",
                provider.name(),
                symbols.len() - i
            );
            break;
        }

        log::info!("[{}/{}] Fetching {symbol}", i + 1, symbols.len());
        let result = provider
            .fetch(symbol, window.start(), window.end())
            .and_then(|fetch| cache.write(symbol, &fetch.bars, *window, fetch.source));
        match result {
            Ok(()) => summary.downloaded.push(symbol.to_string()),
            Err(e) => {
                log::warn!("{symbol}: {e}");
                summary.failed.push((symbol.to_string(), e));
            }
        }
    }

    log::info!(
        "Download complete: {} fetched, {} already cached, {} failed",
        summary.downloaded.len(),
        summary.cached.len(),
        summary.failed.len()
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::{DataSource, FetchResult, RawBar};
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProvider {
        calls: AtomicUsize,
        budget: usize,
    }

    impl DataProvider for FakeProvider {
        fn name(&self) -> &str {
            "fake"
        }

        fn fetch(
            &self,
            symbol: &str,
            start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<FetchResult, DataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if symbol == "BAD" {
                return Err(DataError::SymbolNotFound {
                    symbol: symbol.into(),
                });
            }
            Ok(FetchResult {
                symbol: symbol.into(),
                bars: vec![RawBar::unadjusted(start, 10.0, 1)],
                source: DataSource::YahooFinance,
            })
        }

        fn is_available(&self) -> bool {
            self.calls.load(Ordering::SeqCst) < self.budget
        }
    }

    fn window() -> AnalysisWindow {
        AnalysisWindow::parse("2024-01-02", "2024-02-01").unwrap()
    }

    #[test]
    fn failures_are_collected_and_cache_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        let provider = FakeProvider {
            calls: AtomicUsize::new(0),
            budget: usize::MAX,
        };

        let first = download_symbols(&provider, &cache, &["AAA", "BAD"], &window(), false);
        assert_eq!(first.downloaded, vec!["AAA"]);
        assert_eq!(first.failed.len(), 1);
        assert!(!first.all_succeeded());

        let second = download_symbols(&provider, &cache, &["AAA"], &window(), false);
        assert_eq!(second.cached, vec!["AAA"]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unavailable_provider_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ParquetCache::new(dir.path());
        let provider = FakeProvider {
            calls: AtomicUsize::new(0),
            budget: 1,
        };

        let summary = download_symbols(&provider, &cache, &["A", "B", "C"], &window(), true);
        assert_eq!(summary.downloaded, vec!["A"]);
        assert_eq!(summary.failed.len(), 2);
        assert!(matches!(summary.failed[1].1, DataError::CircuitBreakerTripped));
    }
}
