//! Analysis runner: wires config, price loading, and the analytics session.
//!
//! `run_analysis()` is the single entry point used by the CLI. It resolves
//! the threshold, asks a [`PriceSource`] for the universe, runs the
//! pipeline, and fingerprints the result.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use peartrader_core::analytics::{
    AnalysisError, AnalysisSession, ExclusionReason, QueryService, SessionSummary,
};
use peartrader_core::data::{DataError, DataSource, PriceSource};

use crate::config::{AnalysisConfig, ConfigError, ResolvedThreshold, ThresholdNotice};
use crate::data_loader::dataset_hash;

/// Errors from the runner.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("data error: {0}")]
    Data(#[from] DataError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
}

/// Current schema version for persisted artifacts.
pub const SCHEMA_VERSION: u32 = 1;

/// A completed analysis plus the provenance needed to reproduce it.
#[derive(Debug, Clone)]
pub struct AnalysisRun {
    pub session: Arc<AnalysisSession>,
    pub threshold: ResolvedThreshold,
    /// BLAKE3 over the result-determining config fields.
    pub fingerprint: String,
    /// BLAKE3 over the loaded prices.
    pub dataset_hash: String,
    pub sources: BTreeMap<String, DataSource>,
    pub has_synthetic: bool,
    pub created_at: NaiveDateTime,
}

impl AnalysisRun {
    /// Identifier combining config and data: equal ids mean equal results.
    pub fn run_id(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.fingerprint.as_bytes());
        hasher.update(self.dataset_hash.as_bytes());
        hasher.finalize().to_hex().as_str()[..16].to_string()
    }

    pub fn queries(&self) -> QueryService {
        QueryService::new(Some(Arc::clone(&self.session)))
    }

    pub fn manifest(&self) -> RunManifest {
        RunManifest {
            schema_version: SCHEMA_VERSION,
            run_id: self.run_id(),
            fingerprint: self.fingerprint.clone(),
            dataset_hash: self.dataset_hash.clone(),
            summary: self.session.summary(),
            threshold_notice: self.threshold.notice.clone(),
            sources: self.sources.clone(),
            excluded: self
                .session
                .excluded()
                .iter()
                .map(|(s, r)| (s.clone(), r.to_string()))
                .collect(),
            has_synthetic: self.has_synthetic,
            created_at: self.created_at,
        }
    }
}

/// Persisted description of a run, written next to its artifacts.
#[derive(Debug, Clone, Serialize)]
pub struct RunManifest {
    pub schema_version: u32,
    pub run_id: String,
    pub fingerprint: String,
    pub dataset_hash: String,
    pub summary: SessionSummary,
    pub threshold_notice: Option<ThresholdNotice>,
    pub sources: BTreeMap<String, DataSource>,
    /// Symbol → human-readable exclusion reason.
    pub excluded: BTreeMap<String, String>,
    pub has_synthetic: bool,
    pub created_at: NaiveDateTime,
}

/// Load prices for the configured universe and analyze them.
///
/// Symbols the source cannot supply are reported in the session's exclusion
/// list (or in the `InsufficientData` error) as unavailable.
pub fn run_analysis(
    config: &AnalysisConfig,
    source: &dyn PriceSource,
) -> Result<AnalysisRun, RunError> {
    let window = config.window()?;
    let threshold = config.resolved_threshold();
    if let Some(notice) = &threshold.notice {
        log::warn!("{notice}");
    }

    let symbols = config.universe.symbols();
    log::info!(
        "Analyzing {} symbols over {window} at threshold {}",
        symbols.len(),
        threshold.value
    );

    let fetch = source.fetch_prices(&symbols, &window)?;
    let unavailable: Vec<(String, ExclusionReason)> = fetch
        .unavailable
        .iter()
        .map(|(symbol, reason)| {
            (
                symbol.clone(),
                ExclusionReason::Unavailable {
                    reason: reason.clone(),
                },
            )
        })
        .collect();

    let session = match AnalysisSession::analyze(&fetch.prices, window, threshold.value) {
        Ok(session) => session.with_excluded(unavailable),
        Err(AnalysisError::InsufficientData {
            retained,
            mut excluded,
        }) => {
            excluded.extend(unavailable.into_iter().map(|(symbol, _)| symbol));
            excluded.sort();
            excluded.dedup();
            return Err(AnalysisError::InsufficientData { retained, excluded }.into());
        }
        Err(e) => return Err(e.into()),
    };

    if fetch.has_synthetic() {
        log::warn!("Results include synthetic prices and are not market data");
    }

    Ok(AnalysisRun {
        session: Arc::new(session),
        fingerprint: config.fingerprint()?,
        dataset_hash: dataset_hash(&fetch.prices),
        has_synthetic: fetch.has_synthetic(),
        sources: fetch.sources,
        threshold,
        created_at: Utc::now().naive_utc(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use chrono::{Duration, NaiveDate};
    use peartrader_core::data::{StaticPrices, Universe};
    use peartrader_core::domain::{PriceSeries, PriceTable};
    use std::collections::BTreeMap;

    fn config(threshold: Option<f64>) -> AnalysisConfig {
        let mut config = AnalysisConfig::for_window("2024-03-01", "2024-05-01");
        config.universe = Universe::from_sectors(BTreeMap::from([(
            "Test".to_string(),
            vec!["AAA".into(), "BBB".into(), "CCC".into(), "GONE".into()],
        )]))
        .unwrap();
        config.analysis.threshold = threshold;
        config
    }

    fn series(phase: f64, coupling: f64) -> PriceSeries {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let mut price = 50.0;
        let mut closes = vec![(start, price)];
        for t in 1..30 {
            let x = t as f64;
            let r = 0.01 * (coupling * (x * 1.3).sin() + (1.0 - coupling) * (x * 4.7 + phase).cos());
            price *= 1.0 + r;
            closes.push((start + Duration::days(t), price));
        }
        PriceSeries::from_closes(closes)
    }

    fn prices() -> PriceTable {
        let mut table = PriceTable::new();
        table.insert("AAA".into(), series(0.0, 1.0));
        table.insert("BBB".into(), series(0.5, 0.9));
        table.insert("CCC".into(), series(2.0, 0.0));
        table
    }

    #[test]
    fn unavailable_symbols_are_reported_as_excluded() {
        let run = run_analysis(&config(Some(0.7)), &StaticPrices::new(prices())).unwrap();

        assert_eq!(run.session.matrix().len(), 3);
        assert!(matches!(
            run.session.excluded().get("GONE"),
            Some(ExclusionReason::Unavailable { .. })
        ));
        assert_eq!(run.threshold.value, 0.7);
        assert!(!run.has_synthetic);
        assert_eq!(run.manifest().excluded.len(), 1);
    }

    #[test]
    fn low_threshold_is_replaced_with_default() {
        let run = run_analysis(&config(Some(0.2)), &StaticPrices::new(prices())).unwrap();
        assert_eq!(run.session.threshold(), 0.68);
        assert!(matches!(
            run.threshold.notice,
            Some(ThresholdNotice::TooLow { .. })
        ));
    }

    #[test]
    fn insufficient_data_lists_unavailable_symbols() {
        let mut table = PriceTable::new();
        table.insert("AAA".into(), series(0.0, 1.0));
        let err = run_analysis(&config(None), &StaticPrices::new(table)).unwrap_err();

        match err {
            RunError::Analysis(AnalysisError::InsufficientData { retained, excluded }) => {
                assert_eq!(retained, vec!["AAA"]);
                assert_eq!(excluded, vec!["BBB", "CCC", "GONE"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn run_id_is_stable_for_equal_inputs() {
        let a = run_analysis(&config(None), &StaticPrices::new(prices())).unwrap();
        let b = run_analysis(&config(None), &StaticPrices::new(prices())).unwrap();
        assert_eq!(a.run_id(), b.run_id());

        let c = run_analysis(&config(Some(0.9)), &StaticPrices::new(prices())).unwrap();
        assert_ne!(a.run_id(), c.run_id());
    }
}
