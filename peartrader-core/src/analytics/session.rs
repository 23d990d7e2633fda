//! Analysis session: one consistent set of matrix, graph, and partition.
//!
//! A session is immutable once built. [`SessionStore`] swaps whole sessions
//! behind an `Arc`, so a reader holding a snapshot never observes a partial
//! update from a concurrent analysis.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use super::community::{CommunityDetector, CommunityPartition, DetectionTrace};
use super::correlation::{CorrelationEngine, CorrelationMatrix, ExclusionReason};
use super::graph::{CorrelationGraph, GraphBuilder};
use super::query::{CommunityPeer, QueryService};
use super::AnalysisError;
use crate::domain::{AnalysisWindow, PriceTable};

/// Outputs of one analysis run and the inputs that produced them.
#[derive(Debug, Clone)]
pub struct AnalysisSession {
    threshold: f64,
    matrix: CorrelationMatrix,
    graph: CorrelationGraph,
    partition: CommunityPartition,
    trace: DetectionTrace,
    excluded: BTreeMap<String, ExclusionReason>,
}

impl AnalysisSession {
    /// Run the full pipeline: clean and correlate, threshold, detect.
    pub fn analyze(
        prices: &PriceTable,
        window: AnalysisWindow,
        threshold: f64,
    ) -> Result<Self, AnalysisError> {
        // Reject the threshold before doing the O(n²) correlation work.
        GraphBuilder::new(threshold)?;
        let result = CorrelationEngine::new().compute(prices, window)?;
        Self::from_matrix(result.matrix, threshold, result.excluded)
    }

    /// Build the graph and partition over an existing matrix.
    pub fn from_matrix(
        matrix: CorrelationMatrix,
        threshold: f64,
        excluded: BTreeMap<String, ExclusionReason>,
    ) -> Result<Self, AnalysisError> {
        let graph = GraphBuilder::new(threshold)?.build(&matrix);
        let detection = CommunityDetector::new().detect_with_trace(&graph);

        log::info!(
            "Analysis {}: {} communities ({} singletons), modularity {:.4}",
            matrix.window(),
            detection.partition.len(),
            detection.partition.singleton_count(),
            detection.partition.modularity()
        );

        Ok(Self {
            threshold,
            matrix,
            graph,
            partition: detection.partition,
            trace: detection.trace,
            excluded,
        })
    }

    /// Record symbols dropped before the pipeline saw them. Existing entries
    /// keep their reason.
    pub fn with_excluded<I>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = (String, ExclusionReason)>,
    {
        for (symbol, reason) in extra {
            self.excluded.entry(symbol).or_insert(reason);
        }
        self
    }

    pub fn window(&self) -> AnalysisWindow {
        self.matrix.window()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn matrix(&self) -> &CorrelationMatrix {
        &self.matrix
    }

    pub fn graph(&self) -> &CorrelationGraph {
        &self.graph
    }

    pub fn partition(&self) -> &CommunityPartition {
        &self.partition
    }

    pub fn trace(&self) -> &DetectionTrace {
        &self.trace
    }

    /// Every symbol left out of the matrix, with the reason.
    pub fn excluded(&self) -> &BTreeMap<String, ExclusionReason> {
        &self.excluded
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            window: self.window(),
            threshold: self.threshold,
            symbols: self.matrix.len(),
            observations: self.matrix.observations(),
            edges: self.graph.edge_count(),
            communities: self.partition.len(),
            modularity: self.partition.modularity(),
            excluded: self.excluded.len(),
        }
    }
}

/// Headline numbers of a session, for display and manifests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub window: AnalysisWindow,
    pub threshold: f64,
    pub symbols: usize,
    pub observations: usize,
    pub edges: usize,
    pub communities: usize,
    pub modularity: f64,
    pub excluded: usize,
}

/// Holder of the latest completed session.
///
/// Starts empty; every query fails with [`AnalysisError::NotAnalyzed`] until
/// the first [`replace`](Self::replace).
#[derive(Debug, Default)]
pub struct SessionStore {
    current: RwLock<Option<Arc<AnalysisSession>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a new session wholesale, returning the previous one.
    pub fn replace(&self, session: AnalysisSession) -> Option<Arc<AnalysisSession>> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        guard.replace(Arc::new(session))
    }

    /// Analyze and install the result. On error the current session is kept.
    pub fn analyze(
        &self,
        prices: &PriceTable,
        window: AnalysisWindow,
        threshold: f64,
    ) -> Result<Arc<AnalysisSession>, AnalysisError> {
        let session = Arc::new(AnalysisSession::analyze(prices, window, threshold)?);
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(Arc::clone(&session));
        Ok(session)
    }

    pub fn snapshot(&self) -> Result<Arc<AnalysisSession>, AnalysisError> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(AnalysisError::NotAnalyzed)
    }

    pub fn is_analyzed(&self) -> bool {
        self.snapshot().is_ok()
    }

    /// Query service bound to the current snapshot. Later replacements do
    /// not affect it.
    pub fn query_service(&self) -> QueryService {
        QueryService::new(self.snapshot().ok())
    }

    pub fn connected_in_community(
        &self,
        symbol: &str,
        threshold: f64,
    ) -> Result<Vec<String>, AnalysisError> {
        self.query_service().connected_in_community(symbol, threshold)
    }

    pub fn community_peers(
        &self,
        symbol: &str,
        threshold: f64,
    ) -> Result<Vec<CommunityPeer>, AnalysisError> {
        self.query_service().community_peers(symbol, threshold)
    }

    pub fn correlation_between(&self, a: &str, b: &str) -> Result<f64, AnalysisError> {
        self.query_service().correlation_between(a, b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PriceSeries;
    use chrono::{Duration, NaiveDate};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn window() -> AnalysisWindow {
        AnalysisWindow::new(d(1), d(30)).unwrap()
    }

    fn series_from_returns(returns: &[f64]) -> PriceSeries {
        let mut price = 100.0;
        let mut closes = vec![(d(1), price)];
        for (i, r) in returns.iter().enumerate() {
            price *= 1.0 + r;
            closes.push((d(1) + Duration::days(i as i64 + 1), price));
        }
        PriceSeries::from_closes(closes)
    }

    fn prices() -> PriceTable {
        let base = [0.01, -0.02, 0.015, 0.03, -0.01, 0.005, -0.025, 0.02];
        let echo: Vec<f64> = base.iter().map(|r| r * 1.5 + 0.001).collect();
        let other = [0.02, 0.01, -0.01, 0.0, 0.03, -0.02, 0.01, -0.005];
        let mut table = PriceTable::new();
        table.insert("A".into(), series_from_returns(&base));
        table.insert("B".into(), series_from_returns(&echo));
        table.insert("C".into(), series_from_returns(&other));
        table
    }

    #[test]
    fn store_starts_unanalyzed() {
        let store = SessionStore::new();
        assert!(!store.is_analyzed());
        assert_eq!(store.snapshot().unwrap_err(), AnalysisError::NotAnalyzed);
        assert_eq!(
            store.correlation_between("A", "B"),
            Err(AnalysisError::NotAnalyzed)
        );
    }

    #[test]
    fn analyze_then_query() {
        let store = SessionStore::new();
        let session = store.analyze(&prices(), window(), 0.9).unwrap();

        assert_eq!(session.matrix().symbols(), &["A", "B", "C"]);
        assert!(session.excluded().is_empty());
        assert_eq!(store.connected_in_community("A", 0.9).unwrap(), vec!["B"]);
        assert!(store.correlation_between("A", "B").unwrap() > 0.99);
    }

    #[test]
    fn failed_analysis_keeps_previous_session() {
        let store = SessionStore::new();
        store.analyze(&prices(), window(), 0.9).unwrap();

        let mut thin = PriceTable::new();
        thin.insert("A".into(), series_from_returns(&[0.01, 0.02]));
        let err = store.analyze(&thin, window(), 0.9).unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientData { .. }));

        assert_eq!(store.snapshot().unwrap().matrix().len(), 3);
    }

    #[test]
    fn held_snapshot_survives_replacement() {
        let store = SessionStore::new();
        store.analyze(&prices(), window(), 0.9).unwrap();
        let queries = store.query_service();

        let mut two = prices();
        two.remove("C");
        store.analyze(&two, window(), 0.9).unwrap();

        assert!(queries.correlation_between("A", "C").is_ok());
        assert!(matches!(
            store.correlation_between("A", "C"),
            Err(AnalysisError::UnknownSymbol { .. })
        ));
    }

    #[test]
    fn nan_threshold_rejected_up_front() {
        let err = AnalysisSession::analyze(&prices(), window(), f64::NAN).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidThreshold { .. }));
    }

    #[test]
    fn with_excluded_keeps_existing_reasons() {
        let mut table = prices();
        table.insert("D".into(), PriceSeries::default());
        let session = AnalysisSession::analyze(&table, window(), 0.9)
            .unwrap()
            .with_excluded([
                (
                    "D".to_string(),
                    ExclusionReason::Unavailable {
                        reason: "timeout".into(),
                    },
                ),
                (
                    "E".to_string(),
                    ExclusionReason::Unavailable {
                        reason: "not found".into(),
                    },
                ),
            ]);

        assert_eq!(session.excluded()["D"], ExclusionReason::NoData);
        assert!(matches!(
            session.excluded()["E"],
            ExclusionReason::Unavailable { .. }
        ));
        assert_eq!(session.summary().excluded, 2);
    }
}
