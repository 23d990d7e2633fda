//! Correlation engine: cleans price series and computes the pairwise Pearson
//! correlation matrix of daily returns.
//!
//! Cleaning is all-or-nothing per symbol. A symbol is dropped entirely when
//! it has no usable close in the window, misses any observation on the common
//! timeline, has fewer than two observations, or produces a non-finite return.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::AnalysisError;
use crate::data::align::align_series;
use crate::domain::{AnalysisWindow, PriceTable};

/// Return vectors with a norm below this are treated as having zero variance.
const ZERO_VARIANCE_NORM: f64 = 1e-12;

/// Why a symbol was left out of the correlation matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExclusionReason {
    /// The ingestion side could not supply a series at all.
    Unavailable { reason: String },
    /// No usable close inside the window.
    NoData,
    /// Closes missing on `missing` of the timeline's dates.
    MissingObservations { missing: usize },
    /// Fewer than two observations, so no return can be formed.
    TooFewObservations { count: usize },
    /// A return was not finite (zero or negative prior price).
    NonFiniteReturn,
}

impl fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { reason } => write!(f, "unavailable ({reason})"),
            Self::NoData => write!(f, "no data in window"),
            Self::MissingObservations { missing } => {
                write!(f, "{missing} missing observation(s)")
            }
            Self::TooFewObservations { count } => write!(f, "only {count} observation(s)"),
            Self::NonFiniteReturn => write!(f, "non-finite daily return"),
        }
    }
}

/// Square, symmetric correlation matrix over a fixed analysis window.
///
/// Columns are sorted by symbol. Diagonal entries are exactly 1.0 and every
/// entry lies in [-1, 1].
#[derive(Debug, Clone, Serialize)]
pub struct CorrelationMatrix {
    symbols: Vec<String>,
    #[serde(skip)]
    index: HashMap<String, usize>,
    /// Row-major, `symbols.len()²` entries.
    values: Vec<f64>,
    window: AnalysisWindow,
    observations: usize,
}

impl CorrelationMatrix {
    /// Build a matrix from explicit row-major values.
    ///
    /// Rows and columns are reordered so that symbols end up sorted. The input
    /// must be square, symmetric, finite, bounded in [-1, 1], with a unit
    /// diagonal and distinct symbols.
    pub fn from_values(
        symbols: Vec<String>,
        values: Vec<f64>,
        window: AnalysisWindow,
        observations: usize,
    ) -> Result<Self, AnalysisError> {
        let n = symbols.len();
        if values.len() != n * n {
            return Err(AnalysisError::InvalidMatrix(format!(
                "expected {} values for {n} symbols, got {}",
                n * n,
                values.len()
            )));
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| symbols[a].cmp(&symbols[b]));
        if order.windows(2).any(|w| symbols[w[0]] == symbols[w[1]]) {
            return Err(AnalysisError::InvalidMatrix("duplicate symbol".into()));
        }

        let mut sorted = vec![0.0; n * n];
        for (row, &i) in order.iter().enumerate() {
            for (col, &j) in order.iter().enumerate() {
                let v = values[i * n + j];
                let mirrored = values[j * n + i];
                if !v.is_finite() || !(-1.0..=1.0).contains(&v) {
                    return Err(AnalysisError::InvalidMatrix(format!(
                        "value {v} at ({}, {}) is outside [-1, 1]",
                        symbols[i], symbols[j]
                    )));
                }
                if v != mirrored {
                    return Err(AnalysisError::InvalidMatrix(format!(
                        "not symmetric at ({}, {})",
                        symbols[i], symbols[j]
                    )));
                }
                if i == j && v != 1.0 {
                    return Err(AnalysisError::InvalidMatrix(format!(
                        "diagonal entry for {} is {v}",
                        symbols[i]
                    )));
                }
                sorted[row * n + col] = v;
            }
        }

        let sorted_symbols: Vec<String> = order.iter().map(|&i| symbols[i].clone()).collect();
        Ok(Self::assemble(sorted_symbols, sorted, window, observations))
    }

    fn assemble(
        symbols: Vec<String>,
        values: Vec<f64>,
        window: AnalysisWindow,
        observations: usize,
    ) -> Self {
        let index = symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i))
            .collect();
        Self {
            symbols,
            index,
            values,
            window,
            observations,
        }
    }

    /// Column symbols, sorted.
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// The window this matrix was computed over.
    pub fn window(&self) -> AnalysisWindow {
        self.window
    }

    /// Number of aligned daily returns behind each coefficient.
    pub fn observations(&self) -> usize {
        self.observations
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.index.contains_key(symbol)
    }

    pub fn index_of(&self, symbol: &str) -> Option<usize> {
        self.index.get(symbol).copied()
    }

    /// Coefficient by column index. Panics if an index is out of range.
    pub fn value(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.len() + j]
    }

    /// Coefficient by symbol; `None` if either symbol is not a column.
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.index_of(a)?;
        let j = self.index_of(b)?;
        Some(self.value(i, j))
    }

    /// One full row of the matrix.
    pub fn row(&self, i: usize) -> &[f64] {
        let n = self.len();
        &self.values[i * n..(i + 1) * n]
    }
}

/// Output of [`CorrelationEngine::compute`].
#[derive(Debug, Clone)]
pub struct CorrelationResult {
    pub matrix: CorrelationMatrix,
    /// Every dropped symbol with the reason it was dropped.
    pub excluded: BTreeMap<String, ExclusionReason>,
}

/// Cleans price series and computes the return correlation matrix.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrelationEngine;

impl CorrelationEngine {
    pub fn new() -> Self {
        Self
    }

    /// Clean `prices` over `window` and correlate the surviving symbols.
    ///
    /// Fails with [`AnalysisError::InsufficientData`] when fewer than two
    /// symbols survive cleaning.
    pub fn compute(
        &self,
        prices: &PriceTable,
        window: AnalysisWindow,
    ) -> Result<CorrelationResult, AnalysisError> {
        let aligned = align_series(prices, &window);

        let mut excluded: BTreeMap<String, ExclusionReason> = aligned
            .empty
            .iter()
            .map(|s| (s.clone(), ExclusionReason::NoData))
            .collect();
        let mut retained: Vec<(String, Vec<f64>)> = Vec::new();

        for (symbol, closes) in aligned.closes {
            match daily_returns(&closes) {
                Ok(returns) => retained.push((symbol, returns)),
                Err(reason) => {
                    excluded.insert(symbol, reason);
                }
            }
        }

        if !excluded.is_empty() {
            log::warn!(
                "Excluded due to missing data in {window}: {:?}",
                excluded.keys().collect::<Vec<_>>()
            );
        }

        if retained.len() < 2 {
            return Err(AnalysisError::InsufficientData {
                retained: retained.into_iter().map(|(s, _)| s).collect(),
                excluded: excluded.into_keys().collect(),
            });
        }

        let observations = retained[0].1.len();
        log::info!(
            "Correlating {} symbols over {observations} daily returns ({window})",
            retained.len()
        );

        let (symbols, returns): (Vec<String>, Vec<Vec<f64>>) = retained.into_iter().unzip();
        let values = correlate(&returns);

        Ok(CorrelationResult {
            matrix: CorrelationMatrix::assemble(symbols, values, window, observations),
            excluded,
        })
    }
}

/// Daily percentage changes `(p_t - p_{t-1}) / p_{t-1}` of an aligned close
/// vector, or the reason the symbol cannot be used.
fn daily_returns(closes: &[f64]) -> Result<Vec<f64>, ExclusionReason> {
    let missing = closes.iter().filter(|c| !c.is_finite()).count();
    if missing > 0 {
        return Err(ExclusionReason::MissingObservations { missing });
    }
    if closes.len() < 2 {
        return Err(ExclusionReason::TooFewObservations {
            count: closes.len(),
        });
    }

    let returns: Vec<f64> = closes.windows(2).map(|w| (w[1] - w[0]) / w[0]).collect();
    if returns.iter().any(|r| !r.is_finite()) {
        return Err(ExclusionReason::NonFiniteReturn);
    }
    Ok(returns)
}

/// Pearson correlation of every pair of equally long return vectors,
/// returned row-major.
///
/// Rows are computed in parallel. Each coefficient depends only on its own
/// pair, so the result is identical to a sequential computation.
fn correlate(returns: &[Vec<f64>]) -> Vec<f64> {
    let n = returns.len();

    let centered: Vec<(Vec<f64>, f64)> = returns
        .par_iter()
        .map(|r| {
            let mean = r.iter().sum::<f64>() / r.len() as f64;
            let c: Vec<f64> = r.iter().map(|x| x - mean).collect();
            let norm = c.iter().map(|x| x * x).sum::<f64>().sqrt();
            (c, norm)
        })
        .collect();

    let upper: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| {
            ((i + 1)..n)
                .map(|j| pearson(&centered[i], &centered[j]))
                .collect()
        })
        .collect();

    let mut values = vec![0.0; n * n];
    for (i, row) in upper.iter().enumerate() {
        values[i * n + i] = 1.0;
        for (offset, &r) in row.iter().enumerate() {
            let j = i + 1 + offset;
            values[i * n + j] = r;
            values[j * n + i] = r;
        }
    }
    values
}

fn pearson((x, norm_x): &(Vec<f64>, f64), (y, norm_y): &(Vec<f64>, f64)) -> f64 {
    if *norm_x < ZERO_VARIANCE_NORM || *norm_y < ZERO_VARIANCE_NORM {
        return 0.0;
    }
    let cov: f64 = x.iter().zip(y).map(|(a, b)| a * b).sum();
    (cov / (norm_x * norm_y)).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PriceSeries;
    use chrono::{Duration, NaiveDate};

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn window() -> AnalysisWindow {
        AnalysisWindow::new(start(), start() + Duration::days(365)).unwrap()
    }

    /// Turn a return path into a price series starting at 100.
    fn series_from_returns(returns: &[f64]) -> PriceSeries {
        let mut price = 100.0;
        let mut closes = vec![(start(), price)];
        for (i, r) in returns.iter().enumerate() {
            price *= 1.0 + r;
            closes.push((start() + Duration::days(i as i64 + 1), price));
        }
        PriceSeries::from_closes(closes)
    }

    fn table(entries: &[(&str, PriceSeries)]) -> PriceTable {
        entries
            .iter()
            .map(|(s, p)| (s.to_string(), p.clone()))
            .collect()
    }

    #[test]
    fn identical_paths_correlate_perfectly() {
        let r = [0.01, -0.02, 0.015, 0.003, -0.007];
        let prices = table(&[("A", series_from_returns(&r)), ("B", series_from_returns(&r))]);

        let result = CorrelationEngine::new().compute(&prices, window()).unwrap();
        let corr = result.matrix.get("A", "B").unwrap();
        assert!((corr - 1.0).abs() < 1e-12, "got {corr}");
        assert!(result.excluded.is_empty());
    }

    #[test]
    fn mirrored_paths_correlate_negatively() {
        let r = [0.01, -0.02, 0.015, 0.003, -0.007];
        let neg: Vec<f64> = r.iter().map(|x| -x).collect();
        let prices = table(&[("A", series_from_returns(&r)), ("B", series_from_returns(&neg))]);

        let m = CorrelationEngine::new().compute(&prices, window()).unwrap().matrix;
        assert!((m.get("A", "B").unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn matrix_is_symmetric_with_unit_diagonal() {
        let prices = table(&[
            ("A", series_from_returns(&[0.01, -0.02, 0.03, 0.0])),
            ("B", series_from_returns(&[0.02, 0.01, -0.01, 0.01])),
            ("C", series_from_returns(&[-0.01, 0.0, 0.02, -0.03])),
        ]);
        let m = CorrelationEngine::new().compute(&prices, window()).unwrap().matrix;

        assert_eq!(m.symbols(), &["A", "B", "C"]);
        for i in 0..m.len() {
            assert_eq!(m.value(i, i), 1.0);
            for j in 0..m.len() {
                assert_eq!(m.value(i, j), m.value(j, i));
                assert!((-1.0..=1.0).contains(&m.value(i, j)));
            }
        }
        assert_eq!(m.observations(), 4);
    }

    #[test]
    fn gap_excludes_symbol_entirely() {
        let gappy: Vec<(NaiveDate, f64)> = (0..5)
            .map(|i| {
                let close = if i == 2 { f64::NAN } else { 100.0 + i as f64 };
                (start() + Duration::days(i), close)
            })
            .collect();
        let prices = table(&[
            ("A", series_from_returns(&[0.01, -0.02, 0.03, 0.0])),
            ("B", series_from_returns(&[0.02, 0.01, -0.01, 0.01])),
            ("GAP", PriceSeries::from_closes(gappy)),
        ]);

        let result = CorrelationEngine::new().compute(&prices, window()).unwrap();
        assert!(!result.matrix.contains("GAP"));
        assert_eq!(
            result.excluded.get("GAP"),
            Some(&ExclusionReason::MissingObservations { missing: 1 })
        );
    }

    #[test]
    fn shorter_history_counts_as_missing() {
        // LATE only starts trading halfway through the window
        let late = PriceSeries::from_closes(
            (2..5).map(|i| (start() + Duration::days(i), 50.0 + i as f64)),
        );
        let prices = table(&[
            ("A", series_from_returns(&[0.01, -0.02, 0.03, 0.0])),
            ("B", series_from_returns(&[0.02, 0.01, -0.01, 0.01])),
            ("LATE", late),
        ]);

        let result = CorrelationEngine::new().compute(&prices, window()).unwrap();
        assert_eq!(
            result.excluded.get("LATE"),
            Some(&ExclusionReason::MissingObservations { missing: 2 })
        );
        assert_eq!(result.matrix.len(), 2);
    }

    #[test]
    fn zero_prior_price_is_excluded() {
        let zero = PriceSeries::from_closes(
            (0..5).map(|i| (start() + Duration::days(i), if i == 1 { 0.0 } else { 10.0 })),
        );
        let prices = table(&[
            ("A", series_from_returns(&[0.01, -0.02, 0.03, 0.0])),
            ("B", series_from_returns(&[0.02, 0.01, -0.01, 0.01])),
            ("ZERO", zero),
        ]);

        let result = CorrelationEngine::new().compute(&prices, window()).unwrap();
        assert_eq!(result.excluded.get("ZERO"), Some(&ExclusionReason::NonFiniteReturn));
    }

    #[test]
    fn flat_series_correlates_as_zero() {
        let flat = PriceSeries::from_closes((0..5).map(|i| (start() + Duration::days(i), 10.0)));
        let prices = table(&[("A", series_from_returns(&[0.01, -0.02, 0.03, 0.0])), ("FLAT", flat)]);

        let m = CorrelationEngine::new().compute(&prices, window()).unwrap().matrix;
        assert_eq!(m.get("A", "FLAT"), Some(0.0));
        assert_eq!(m.get("FLAT", "FLAT"), Some(1.0));
    }

    #[test]
    fn fewer_than_two_survivors_is_insufficient() {
        let prices = table(&[
            ("A", series_from_returns(&[0.01, -0.02])),
            ("EMPTY", PriceSeries::default()),
        ]);

        let err = CorrelationEngine::new().compute(&prices, window()).unwrap_err();
        match err {
            AnalysisError::InsufficientData { retained, excluded } => {
                assert_eq!(retained, vec!["A".to_string()]);
                assert_eq!(excluded, vec!["EMPTY".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn single_observation_is_too_few() {
        let one = |p| PriceSeries::from_closes([(start(), p)]);
        let prices = table(&[("A", one(10.0)), ("B", one(20.0))]);

        let err = CorrelationEngine::new().compute(&prices, window()).unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientData { .. }));
    }

    #[test]
    fn cleaning_runs_even_when_nothing_is_excluded() {
        let prices = table(&[
            ("A", series_from_returns(&[0.01, -0.02, 0.03])),
            ("B", series_from_returns(&[0.02, 0.01, -0.01])),
        ]);
        let result = CorrelationEngine::new().compute(&prices, window()).unwrap();
        assert!(result.excluded.is_empty());
        assert_eq!(result.matrix.len(), 2);
    }

    #[test]
    fn from_values_sorts_and_validates() {
        let m = CorrelationMatrix::from_values(
            vec!["B".into(), "A".into()],
            vec![1.0, 0.3, 0.3, 1.0],
            window(),
            10,
        )
        .unwrap();
        assert_eq!(m.symbols(), &["A", "B"]);
        assert_eq!(m.get("B", "A"), Some(0.3));

        let asym = CorrelationMatrix::from_values(
            vec!["A".into(), "B".into()],
            vec![1.0, 0.3, 0.4, 1.0],
            window(),
            10,
        );
        assert!(matches!(asym, Err(AnalysisError::InvalidMatrix(_))));

        let out_of_range = CorrelationMatrix::from_values(
            vec!["A".into(), "B".into()],
            vec![1.0, 1.3, 1.3, 1.0],
            window(),
            10,
        );
        assert!(out_of_range.is_err());
    }
}
