//! Co-movement analytics: correlation matrix, threshold graph, community
//! detection, and the query layer over a completed analysis.
//!
//! Pipeline: price series → [`CorrelationEngine`] → [`CorrelationMatrix`]
//! → [`GraphBuilder`] → [`CorrelationGraph`] → [`CommunityDetector`]
//! → [`CommunityPartition`]. An [`AnalysisSession`] holds one consistent set
//! of those outputs; [`QueryService`] answers questions against it.
//!
//! Nothing in this module performs network or file I/O.

pub mod community;
pub mod correlation;
pub mod graph;
pub mod query;
pub mod session;

pub use community::{
    modularity, CommunityDetector, CommunityPartition, Detection, DetectionTrace, MergeStep,
};
pub use correlation::{CorrelationEngine, CorrelationMatrix, CorrelationResult, ExclusionReason};
pub use graph::{CorrelationGraph, Edge, GraphBuilder};
pub use query::{CommunityPeer, QueryService};
pub use session::{AnalysisSession, SessionStore, SessionSummary};

use chrono::NaiveDate;
use thiserror::Error;

/// Errors surfaced by the analytics pipeline and its query layer.
///
/// All variants are recoverable: they carry enough context for a caller to
/// fix its input and retry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error("invalid date '{input}': expected format {expected}")]
    InvalidDateFormat {
        input: String,
        expected: &'static str,
    },

    #[error("invalid date range: start {start} must be before end {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error(
        "insufficient data: {} symbol(s) survived cleaning, at least 2 required (excluded: {})",
        .retained.len(),
        .excluded.join(", ")
    )]
    InsufficientData {
        retained: Vec<String>,
        excluded: Vec<String>,
    },

    #[error("unknown symbol: {symbol}")]
    UnknownSymbol { symbol: String },

    #[error("no analysis has been run yet")]
    NotAnalyzed,

    #[error("invalid threshold: {value}")]
    InvalidThreshold { value: f64 },

    #[error("invalid correlation matrix: {0}")]
    InvalidMatrix(String),
}

impl AnalysisError {
    pub(crate) fn unknown(symbol: &str) -> Self {
        Self::UnknownSymbol {
            symbol: symbol.to_string(),
        }
    }
}
