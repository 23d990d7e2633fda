//! Query layer over a completed analysis.
//!
//! A [`QueryService`] holds one session snapshot (or none). Every answer it
//! gives comes from that single snapshot, so matrix, graph, and partition are
//! always from the same analysis run.

use serde::Serialize;
use std::sync::Arc;

use super::session::AnalysisSession;
use super::AnalysisError;

/// A fellow community member and its correlation with the queried symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommunityPeer {
    pub symbol: String,
    pub correlation: f64,
}

/// Answers community-membership and pairwise-correlation queries.
#[derive(Debug, Clone)]
pub struct QueryService {
    session: Option<Arc<AnalysisSession>>,
}

impl QueryService {
    /// `None` means no analysis has completed yet; every query then fails
    /// with [`AnalysisError::NotAnalyzed`].
    pub fn new(session: Option<Arc<AnalysisSession>>) -> Self {
        Self { session }
    }

    fn session(&self) -> Result<&AnalysisSession, AnalysisError> {
        self.session.as_deref().ok_or(AnalysisError::NotAnalyzed)
    }

    /// Members of `symbol`'s community in the same order as the partition.
    pub fn community_of(&self, symbol: &str) -> Result<&[String], AnalysisError> {
        let session = self.session()?;
        if !session.graph().contains(symbol) {
            return Err(AnalysisError::unknown(symbol));
        }
        let partition = session.partition();
        partition
            .community_of(symbol)
            .and_then(|c| partition.members(c))
            .ok_or_else(|| AnalysisError::unknown(symbol))
    }

    /// Other members of `symbol`'s community whose correlation with `symbol`
    /// is at least `threshold`, in partition member order.
    ///
    /// The correlation comes from the matrix, so `threshold` may differ from
    /// the one the graph was built with. An empty result is not an error.
    pub fn connected_in_community(
        &self,
        symbol: &str,
        threshold: f64,
    ) -> Result<Vec<String>, AnalysisError> {
        Ok(self
            .qualifying_peers(symbol, threshold)?
            .into_iter()
            .map(|p| p.symbol)
            .collect())
    }

    /// Same members as [`connected_in_community`](Self::connected_in_community),
    /// with their coefficients, strongest first.
    pub fn community_peers(
        &self,
        symbol: &str,
        threshold: f64,
    ) -> Result<Vec<CommunityPeer>, AnalysisError> {
        let mut peers = self.qualifying_peers(symbol, threshold)?;
        peers.sort_by(|a, b| {
            b.correlation
                .total_cmp(&a.correlation)
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        Ok(peers)
    }

    fn qualifying_peers(
        &self,
        symbol: &str,
        threshold: f64,
    ) -> Result<Vec<CommunityPeer>, AnalysisError> {
        if threshold.is_nan() {
            return Err(AnalysisError::InvalidThreshold { value: threshold });
        }
        let members = self.community_of(symbol)?;
        let matrix = self.session()?.matrix();

        Ok(members
            .iter()
            .filter(|other| other.as_str() != symbol)
            .filter_map(|other| {
                let correlation = matrix.get(symbol, other)?;
                (correlation >= threshold).then(|| CommunityPeer {
                    symbol: other.clone(),
                    correlation,
                })
            })
            .collect())
    }

    /// Stored coefficient between two matrix columns. Symmetric in its
    /// arguments.
    pub fn correlation_between(&self, a: &str, b: &str) -> Result<f64, AnalysisError> {
        let matrix = self.session()?.matrix();
        for symbol in [a, b] {
            if !matrix.contains(symbol) {
                return Err(AnalysisError::unknown(symbol));
            }
        }
        matrix
            .get(a, b)
            .ok_or_else(|| AnalysisError::unknown(a))
    }
}
