//! Threshold graph over a correlation matrix.
//!
//! Nodes are the matrix columns; an undirected edge joins two distinct
//! symbols whose correlation is at least the threshold, weighted by that
//! correlation. Symbols without a qualifying neighbor stay as isolated nodes.

use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;

use super::correlation::CorrelationMatrix;
use super::AnalysisError;

/// Undirected weighted edge. Always `source < target` (node indices).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Edge {
    pub source: usize,
    pub target: usize,
    pub weight: f64,
}

/// Undirected, edge-weighted graph with no self-loops and no duplicate edges.
#[derive(Debug, Clone)]
pub struct CorrelationGraph {
    nodes: Vec<String>,
    index: HashMap<String, usize>,
    /// Neighbor lists sorted by neighbor index.
    adjacency: Vec<Vec<(usize, f64)>>,
    edges: Vec<Edge>,
    threshold: f64,
}

impl CorrelationGraph {
    fn assemble(nodes: Vec<String>, mut edges: Vec<Edge>, threshold: f64) -> Self {
        edges.sort_by_key(|e| (e.source, e.target));

        let mut adjacency = vec![Vec::new(); nodes.len()];
        for e in &edges {
            adjacency[e.source].push((e.target, e.weight));
            adjacency[e.target].push((e.source, e.weight));
        }
        for list in &mut adjacency {
            list.sort_by_key(|&(n, _)| n);
        }

        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i))
            .collect();

        Self {
            nodes,
            index,
            adjacency,
            edges,
            threshold,
        }
    }

    /// Build a graph from an explicit node list and `(a, b, weight)` edges.
    ///
    /// Nodes are sorted and deduplicated. Self-loops are dropped, and only the
    /// first edge supplied for a pair is kept. Edges naming an unknown node
    /// fail with [`AnalysisError::UnknownSymbol`].
    pub fn from_edges<S, I>(nodes: &[S], edges: I) -> Result<Self, AnalysisError>
    where
        S: AsRef<str>,
        I: IntoIterator<Item = (S, S, f64)>,
    {
        let mut sorted: Vec<String> = nodes.iter().map(|s| s.as_ref().to_string()).collect();
        sorted.sort();
        sorted.dedup();
        let position: HashMap<&str, usize> = sorted
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect();

        let mut seen = std::collections::HashSet::new();
        let mut kept = Vec::new();
        let mut min_weight = f64::INFINITY;
        for (a, b, weight) in edges {
            let i = *position
                .get(a.as_ref())
                .ok_or_else(|| AnalysisError::unknown(a.as_ref()))?;
            let j = *position
                .get(b.as_ref())
                .ok_or_else(|| AnalysisError::unknown(b.as_ref()))?;
            if i == j {
                continue;
            }
            let (source, target) = if i < j { (i, j) } else { (j, i) };
            if seen.insert((source, target)) {
                min_weight = min_weight.min(weight);
                kept.push(Edge {
                    source,
                    target,
                    weight,
                });
            }
        }

        let threshold = if kept.is_empty() { 0.0 } else { min_weight };
        Ok(Self::assemble(sorted, kept, threshold))
    }

    /// Node symbols, sorted. Node `i` is `nodes()[i]`.
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn node(&self, i: usize) -> &str {
        &self.nodes[i]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Edges sorted by `(source, target)`.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.index.contains_key(symbol)
    }

    pub fn index_of(&self, symbol: &str) -> Option<usize> {
        self.index.get(symbol).copied()
    }

    /// `(neighbor, weight)` pairs of node `i`, sorted by neighbor.
    pub fn neighbors(&self, i: usize) -> &[(usize, f64)] {
        &self.adjacency[i]
    }

    pub fn degree(&self, i: usize) -> usize {
        self.adjacency[i].len()
    }

    /// Sum of the weights of edges incident to node `i`.
    pub fn weighted_degree(&self, i: usize) -> f64 {
        self.adjacency[i].iter().map(|&(_, w)| w).sum()
    }

    /// Total edge weight, each edge counted once.
    pub fn total_weight(&self) -> f64 {
        self.edges.iter().map(|e| e.weight).sum()
    }

    /// Weight of the edge between two symbols, if there is one.
    pub fn edge_weight(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.index_of(a)?;
        let j = self.index_of(b)?;
        let list = &self.adjacency[i];
        list.binary_search_by_key(&j, |&(n, _)| n)
            .ok()
            .map(|pos| list[pos].1)
    }

    /// Nodes without any incident edge.
    pub fn isolated_nodes(&self) -> Vec<&str> {
        (0..self.node_count())
            .filter(|&i| self.adjacency[i].is_empty())
            .map(|i| self.node(i))
            .collect()
    }

    /// The threshold the graph was built with.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

/// Thresholds a [`CorrelationMatrix`] into a [`CorrelationGraph`].
#[derive(Debug, Clone, Copy)]
pub struct GraphBuilder {
    threshold: f64,
}

impl GraphBuilder {
    /// The threshold only needs to be comparable with correlation values;
    /// NaN is rejected.
    pub fn new(threshold: f64) -> Result<Self, AnalysisError> {
        if threshold.is_nan() {
            return Err(AnalysisError::InvalidThreshold { value: threshold });
        }
        Ok(Self { threshold })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Add an edge for every unordered pair with `correlation >= threshold`.
    pub fn build(&self, matrix: &CorrelationMatrix) -> CorrelationGraph {
        let n = matrix.len();
        let threshold = self.threshold;

        let edges: Vec<Edge> = (0..n)
            .into_par_iter()
            .flat_map_iter(|i| {
                ((i + 1)..n).filter_map(move |j| {
                    let weight = matrix.value(i, j);
                    (weight >= threshold).then_some(Edge {
                        source: i,
                        target: j,
                        weight,
                    })
                })
            })
            .collect();

        let graph = CorrelationGraph::assemble(matrix.symbols().to_vec(), edges, threshold);
        log::info!(
            "Built correlation graph: {} nodes, {} edges, {} isolated (threshold {threshold})",
            graph.node_count(),
            graph.edge_count(),
            graph.isolated_nodes().len()
        );
        graph
    }
}
