//! Community detection by greedy modularity maximization.
//!
//! Agglomerative fast-greedy scheme (Clauset–Newman–Moore) generalised to
//! edge weights. Every node starts as its own community; the pair of
//! connected communities with the largest modularity gain is merged until no
//! merge has a positive gain.
//!
//! With `m` the total edge weight, `a_c` the share of weighted degree held by
//! community `c` (`k_c / 2m`) and `e_cd` the share of edge weight between `c`
//! and `d` (`w_cd / 2m`), merging `c` and `d` changes modularity by
//!
//! ```text
//! ΔQ = 2 (e_cd − a_c a_d)
//! ```
//!
//! so each candidate is scored from aggregates only. Candidates live in a
//! max-heap with lazy invalidation; a merge touches only the adjacency of the
//! two communities involved.
//!
//! Ties on ΔQ go to the pair whose representatives (lowest member in node
//! order) compare smallest, which makes the result reproducible.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

use super::graph::CorrelationGraph;

/// Disjoint communities covering every node of a graph.
///
/// Communities are ordered by size (largest first), then by their first
/// member; members are sorted by symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommunityPartition {
    communities: Vec<Vec<String>>,
    modularity: f64,
}

impl CommunityPartition {
    pub fn communities(&self) -> &[Vec<String>] {
        &self.communities
    }

    pub fn len(&self) -> usize {
        self.communities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.communities.is_empty()
    }

    /// Modularity of this partition on the graph it was detected on.
    pub fn modularity(&self) -> f64 {
        self.modularity
    }

    pub fn members(&self, community: usize) -> Option<&[String]> {
        self.communities.get(community).map(|c| c.as_slice())
    }

    /// Index of the community containing `symbol`.
    pub fn community_of(&self, symbol: &str) -> Option<usize> {
        self.communities
            .iter()
            .position(|c| c.binary_search_by(|m| m.as_str().cmp(symbol)).is_ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = &[String]> {
        self.communities.iter().map(|c| c.as_slice())
    }

    /// Number of single-member communities.
    pub fn singleton_count(&self) -> usize {
        self.communities.iter().filter(|c| c.len() == 1).count()
    }
}

/// One applied merge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeStep {
    /// Representative of the surviving community.
    pub left: String,
    /// Representative of the absorbed community.
    pub right: String,
    pub gain: f64,
    /// Cumulative modularity after this merge.
    pub modularity: f64,
}

/// Modularity trajectory of a detection run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionTrace {
    /// Modularity of the all-singleton partition.
    pub initial_modularity: f64,
    pub steps: Vec<MergeStep>,
}

impl DetectionTrace {
    pub fn final_modularity(&self) -> f64 {
        self.steps
            .last()
            .map_or(self.initial_modularity, |s| s.modularity)
    }

    pub fn merge_count(&self) -> usize {
        self.steps.len()
    }
}

/// Partition plus the trace that produced it.
#[derive(Debug, Clone)]
pub struct Detection {
    pub partition: CommunityPartition,
    pub trace: DetectionTrace,
}

/// Greedy modularity community detector.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommunityDetector;

impl CommunityDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect(&self, graph: &CorrelationGraph) -> CommunityPartition {
        self.detect_with_trace(graph).partition
    }

    pub fn detect_with_trace(&self, graph: &CorrelationGraph) -> Detection {
        let n = graph.node_count();
        let total = graph.total_weight();

        // No (positive) edge weight: nothing to merge.
        if !(total > 0.0) {
            let groups = (0..n).map(|i| vec![i]).collect();
            return Detection {
                partition: partition_from(graph, groups, 0.0),
                trace: DetectionTrace::default(),
            };
        }

        let mut state = MergeState::new(graph, total);
        let initial = state.modularity;
        let mut steps = Vec::new();

        while let Some(candidate) = state.heap.pop() {
            if !(candidate.gain > 0.0) {
                break;
            }
            if !state.is_current(&candidate) {
                continue;
            }

            let (left, right) = candidate.pair;
            state.merge(left, right);
            state.modularity += candidate.gain;

            log::debug!(
                "merge {} + {} (ΔQ = {:.6}, Q = {:.6})",
                graph.node(left),
                graph.node(right),
                candidate.gain,
                state.modularity
            );
            steps.push(MergeStep {
                left: graph.node(left).to_string(),
                right: graph.node(right).to_string(),
                gain: candidate.gain,
                modularity: state.modularity,
            });
        }

        let groups: Vec<Vec<usize>> = state
            .communities
            .into_iter()
            .flatten()
            .map(|c| c.members)
            .collect();

        log::info!(
            "Detected {} communities after {} merges (Q = {:.4})",
            groups.len(),
            steps.len(),
            state.modularity
        );

        Detection {
            partition: partition_from(graph, groups, state.modularity),
            trace: DetectionTrace {
                initial_modularity: initial,
                steps,
            },
        }
    }
}

/// Modularity of `partition` on `graph`, computed from scratch.
///
/// `Q = Σ_c [ L_c / m − (K_c / 2m)² ]` with `L_c` the edge weight inside
/// community `c` and `K_c` its summed weighted degree. Returns 0.0 when the
/// graph has no positive total weight. Nodes missing from the partition are
/// treated as singletons.
pub fn modularity(graph: &CorrelationGraph, partition: &CommunityPartition) -> f64 {
    let m = graph.total_weight();
    if !(m > 0.0) {
        return 0.0;
    }

    let n = graph.node_count();
    let mut label = vec![usize::MAX; n];
    for (c, members) in partition.iter().enumerate() {
        for symbol in members {
            if let Some(i) = graph.index_of(symbol) {
                label[i] = c;
            }
        }
    }
    let mut next = partition.len();
    for l in label.iter_mut().filter(|l| **l == usize::MAX) {
        *l = next;
        next += 1;
    }

    let mut internal = vec![0.0; next];
    let mut degree = vec![0.0; next];
    for e in graph.edges() {
        if label[e.source] == label[e.target] {
            internal[label[e.source]] += e.weight;
        }
    }
    for (i, &l) in label.iter().enumerate() {
        degree[l] += graph.weighted_degree(i);
    }

    internal
        .iter()
        .zip(&degree)
        .map(|(l, k)| l / m - (k / (2.0 * m)).powi(2))
        .sum()
}

// ── Merge state ──────────────────────────────────────────────────────

/// A live community, identified by its representative node index.
#[derive(Debug)]
struct Community {
    /// Member node indices (unsorted while merging).
    members: Vec<usize>,
    /// `a_c`: share of total weighted degree.
    degree_share: f64,
    /// `e_cd` to every adjacent community `d`.
    links: BTreeMap<usize, f64>,
}

/// Candidate merge of communities `pair.0 < pair.1`.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    gain: f64,
    pair: (usize, usize),
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl Ord for Candidate {
    /// Larger gain first; on equal gain the smaller representative pair wins.
    fn cmp(&self, other: &Self) -> Ordering {
        self.gain
            .total_cmp(&other.gain)
            .then_with(|| other.pair.cmp(&self.pair))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn merge_gain(e: f64, a_left: f64, a_right: f64) -> f64 {
    2.0 * (e - a_left * a_right)
}

struct MergeState {
    /// Indexed by representative; `None` once absorbed.
    communities: Vec<Option<Community>>,
    heap: BinaryHeap<Candidate>,
    modularity: f64,
}

impl MergeState {
    fn new(graph: &CorrelationGraph, total: f64) -> Self {
        let two_m = 2.0 * total;
        let communities: Vec<Option<Community>> = (0..graph.node_count())
            .map(|i| {
                Some(Community {
                    members: vec![i],
                    degree_share: graph.weighted_degree(i) / two_m,
                    links: graph
                        .neighbors(i)
                        .iter()
                        .map(|&(j, w)| (j, w / two_m))
                        .collect(),
                })
            })
            .collect();

        let modularity = -communities
            .iter()
            .flatten()
            .map(|c| c.degree_share * c.degree_share)
            .sum::<f64>();

        let mut state = Self {
            communities,
            heap: BinaryHeap::new(),
            modularity,
        };
        for e in graph.edges() {
            state.push_candidate(e.source, e.target);
        }
        state
    }

    fn community(&self, id: usize) -> Option<&Community> {
        self.communities[id].as_ref()
    }

    /// Current gain of merging `x` and `y`, if both are live and adjacent.
    fn gain(&self, x: usize, y: usize) -> Option<f64> {
        let cx = self.community(x)?;
        let cy = self.community(y)?;
        let e = *cx.links.get(&y)?;
        Some(merge_gain(e, cx.degree_share, cy.degree_share))
    }

    fn push_candidate(&mut self, x: usize, y: usize) {
        let pair = if x < y { (x, y) } else { (y, x) };
        if let Some(gain) = self.gain(pair.0, pair.1) {
            self.heap.push(Candidate { gain, pair });
        }
    }

    /// A popped candidate is stale when either side was absorbed or the
    /// gain changed since it was pushed.
    fn is_current(&self, candidate: &Candidate) -> bool {
        let (x, y) = candidate.pair;
        self.gain(x, y)
            .is_some_and(|g| g.to_bits() == candidate.gain.to_bits())
    }

    /// Absorb community `right` into `left` (`left < right`, so the survivor
    /// keeps the smaller representative).
    fn merge(&mut self, left: usize, right: usize) {
        let Some(absorbed) = self.communities[right].take() else {
            return;
        };

        // Re-point every neighbor of `right` at `left`.
        for (&k, &e) in &absorbed.links {
            if k == left {
                continue;
            }
            if let Some(neighbor) = self.communities[k].as_mut() {
                neighbor.links.remove(&right);
                *neighbor.links.entry(left).or_insert(0.0) += e;
            }
        }

        let Some(survivor) = self.communities[left].as_mut() else {
            return;
        };
        survivor.links.remove(&right);
        for (&k, &e) in &absorbed.links {
            if k != left {
                *survivor.links.entry(k).or_insert(0.0) += e;
            }
        }
        survivor.degree_share += absorbed.degree_share;
        survivor.members.extend(absorbed.members);

        let neighbors: Vec<usize> = survivor.links.keys().copied().collect();
        for k in neighbors {
            self.push_candidate(left, k);
        }
    }
}

fn partition_from(
    graph: &CorrelationGraph,
    mut groups: Vec<Vec<usize>>,
    modularity: f64,
) -> CommunityPartition {
    for g in &mut groups {
        g.sort_unstable();
    }
    groups.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a[0].cmp(&b[0])));

    CommunityPartition {
        communities: groups
            .into_iter()
            .map(|g| g.into_iter().map(|i| graph.node(i).to_string()).collect())
            .collect(),
        modularity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(nodes: &[&str], edges: &[(&str, &str, f64)]) -> CorrelationGraph {
        CorrelationGraph::from_edges(nodes, edges.iter().copied()).unwrap()
    }

    fn names(partition: &CommunityPartition) -> Vec<Vec<&str>> {
        partition
            .iter()
            .map(|c| c.iter().map(|s| s.as_str()).collect())
            .collect()
    }

    /// Two triangles joined by one weak bridge.
    fn barbell() -> CorrelationGraph {
        graph(
            &["A", "B", "C", "D", "E", "F"],
            &[
                ("A", "B", 0.9),
                ("A", "C", 0.9),
                ("B", "C", 0.9),
                ("D", "E", 0.9),
                ("D", "F", 0.9),
                ("E", "F", 0.9),
                ("C", "D", 0.6),
            ],
        )
    }

    #[test]
    fn single_edge_forms_pair_and_singleton() {
        let g = graph(&["A", "B", "C"], &[("A", "B", 0.95)]);
        let p = CommunityDetector::new().detect(&g);

        assert_eq!(names(&p), vec![vec!["A", "B"], vec!["C"]]);
    }

    #[test]
    fn no_edges_yields_singletons() {
        let g = graph(&["C", "A", "B"], &[]);
        let detection = CommunityDetector::new().detect_with_trace(&g);

        assert_eq!(names(&detection.partition), vec![vec!["A"], vec!["B"], vec!["C"]]);
        assert_eq!(detection.partition.singleton_count(), 3);
        assert_eq!(detection.trace.merge_count(), 0);
        assert_eq!(detection.partition.modularity(), 0.0);
    }

    #[test]
    fn barbell_splits_at_the_bridge() {
        let p = CommunityDetector::new().detect(&barbell());
        assert_eq!(names(&p), vec![vec!["A", "B", "C"], vec!["D", "E", "F"]]);
        assert!(p.modularity() > 0.3);
    }

    #[test]
    fn incremental_modularity_matches_reference() {
        let g = barbell();
        let detection = CommunityDetector::new().detect_with_trace(&g);

        let reference = modularity(&g, &detection.partition);
        assert!(
            (reference - detection.partition.modularity()).abs() < 1e-12,
            "incremental {} vs reference {reference}",
            detection.partition.modularity()
        );
        assert!(
            (detection.trace.final_modularity() - reference).abs() < 1e-12
        );
    }

    #[test]
    fn modularity_never_decreases_along_trace() {
        let detection = CommunityDetector::new().detect_with_trace(&barbell());
        let trace = &detection.trace;

        assert!(trace.initial_modularity <= 0.0);
        let mut previous = trace.initial_modularity;
        for step in &trace.steps {
            assert!(step.gain > 0.0);
            assert!(step.modularity >= previous);
            previous = step.modularity;
        }
        assert!(trace.final_modularity() >= trace.initial_modularity);
    }

    #[test]
    fn ties_merge_smallest_representatives_first() {
        // Two disjoint, identical edges: both merges have the same gain.
        let g = graph(&["A", "B", "C", "D"], &[("C", "D", 0.8), ("A", "B", 0.8)]);
        let detection = CommunityDetector::new().detect_with_trace(&g);

        assert_eq!(detection.trace.steps[0].left, "A");
        assert_eq!(detection.trace.steps[0].right, "B");
        assert_eq!(detection.trace.steps[1].left, "C");
        assert_eq!(names(&detection.partition), vec![vec!["A", "B"], vec!["C", "D"]]);
    }

    #[test]
    fn detection_is_deterministic() {
        let g = barbell();
        let first = CommunityDetector::new().detect_with_trace(&g);
        let second = CommunityDetector::new().detect_with_trace(&g);
        assert_eq!(first.partition, second.partition);
        assert_eq!(first.trace, second.trace);
    }

    #[test]
    fn community_lookup() {
        let p = CommunityDetector::new().detect(&barbell());
        assert_eq!(p.community_of("E"), Some(1));
        assert_eq!(p.community_of("A"), Some(0));
        assert_eq!(p.community_of("Z"), None);
        assert_eq!(p.members(1).unwrap(), &["D", "E", "F"]);
    }

    #[test]
    fn reference_modularity_of_singletons_is_non_positive() {
        let g = barbell();
        let singletons = CommunityPartition {
            communities: g.nodes().iter().map(|s| vec![s.clone()]).collect(),
            modularity: 0.0,
        };
        assert!(modularity(&g, &singletons) < 0.0);
    }
}
