//! Artifact export: CSV, JSON, and Markdown.
//!
//! A run directory holds:
//! - `manifest.json`: provenance and headline numbers, schema-versioned
//! - `matrix.csv`: the correlation matrix with a symbol header row
//! - `graph.json`: nodes with their community index, thresholded edges
//! - `communities.json`: the partition and its merge trace
//! - `report.md`: human-readable summary
//!
//! Artifacts are write-only; no later run reads them back.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use peartrader_core::analytics::{AnalysisSession, CorrelationMatrix, MergeStep};

use crate::runner::{AnalysisRun, SCHEMA_VERSION};

// ─── CSV export ─────────────────────────────────────────────────────

/// Correlation matrix as CSV: a `symbol` column, then one column per symbol.
pub fn export_matrix_csv(matrix: &CorrelationMatrix) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);

    let mut header = vec!["symbol".to_string()];
    header.extend(matrix.symbols().iter().cloned());
    wtr.write_record(&header)?;

    for (i, symbol) in matrix.symbols().iter().enumerate() {
        let mut record = vec![symbol.clone()];
        record.extend(matrix.row(i).iter().map(|v| format!("{v:.6}")));
        wtr.write_record(&record)?;
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── JSON export ────────────────────────────────────────────────────

#[derive(Serialize)]
struct GraphNode<'a> {
    symbol: &'a str,
    community: Option<usize>,
}

#[derive(Serialize)]
struct GraphEdge<'a> {
    source: &'a str,
    target: &'a str,
    weight: f64,
}

#[derive(Serialize)]
struct GraphDocument<'a> {
    schema_version: u32,
    threshold: f64,
    nodes: Vec<GraphNode<'a>>,
    edges: Vec<GraphEdge<'a>>,
}

/// Thresholded graph with edges named by symbol. Each node carries the index
/// of its community in the partition.
pub fn export_graph_json(session: &AnalysisSession) -> Result<String> {
    let graph = session.graph();
    let doc = GraphDocument {
        schema_version: SCHEMA_VERSION,
        threshold: graph.threshold(),
        nodes: graph
            .nodes()
            .iter()
            .map(|symbol| GraphNode {
                symbol,
                community: session.partition().community_of(symbol),
            })
            .collect(),
        edges: graph
            .edges()
            .iter()
            .map(|e| GraphEdge {
                source: graph.node(e.source),
                target: graph.node(e.target),
                weight: e.weight,
            })
            .collect(),
    };
    serde_json::to_string_pretty(&doc).context("failed to serialize graph to JSON")
}

#[derive(Serialize)]
struct CommunitiesDocument<'a> {
    schema_version: u32,
    modularity: f64,
    initial_modularity: f64,
    communities: &'a [Vec<String>],
    merges: &'a [MergeStep],
}

pub fn export_communities_json(session: &AnalysisSession) -> Result<String> {
    let doc = CommunitiesDocument {
        schema_version: SCHEMA_VERSION,
        modularity: session.partition().modularity(),
        initial_modularity: session.trace().initial_modularity,
        communities: session.partition().communities(),
        merges: &session.trace().steps,
    };
    serde_json::to_string_pretty(&doc).context("failed to serialize communities to JSON")
}

pub fn export_manifest_json(run: &AnalysisRun) -> Result<String> {
    serde_json::to_string_pretty(&run.manifest()).context("failed to serialize run manifest")
}

// ─── Artifact directory ─────────────────────────────────────────────

/// Write every artifact for `run` into a fresh `{run_id}_{timestamp}`
/// directory under `output_dir`. Returns the directory path.
pub fn save_artifacts(run: &AnalysisRun, output_dir: &Path) -> Result<PathBuf> {
    let dirname = format!(
        "{}_{}",
        run.run_id(),
        run.created_at.format("%Y%m%d_%H%M%S")
    );
    let run_dir = output_dir.join(dirname);
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    let session = &run.session;
    let files = [
        ("manifest.json", export_manifest_json(run)?),
        ("matrix.csv", export_matrix_csv(session.matrix())?),
        ("graph.json", export_graph_json(session)?),
        ("communities.json", export_communities_json(session)?),
        ("report.md", generate_report(run)),
    ];
    for (name, content) in files {
        let path = run_dir.join(name);
        std::fs::write(&path, content)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    log::info!("Artifacts written to {}", run_dir.display());
    Ok(run_dir)
}

// ─── Markdown reports ───────────────────────────────────────────────

/// Markdown summary of a run: metadata, communities, exclusions.
pub fn generate_report(run: &AnalysisRun) -> String {
    let session = &run.session;
    let summary = session.summary();
    let mut md = String::with_capacity(2048);

    md.push_str("# Co-movement Report\n\n");

    md.push_str("## Metadata\n\n");
    md.push_str("| Field | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Run | {} |\n", run.run_id()));
    md.push_str(&format!("| Window | {} |\n", summary.window));
    md.push_str(&format!("| Observations | {} |\n", summary.observations));
    md.push_str(&format!("| Threshold | {} |\n", summary.threshold));
    md.push_str(&format!("| Symbols | {} |\n", summary.symbols));
    md.push_str(&format!("| Edges | {} |\n", summary.edges));
    md.push_str(&format!("| Modularity | {:.4} |\n", summary.modularity));
    md.push_str(&format!("| Dataset | {} |\n", &run.dataset_hash));
    if run.has_synthetic {
        md.push_str("| Data | **synthetic** |\n");
    }
    if let Some(notice) = &run.threshold.notice {
        md.push_str(&format!("| Note | {notice} |\n"));
    }
    md.push('\n');

    md.push_str(&format!("## Communities ({})\n\n", summary.communities));
    let singletons = session.partition().singleton_count();
    for (i, members) in session
        .partition()
        .iter()
        .filter(|c| c.len() > 1)
        .enumerate()
    {
        md.push_str(&format!(
            "{}. ({}) {}\n",
            i + 1,
            members.len(),
            members.join(", ")
        ));
    }
    if singletons > 0 {
        md.push_str(&format!("\n{singletons} symbol(s) form no community.\n"));
    }

    if !session.excluded().is_empty() {
        md.push_str("\n## Excluded\n\n");
        md.push_str("| Symbol | Reason |\n");
        md.push_str("| --- | --- |\n");
        for (symbol, reason) in session.excluded() {
            md.push_str(&format!("| {symbol} | {reason} |\n"));
        }
    }

    md
}
