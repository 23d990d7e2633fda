//! PearTrader CLI: download, analyze, and cache management commands.
//!
//! Commands:
//! - `download`: fetch prices from Yahoo Finance and cache as Parquet
//! - `analyze`: correlation matrix, threshold graph, and communities for a
//!   universe, with optional community and pair queries
//! - `cache status`: report cached symbols, date ranges, and sizes

use anyhow::{bail, Context, Result};
use chrono::{Duration, Local};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use peartrader_core::data::{
    bars_to_series, csv_import, download_symbols, CircuitBreaker, DataProvider, DownloadSummary,
    ParquetCache, StaticPrices, Universe, YahooProvider,
};
use peartrader_core::domain::{AnalysisWindow, PriceTable};
use peartrader_runner::{
    generate_report, run_analysis, save_artifacts, AnalysisConfig, AnalysisRun, LoadOptions,
    PriceLoader,
};

#[derive(Parser)]
#[command(
    name = "peartrader",
    about = "PearTrader CLI: correlation communities for equity universes"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download prices from Yahoo Finance and cache as Parquet.
    Download {
        /// Symbols to download. Defaults to the configured universe.
        symbols: Vec<String>,

        /// TOML config supplying the universe and cache directory.
        #[arg(long)]
        config: Option<PathBuf>,

        /// TOML universe file (`[sectors]` table). Overrides the config file.
        #[arg(long)]
        universe: Option<PathBuf>,

        /// Restrict the universe to these sectors.
        #[arg(long = "sector")]
        sectors: Vec<String>,

        /// Start date (YYYY-MM-DD). Defaults to one year before the end.
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD), exclusive. Defaults to today.
        #[arg(long)]
        end: Option<String>,

        /// Force re-download even if cached.
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Cache directory. Overrides the config file.
        #[arg(long)]
        cache_dir: Option<PathBuf>,
    },
    /// Analyze co-movement over a window and report communities.
    Analyze {
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Start date (YYYY-MM-DD). Required without --config.
        #[arg(long)]
        start: Option<String>,

        /// End date (YYYY-MM-DD), exclusive. Required without --config.
        #[arg(long)]
        end: Option<String>,

        /// Graph threshold. Invalid or too-low values fall back to the default.
        #[arg(long)]
        threshold: Option<String>,

        /// TOML universe file (`[sectors]` table). Overrides the config file.
        #[arg(long)]
        universe: Option<PathBuf>,

        /// Restrict the universe to these sectors.
        #[arg(long = "sector")]
        sectors: Vec<String>,

        /// Read `<SYMBOL>.csv` files from this directory instead of the cache.
        #[arg(long)]
        csv_dir: Option<PathBuf>,

        /// Offline mode: no network access.
        #[arg(long, default_value_t = false)]
        offline: bool,

        /// Use synthetic prices as fallback.
        #[arg(long, default_value_t = false)]
        synthetic: bool,

        /// Refetch even when the cache covers the window.
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Cache directory. Overrides the config file.
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Write artifacts (matrix, graph, communities, manifest) here.
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Show community peers of this symbol. Repeatable.
        #[arg(long = "community")]
        communities: Vec<String>,

        /// Show the correlation of a pair, as `A,B`. Repeatable.
        #[arg(long = "pair")]
        pairs: Vec<String>,

        /// Minimum correlation for community peers. Defaults to the graph threshold.
        #[arg(long)]
        query_threshold: Option<f64>,
    },
    /// Cache management commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report cached symbols, date ranges, and sizes.
    Status {
        /// Cache directory. Defaults to ./data/cache.
        #[arg(long, default_value = "data/cache")]
        cache_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Download {
            symbols,
            config,
            universe,
            sectors,
            start,
            end,
            force,
            cache_dir,
        } => run_download(symbols, config, universe, sectors, start, end, force, cache_dir),
        Commands::Analyze {
            config,
            start,
            end,
            threshold,
            universe,
            sectors,
            csv_dir,
            offline,
            synthetic,
            force,
            cache_dir,
            output_dir,
            communities,
            pairs,
            query_threshold,
        } => run_analyze_cmd(
            config,
            start,
            end,
            threshold,
            universe,
            sectors,
            csv_dir,
            offline,
            synthetic,
            force,
            cache_dir,
            output_dir,
            communities,
            pairs,
            query_threshold,
        ),
        Commands::Cache { action } => match action {
            CacheAction::Status { cache_dir } => run_cache_status(&cache_dir),
        },
    }
}

#[allow(clippy::too_many_arguments)]
fn run_analyze_cmd(
    config_path: Option<PathBuf>,
    start: Option<String>,
    end: Option<String>,
    threshold: Option<String>,
    universe_path: Option<PathBuf>,
    sectors: Vec<String>,
    csv_dir: Option<PathBuf>,
    offline: bool,
    synthetic: bool,
    force: bool,
    cache_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    communities: Vec<String>,
    pairs: Vec<String>,
    query_threshold: Option<f64>,
) -> Result<()> {
    let mut config = load_config(config_path.as_deref(), start, end)?;
    if let Some(input) = threshold {
        let resolved = config.threshold.resolve_input(&input);
        if let Some(notice) = &resolved.notice {
            println!("NOTE: {notice}");
        }
        config.analysis.threshold = Some(resolved.value);
    }
    if let Some(path) = universe_path {
        config.universe = Universe::from_file(&path)?;
    }
    if !sectors.is_empty() {
        config.universe = config.universe.select(&sectors)?;
    }
    config.data.offline |= offline;
    config.data.synthetic |= synthetic;
    config.data.force |= force;
    if let Some(dir) = cache_dir {
        config.data.cache_dir = dir;
    }

    let run = if let Some(dir) = csv_dir {
        let prices = read_csv_dir(&dir, &config)?;
        if config.universe == Universe::default() {
            config.universe = Universe::from_sectors(BTreeMap::from([(
                "Imported".to_string(),
                prices.keys().cloned().collect(),
            )]))?;
        }
        config.validate()?;
        run_analysis(&config, &StaticPrices::new(prices))?
    } else {
        config.validate()?;
        analyze_with_loader(&config)?
    };

    print_summary(&run);
    let query_threshold = query_threshold.unwrap_or(run.session.threshold());
    for symbol in &communities {
        print_community(&run, symbol, query_threshold);
    }
    for pair in &pairs {
        print_pair(&run, pair)?;
    }

    if let Some(dir) = output_dir {
        let run_dir = save_artifacts(&run, &dir)?;
        println!("Artifacts saved to: {}", run_dir.display());
    }
    Ok(())
}

/// Config from a file, or the built-in universe over `--start`/`--end`.
/// Dates given on the command line override the file.
fn load_config(
    path: Option<&Path>,
    start: Option<String>,
    end: Option<String>,
) -> Result<AnalysisConfig> {
    let mut config = match path {
        Some(path) => AnalysisConfig::from_file(path)?,
        None => {
            let (Some(start), Some(end)) = (start.as_deref(), end.as_deref()) else {
                bail!("--start and --end are required without --config");
            };
            AnalysisConfig::for_window(start, end)
        }
    };
    if let Some(start) = start {
        config.analysis.start_date = start;
    }
    if let Some(end) = end {
        config.analysis.end_date = end;
    }
    Ok(config)
}

fn make_provider() -> Result<YahooProvider> {
    let circuit_breaker = Arc::new(CircuitBreaker::default_provider());
    Ok(YahooProvider::new(circuit_breaker)?)
}

fn analyze_with_loader(config: &AnalysisConfig) -> Result<AnalysisRun> {
    let cache = ParquetCache::new(&config.data.cache_dir);
    let opts = LoadOptions {
        offline: config.data.offline,
        synthetic: config.data.synthetic,
        force: config.data.force,
        price_field: config.analysis.price_field,
    };

    let provider = if config.data.offline {
        None
    } else {
        Some(make_provider()?)
    };
    let mut loader = PriceLoader::new(&cache, opts).with_universe(&config.universe);
    if let Some(provider) = &provider {
        loader = loader.with_provider(provider as &dyn DataProvider);
    }
    Ok(run_analysis(config, &loader)?)
}

fn read_csv_dir(dir: &Path, config: &AnalysisConfig) -> Result<PriceTable> {
    let mut prices = PriceTable::new();
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("csv") {
            continue;
        }
        let Some(symbol) = csv_import::symbol_from_path(&path) else {
            continue;
        };
        let bars = csv_import::read_bars(&path)?;
        prices.insert(symbol, bars_to_series(&bars, config.analysis.price_field));
    }
    if prices.is_empty() {
        bail!("no CSV files found in {}", dir.display());
    }
    Ok(prices)
}

#[allow(clippy::too_many_arguments)]
fn run_download(
    symbols: Vec<String>,
    config_path: Option<PathBuf>,
    universe_path: Option<PathBuf>,
    sectors: Vec<String>,
    start: Option<String>,
    end: Option<String>,
    force: bool,
    cache_dir: Option<PathBuf>,
) -> Result<()> {
    let config = config_path
        .as_deref()
        .map(AnalysisConfig::from_file)
        .transpose()?;

    let end_date = match end {
        Some(s) => peartrader_core::domain::parse_date(&s)?,
        None => Local::now().date_naive(),
    };
    let start_date = match start {
        Some(s) => peartrader_core::domain::parse_date(&s)?,
        None => end_date - Duration::days(365),
    };
    let window = AnalysisWindow::new(start_date, end_date)?;

    let symbols = if symbols.is_empty() {
        let universe = match (&universe_path, &config) {
            (Some(path), _) => Universe::from_file(path)?,
            (None, Some(config)) => config.universe.clone(),
            (None, None) => Universe::default(),
        };
        if sectors.is_empty() {
            universe.symbols()
        } else {
            universe.select(&sectors)?.symbols()
        }
    } else {
        symbols.iter().map(|s| s.trim().to_ascii_uppercase()).collect()
    };

    let cache_dir = cache_dir
        .or_else(|| config.map(|c| c.data.cache_dir))
        .unwrap_or_else(|| PathBuf::from("data/cache"));
    let cache = ParquetCache::new(cache_dir);
    let provider = make_provider()?;

    let summary = download_symbols(&provider, &cache, &symbols, &window, force);

    if !report_download(&summary) {
        std::process::exit(1);
    }

    Ok(())
}

/// Log the outcome of a batch download. Returns false if any symbol failed.
fn report_download(summary: &DownloadSummary) -> bool {
    log::info!(
        "Downloaded {}, cached {}, failed {} of {} symbol(s)",
        summary.downloaded.len(),
        summary.cached.len(),
        summary.failed.len(),
        summary.total
    );
    for (sym, err) in &summary.failed {
        log::error!("Download failed for {sym}: {err}");
    }
    summary.all_succeeded()
}

fn run_cache_status(cache_dir: &Path) -> Result<()> {
    if !cache_dir.exists() {
        println!("Cache directory does not exist: {}", cache_dir.display());
        return Ok(());
    }

    let mut symbols = Vec::new();
    let mut sizes = BTreeMap::new();
    for entry in std::fs::read_dir(cache_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(symbol) = name.strip_prefix("symbol=") else {
            continue;
        };
        sizes.insert(symbol.to_string(), dir_size(&entry.path()));
        symbols.push(symbol.to_string());
    }

    if symbols.is_empty() {
        println!("Cache is empty: {}", cache_dir.display());
        return Ok(());
    }
    symbols.sort();

    let cache = ParquetCache::new(cache_dir);
    let total_size: u64 = sizes.values().sum();

    println!("Cache: {}", cache_dir.display());
    println!("Symbols: {}", symbols.len());
    println!("Total size: {}", format_size(total_size));
    println!();
    println!("{:<8} {:<25} {:<12} {:>10}", "Symbol", "Date Range", "Bars", "Size");
    println!("{}", "-".repeat(58));
    for status in cache.status(&symbols) {
        let range = match (status.first_bar, status.last_bar) {
            (Some(first), Some(last)) => format!("{first} to {last}"),
            _ => "(no meta)".into(),
        };
        let bars = status
            .bar_count
            .map_or_else(|| "-".to_string(), |n| format!("{n} bars"));
        let size = sizes.get(&status.symbol).copied().unwrap_or(0);
        println!(
            "{:<8} {:<25} {:<12} {:>10}",
            status.symbol,
            range,
            bars,
            format_size(size)
        );
    }

    Ok(())
}

fn dir_size(path: &Path) -> u64 {
    let mut size = 0u64;
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            if let Ok(meta) = entry.metadata() {
                size += meta.len();
            }
        }
    }
    size
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

fn print_summary(run: &AnalysisRun) {
    println!();
    print!("{}", generate_report(run));
    if run.has_synthetic {
        println!();
        println!("WARNING: Results based on SYNTHETIC data");
    }
    println!();
}

fn print_community(run: &AnalysisRun, symbol: &str, threshold: f64) {
    let symbol = symbol.trim().to_ascii_uppercase();
    match run.queries().community_peers(&symbol, threshold) {
        Ok(peers) if peers.is_empty() => {
            println!("{symbol}: no community peers at or above {threshold}");
        }
        Ok(peers) => {
            println!("{symbol}: {} peer(s) at or above {threshold}", peers.len());
            for peer in peers {
                println!("  {:<8} {:>7.4}", peer.symbol, peer.correlation);
            }
        }
        Err(e) => eprintln!("{symbol}: {e}"),
    }
}

fn print_pair(run: &AnalysisRun, pair: &str) -> Result<()> {
    let Some((a, b)) = pair.split_once(',') else {
        bail!("--pair expects A,B (got '{pair}')");
    };
    let (a, b) = (a.trim().to_ascii_uppercase(), b.trim().to_ascii_uppercase());
    match run.queries().correlation_between(&a, &b) {
        Ok(corr) => println!("corr({a}, {b}) = {corr:.4}"),
        Err(e) => eprintln!("{a},{b}: {e}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use peartrader_core::data::DataError;

    #[test]
    fn download_report_fails_when_any_symbol_failed() {
        let mut summary = DownloadSummary {
            total: 2,
            downloaded: vec!["SPY".into()],
            ..Default::default()
        };
        assert!(report_download(&summary));

        summary.failed.push((
            "ZZZZ".into(),
            DataError::SymbolNotFound {
                symbol: "ZZZZ".into(),
            },
        ));
        assert!(!report_download(&summary));
    }

    #[test]
    fn size_formatting_picks_unit() {
        assert_eq!(format_size(512), "512 B");
        assert!(format_size(2048).ends_with("KB"));
    }
}
