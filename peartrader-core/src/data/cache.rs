//! Parquet price cache with Hive-style partitioning.
//!
//! Layout: `{cache_dir}/symbol={SYMBOL}/{year}.parquet` plus a `meta.json`
//! sidecar recording the requested window the data was fetched for.
//!
//! Writes go to a `.tmp` file and are renamed into place. A partition that
//! fails to read or validate is renamed to `.quarantined` and skipped.

use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::provider::{DataError, DataSource, RawBar};
use crate::domain::AnalysisWindow;

const COLUMNS: [&str; 4] = ["date", "close", "adj_close", "volume"];

/// Metadata sidecar for a cached symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMeta {
    pub symbol: String,
    /// The window the cached bars were fetched for. Wider than the first and
    /// last bar when the window starts or ends on a non-trading day.
    pub requested: AnalysisWindow,
    pub first_bar: NaiveDate,
    pub last_bar: NaiveDate,
    pub bar_count: usize,
    pub data_hash: String,
    pub source: DataSource,
    pub cached_at: chrono::NaiveDateTime,
}

pub struct ParquetCache {
    cache_dir: PathBuf,
}

impl ParquetCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn symbol_dir(&self, symbol: &str) -> PathBuf {
        self.cache_dir.join(format!("symbol={symbol}"))
    }

    fn year_path(&self, symbol: &str, year: i32) -> PathBuf {
        self.symbol_dir(symbol).join(format!("{year}.parquet"))
    }

    fn meta_path(&self, symbol: &str) -> PathBuf {
        self.symbol_dir(symbol).join("meta.json")
    }

    /// Replace the cached bars for `symbol`, one Parquet file per year.
    pub fn write(
        &self,
        symbol: &str,
        bars: &[RawBar],
        requested: AnalysisWindow,
        source: DataSource,
    ) -> Result<(), DataError> {
        let (Some(first), Some(last)) = (bars.first(), bars.last()) else {
            return Err(DataError::CacheError(format!("no bars to cache for {symbol}")));
        };

        let sym_dir = self.symbol_dir(symbol);
        if sym_dir.exists() {
            fs::remove_dir_all(&sym_dir)
                .map_err(|e| DataError::CacheError(format!("clear {}: {e}", sym_dir.display())))?;
        }
        fs::create_dir_all(&sym_dir)
            .map_err(|e| DataError::CacheError(format!("create {}: {e}", sym_dir.display())))?;

        let mut by_year: BTreeMap<i32, Vec<&RawBar>> = BTreeMap::new();
        for bar in bars {
            by_year.entry(bar.date.year()).or_default().push(bar);
        }

        for (year, year_bars) in &by_year {
            let mut df = bars_to_dataframe(year_bars)?;
            let path = self.year_path(symbol, *year);
            let tmp_path = path.with_extension("parquet.tmp");
            write_parquet(&mut df, &tmp_path)?;
            fs::rename(&tmp_path, &path).map_err(|e| {
                let _ = fs::remove_file(&tmp_path);
                DataError::CacheError(format!("atomic rename failed: {e}"))
            })?;
        }

        let encoded = serde_json::to_vec(bars)
            .map_err(|e| DataError::CacheError(format!("hash serialization: {e}")))?;
        let meta = CacheMeta {
            symbol: symbol.to_string(),
            requested,
            first_bar: first.date,
            last_bar: last.date,
            bar_count: bars.len(),
            data_hash: blake3::hash(&encoded).to_hex().to_string(),
            source,
            cached_at: chrono::Local::now().naive_local(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::CacheError(format!("meta serialization: {e}")))?;
        fs::write(self.meta_path(symbol), meta_json)
            .map_err(|e| DataError::CacheError(format!("meta write: {e}")))?;

        log::debug!("Cached {} bars for {symbol}", bars.len());
        Ok(())
    }

    /// All cached bars for `symbol`, sorted by date.
    pub fn load(&self, symbol: &str) -> Result<Vec<RawBar>, DataError> {
        let sym_dir = self.symbol_dir(symbol);
        if !sym_dir.exists() {
            return Err(DataError::NoCachedData {
                symbol: symbol.to_string(),
            });
        }

        let entries = fs::read_dir(&sym_dir)
            .map_err(|e| DataError::CacheError(format!("read dir: {e}")))?;
        let mut bars = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| DataError::CacheError(format!("dir entry: {e}")))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }
            match load_and_validate_parquet(&path) {
                Ok(year_bars) => bars.extend(year_bars),
                Err(e) => {
                    log::warn!("Quarantining corrupt cache file {}: {e}", path.display());
                    let _ = fs::rename(&path, path.with_extension("parquet.quarantined"));
                }
            }
        }

        if bars.is_empty() {
            return Err(DataError::NoCachedData {
                symbol: symbol.to_string(),
            });
        }
        bars.sort_by_key(|b| b.date);
        Ok(bars)
    }

    /// Cached bars inside `window`.
    pub fn load_window(
        &self,
        symbol: &str,
        window: &AnalysisWindow,
    ) -> Result<Vec<RawBar>, DataError> {
        let mut bars = self.load(symbol)?;
        bars.retain(|b| window.contains(b.date));
        Ok(bars)
    }

    pub fn get_meta(&self, symbol: &str) -> Option<CacheMeta> {
        let content = fs::read_to_string(self.meta_path(symbol)).ok()?;
        serde_json::from_str(&content).ok()
    }

    pub fn status<S: AsRef<str>>(&self, symbols: &[S]) -> Vec<CacheStatus> {
        symbols
            .iter()
            .map(|sym| {
                let symbol = sym.as_ref().to_string();
                match self.get_meta(&symbol) {
                    Some(meta) => CacheStatus {
                        symbol,
                        cached: true,
                        first_bar: Some(meta.first_bar),
                        last_bar: Some(meta.last_bar),
                        bar_count: Some(meta.bar_count),
                    },
                    None => CacheStatus {
                        symbol,
                        cached: false,
                        first_bar: None,
                        last_bar: None,
                        bar_count: None,
                    },
                }
            })
            .collect()
    }

    /// Whether the cached fetch window contains `window`.
    pub fn covers(&self, symbol: &str, window: &AnalysisWindow) -> CoverageResult {
        match self.get_meta(symbol) {
            None => CoverageResult::NotCached,
            Some(meta)
                if meta.requested.start() <= window.start()
                    && meta.requested.end() >= window.end() =>
            {
                CoverageResult::FullyCovered
            }
            Some(meta) => CoverageResult::PartiallyCovered {
                cached: meta.requested,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatus {
    pub symbol: String,
    pub cached: bool,
    pub first_bar: Option<NaiveDate>,
    pub last_bar: Option<NaiveDate>,
    pub bar_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CoverageResult {
    NotCached,
    FullyCovered,
    PartiallyCovered { cached: AnalysisWindow },
}

// ── Parquet I/O ─────────────────────────────────────────────────────

fn epoch() -> NaiveDate {
    NaiveDate::default()
}

fn bars_to_dataframe(bars: &[&RawBar]) -> Result<DataFrame, DataError> {
    let dates: Vec<i32> = bars
        .iter()
        .map(|b| (b.date - epoch()).num_days() as i32)
        .collect();
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let adj_closes: Vec<f64> = bars.iter().map(|b| b.adj_close).collect();
    let volumes: Vec<u64> = bars.iter().map(|b| b.volume).collect();

    DataFrame::new(vec![
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| DataError::ParquetError(format!("date cast: {e}")))?,
        Column::new("close".into(), closes),
        Column::new("adj_close".into(), adj_closes),
        Column::new("volume".into(), volumes),
    ])
    .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &mut DataFrame, path: &Path) -> Result<(), DataError> {
    let file =
        fs::File::create(path).map_err(|e| DataError::ParquetError(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(df)
        .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
    Ok(())
}

fn load_and_validate_parquet(path: &Path) -> Result<Vec<RawBar>, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::ParquetError(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read: {e}")))?;

    if df.height() == 0 {
        return Err(DataError::ValidationError("empty parquet file".into()));
    }
    for name in COLUMNS {
        if df.column(name).is_err() {
            return Err(DataError::ValidationError(format!("missing column '{name}'")));
        }
    }
    dataframe_to_bars(&df)
}

fn dataframe_to_bars(df: &DataFrame) -> Result<Vec<RawBar>, DataError> {
    let column = |name: &str| {
        df.column(name)
            .map_err(|e| DataError::ParquetError(format!("column {name}: {e}")))
    };
    let type_err = |name: &str, e: PolarsError| {
        DataError::ParquetError(format!("{name} column type: {e}"))
    };

    let date_col = column("date")?;
    let close_col = column("close")?;
    let adj_col = column("adj_close")?;
    let vol_col = column("volume")?;
    let dates = date_col.date().map_err(|e| type_err("date", e))?;
    let closes = close_col.f64().map_err(|e| type_err("close", e))?;
    let adj_closes = adj_col.f64().map_err(|e| type_err("adj_close", e))?;
    let volumes = vol_col.u64().map_err(|e| type_err("volume", e))?;

    (0..df.height())
        .map(|i| {
            let days = dates
                .get(i)
                .ok_or_else(|| DataError::ParquetError(format!("null date at row {i}")))?;
            Ok(RawBar {
                date: epoch() + chrono::Duration::days(i64::from(days)),
                close: closes.get(i).unwrap_or(f64::NAN),
                adj_close: adj_closes.get(i).unwrap_or(f64::NAN),
                volume: volumes.get(i).unwrap_or(0),
            })
        })
        .collect()
}
