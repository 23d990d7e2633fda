//! CSV import of daily closes.
//!
//! Expected header: `date,close` with an optional `adj_close` and `volume`.
//! Dates use `YYYY-MM-DD`. Empty price cells are kept as gaps.

use chrono::NaiveDate;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;

use super::provider::{normalize_bars, DataError, RawBar};
use crate::domain::DATE_FORMAT;

#[derive(Debug, Deserialize)]
struct CloseRecord {
    date: String,
    close: Option<f64>,
    #[serde(default)]
    adj_close: Option<f64>,
    #[serde(default)]
    volume: Option<u64>,
}

/// Read bars from a CSV file.
pub fn read_bars(path: &Path) -> Result<Vec<RawBar>, DataError> {
    let file = std::fs::File::open(path).map_err(|e| DataError::Csv {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    read_bars_from(file, &path.display().to_string())
}

/// Read bars from any reader; `origin` names the input in errors.
pub fn read_bars_from<R: Read>(input: R, origin: &str) -> Result<Vec<RawBar>, DataError> {
    let csv_err = |message: String| DataError::Csv {
        path: origin.to_string(),
        message,
    };

    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(input);
    let mut bars = Vec::new();
    for (row, record) in reader.deserialize::<CloseRecord>().enumerate() {
        let record = record.map_err(|e| csv_err(e.to_string()))?;
        let date = NaiveDate::parse_from_str(&record.date, DATE_FORMAT)
            .map_err(|_| csv_err(format!("row {}: invalid date '{}'", row + 1, record.date)))?;
        let close = record.close.unwrap_or(f64::NAN);
        bars.push(RawBar {
            date,
            close,
            adj_close: record.adj_close.unwrap_or(close),
            volume: record.volume.unwrap_or(0),
        });
    }

    if bars.is_empty() {
        return Err(csv_err("no rows".into()));
    }
    Ok(normalize_bars(bars))
}

/// Symbol implied by a file name: `aapl.csv` → `AAPL`.
pub fn symbol_from_path(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_ascii_uppercase())
}
