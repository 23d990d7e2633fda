//! Analysis window: the `[start, end)` date range an analysis covers.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::analytics::AnalysisError;

/// Accepted date format for all caller-supplied dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse an ISO calendar date (`YYYY-MM-DD`).
pub fn parse_date(input: &str) -> Result<NaiveDate, AnalysisError> {
    NaiveDate::parse_from_str(input.trim(), DATE_FORMAT).map_err(|_| {
        AnalysisError::InvalidDateFormat {
            input: input.to_string(),
            expected: "YYYY-MM-DD",
        }
    })
}

/// Half-open date range `[start, end)`. Always `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawWindow")]
pub struct AnalysisWindow {
    start: NaiveDate,
    end: NaiveDate,
}

#[derive(Deserialize)]
struct RawWindow {
    start: NaiveDate,
    end: NaiveDate,
}

impl TryFrom<RawWindow> for AnalysisWindow {
    type Error = AnalysisError;

    fn try_from(raw: RawWindow) -> Result<Self, Self::Error> {
        Self::new(raw.start, raw.end)
    }
}

impl AnalysisWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, AnalysisError> {
        if start >= end {
            return Err(AnalysisError::InvalidDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Parse and validate a window from two date strings.
    pub fn parse(start: &str, end: &str) -> Result<Self, AnalysisError> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }
}

impl fmt::Display for AnalysisWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_window() {
        let w = AnalysisWindow::parse("2024-01-01", "2024-06-30").unwrap();
        assert_eq!(w.start(), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(w.to_string(), "2024-01-01 to 2024-06-30");
    }

    #[test]
    fn rejects_malformed_date() {
        let err = AnalysisWindow::parse("01/02/2024", "2024-06-30").unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::InvalidDateFormat { ref input, .. } if input == "01/02/2024"
        ));
    }

    #[test]
    fn rejects_impossible_calendar_date() {
        assert!(parse_date("2023-02-30").is_err());
    }

    #[test]
    fn rejects_non_chronological_range() {
        let err = AnalysisWindow::parse("2024-06-30", "2024-01-01").unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidDateRange { .. }));

        let same = AnalysisWindow::parse("2024-01-01", "2024-01-01").unwrap_err();
        assert!(matches!(same, AnalysisError::InvalidDateRange { .. }));
    }

    #[test]
    fn end_is_exclusive() {
        let w = AnalysisWindow::parse("2024-01-01", "2024-01-05").unwrap();
        assert!(w.contains(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()));
        assert!(!w.contains(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()));
    }

    #[test]
    fn deserialization_enforces_ordering() {
        let ok: AnalysisWindow =
            serde_json::from_str(r#"{"start":"2024-01-01","end":"2024-02-01"}"#).unwrap();
        assert_eq!(ok.end(), NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());

        let inverted =
            serde_json::from_str::<AnalysisWindow>(r#"{"start":"2024-02-01","end":"2024-01-01"}"#);
        assert!(inverted.is_err());
    }
}
