//! Instrument universe: sector-organised ticker lists.
//!
//! Stored as TOML (`[sectors]` table of name → tickers). The analytics core
//! only ever sees the flattened, deduplicated symbol list.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use super::provider::DataError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Universe {
    pub sectors: BTreeMap<String, Vec<String>>,
}

impl Universe {
    pub fn from_file(path: &Path) -> Result<Self, DataError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DataError::ValidationError(format!("read universe {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, DataError> {
        let universe: Self = toml::from_str(content)
            .map_err(|e| DataError::ValidationError(format!("parse universe TOML: {e}")))?;
        universe.validated()
    }

    pub fn from_sectors(sectors: BTreeMap<String, Vec<String>>) -> Result<Self, DataError> {
        Self { sectors }.validated()
    }

    /// Tickers are upper-cased and trimmed; blank tickers are rejected.
    fn validated(mut self) -> Result<Self, DataError> {
        for (sector, tickers) in &mut self.sectors {
            for ticker in tickers.iter_mut() {
                let normalized = ticker.trim().to_ascii_uppercase();
                if normalized.is_empty() {
                    return Err(DataError::ValidationError(format!(
                        "blank ticker in sector '{sector}'"
                    )));
                }
                *ticker = normalized;
            }
        }
        Ok(self)
    }

    /// Every ticker once, sorted.
    pub fn symbols(&self) -> Vec<String> {
        self.sectors
            .values()
            .flatten()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn sector_names(&self) -> Vec<&str> {
        self.sectors.keys().map(|s| s.as_str()).collect()
    }

    pub fn sector_of(&self, symbol: &str) -> Option<&str> {
        self.sectors
            .iter()
            .find(|(_, tickers)| tickers.iter().any(|t| t == symbol))
            .map(|(name, _)| name.as_str())
    }

    /// Sub-universe containing only the named sectors. Unknown names fail.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, DataError> {
        let mut sectors = BTreeMap::new();
        for name in names {
            let name = name.as_ref();
            let tickers = self.sectors.get(name).ok_or_else(|| {
                DataError::ValidationError(format!("unknown sector '{name}'"))
            })?;
            sectors.insert(name.to_string(), tickers.clone());
        }
        Ok(Self { sectors })
    }

    /// US large caps grouped by sector.
    pub fn default_us() -> Self {
        let table: [(&str, &[&str]); 10] = [
            (
                "Technology",
                &[
                    "AAPL", "ADBE", "AMD", "AVGO", "CRM", "CSCO", "IBM", "INTC", "NOW", "ORCL",
                    "QCOM", "TXN",
                ],
            ),
            (
                "Communication",
                &["CMCSA", "DIS", "GOOGL", "META", "NFLX", "T"],
            ),
            (
                "Financials",
                &["BAC", "BLK", "CB", "CME", "GS", "JPM", "MA", "SCHW", "SPGI", "WFC"],
            ),
            (
                "Healthcare",
                &[
                    "ABBV", "ABT", "AMGN", "BMY", "DHR", "GILD", "JNJ", "MRK", "PFE", "TMO",
                    "UNH",
                ],
            ),
            ("Energy", &["COP", "CVX", "KMI", "OKE", "VLO", "XOM"]),
            (
                "ConsumerStaples",
                &["CL", "COST", "KO", "MO", "PEP", "PG", "PM", "WMT"],
            ),
            (
                "ConsumerDiscretionary",
                &["AMZN", "HD", "LOW", "MCD", "NKE", "SBUX", "TGT", "TSLA"],
            ),
            (
                "Industrials",
                &["CAT", "DE", "GE", "HON", "MMM", "RTX", "UNP", "UPS"],
            ),
            ("Utilities", &["AEP", "DUK", "ED", "NEE", "SO", "SRE"]),
            ("RealEstate", &["AMT", "EQIX", "PLD", "PSA", "WELL"]),
        ];

        let sectors = table
            .iter()
            .map(|(name, tickers)| {
                (
                    name.to_string(),
                    tickers.iter().map(|t| t.to_string()).collect(),
                )
            })
            .collect();
        Self { sectors }
    }
}

impl Default for Universe {
    fn default() -> Self {
        Self::default_us()
    }
}
