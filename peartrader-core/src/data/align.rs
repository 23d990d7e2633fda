//! Multi-symbol time alignment.
//!
//! Given price series for multiple symbols, align them to a common timeline
//! inside an analysis window. Missing closes become strict NaN (no
//! forward-fill), so a gap stays visible to the cleaning step.

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::domain::{AnalysisWindow, PriceTable};

/// Closing prices for multiple symbols on a common timeline.
#[derive(Debug, Clone, Default)]
pub struct AlignedPrices {
    /// The common date axis (sorted ascending).
    pub dates: Vec<NaiveDate>,
    /// Closes per symbol, aligned to `dates`. Each inner Vec has the same
    /// length as `dates`; NaN marks a missing observation.
    pub closes: BTreeMap<String, Vec<f64>>,
    /// Symbols with no usable close inside the window. They take no part in
    /// building the timeline.
    pub empty: Vec<String>,
}

/// Align every symbol in `series` to the union of in-window dates.
///
/// Only symbols with at least one usable close in the window contribute
/// dates; every other symbol is reported in [`AlignedPrices::empty`].
pub fn align_series(series: &PriceTable, window: &AnalysisWindow) -> AlignedPrices {
    let mut empty = Vec::new();
    let mut all_dates = BTreeSet::new();
    let mut contributing = Vec::new();

    for (symbol, prices) in series {
        if prices.within(window).any(|p| p.is_present()) {
            all_dates.extend(prices.within(window).map(|p| p.date));
            contributing.push(symbol);
        } else {
            empty.push(symbol.clone());
        }
    }

    let dates: Vec<NaiveDate> = all_dates.into_iter().collect();
    let mut closes = BTreeMap::new();

    for symbol in contributing {
        let by_date: HashMap<NaiveDate, Option<f64>> = series[symbol]
            .within(window)
            .map(|p| (p.date, p.close))
            .collect();

        let aligned: Vec<f64> = dates
            .iter()
            .map(|date| by_date.get(date).copied().flatten().unwrap_or(f64::NAN))
            .collect();

        closes.insert(symbol.clone(), aligned);
    }

    AlignedPrices {
        dates,
        closes,
        empty,
    }
}
