//! Per-symbol closing-price series as consumed by the analytics pipeline.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::window::AnalysisWindow;

/// One dated closing price. `close` is `None` when the source had no usable value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: Option<f64>,
}

impl PricePoint {
    /// Build a point, mapping non-finite prices (NaN, ±inf) to a missing close.
    pub fn new(date: NaiveDate, close: f64) -> Self {
        Self {
            date,
            close: close.is_finite().then_some(close),
        }
    }

    pub fn missing(date: NaiveDate) -> Self {
        Self { date, close: None }
    }

    pub fn is_present(&self) -> bool {
        self.close.is_some()
    }
}

/// Ordered sequence of closing prices for one symbol.
///
/// Points are kept sorted by date with at most one point per date
/// (the first point supplied for a date wins).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    points: Vec<PricePoint>,
}

impl PriceSeries {
    pub fn new(mut points: Vec<PricePoint>) -> Self {
        points.sort_by_key(|p| p.date);
        points.dedup_by_key(|p| p.date);
        Self { points }
    }

    /// Build a series from `(date, close)` pairs.
    pub fn from_closes<I>(closes: I) -> Self
    where
        I: IntoIterator<Item = (NaiveDate, f64)>,
    {
        Self::new(
            closes
                .into_iter()
                .map(|(date, close)| PricePoint::new(date, close))
                .collect(),
        )
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points whose date falls inside `window`.
    pub fn within<'a>(
        &'a self,
        window: &'a AnalysisWindow,
    ) -> impl Iterator<Item = &'a PricePoint> + 'a {
        self.points.iter().filter(move |p| window.contains(p.date))
    }

    /// Close on `date`, if the series has a usable value for it.
    pub fn close_on(&self, date: NaiveDate) -> Option<f64> {
        self.points
            .binary_search_by_key(&date, |p| p.date)
            .ok()
            .and_then(|i| self.points[i].close)
    }
}

/// Price series for a set of symbols, keyed (and therefore ordered) by symbol.
pub type PriceTable = BTreeMap<String, PriceSeries>;

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn new_sorts_and_dedups_by_date() {
        let series = PriceSeries::new(vec![
            PricePoint::new(d("2024-01-03"), 11.0),
            PricePoint::new(d("2024-01-02"), 10.0),
            PricePoint::new(d("2024-01-03"), 99.0),
        ]);

        assert_eq!(series.len(), 2);
        assert_eq!(series.points()[0].date, d("2024-01-02"));
        assert_eq!(series.close_on(d("2024-01-03")), Some(11.0));
    }

    #[test]
    fn nan_close_is_missing() {
        let series = PriceSeries::from_closes([(d("2024-01-02"), f64::NAN)]);
        assert!(!series.points()[0].is_present());
        assert_eq!(series.close_on(d("2024-01-02")), None);
    }

    #[test]
    fn within_respects_half_open_window() {
        let series = PriceSeries::from_closes([
            (d("2024-01-01"), 1.0),
            (d("2024-01-02"), 2.0),
            (d("2024-01-03"), 3.0),
        ]);
        let window = AnalysisWindow::new(d("2024-01-02"), d("2024-01-03")).unwrap();

        let dates: Vec<NaiveDate> = series.within(&window).map(|p| p.date).collect();
        assert_eq!(dates, vec![d("2024-01-02")]);
    }
}
