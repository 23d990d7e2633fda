//! Domain types shared by ingestion and analytics.

pub mod price;
pub mod window;

pub use price::{PricePoint, PriceSeries, PriceTable};
pub use window::{parse_date, AnalysisWindow, DATE_FORMAT};

/// Symbol type alias
pub type Symbol = String;
