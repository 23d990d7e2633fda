//! PearTrader core: co-movement analytics over daily closing prices.
//!
//! - `domain`: price series, analysis windows, date parsing
//! - `analytics`: correlation matrix, threshold graph, greedy modularity
//!   communities, and the query layer over a completed session
//! - `data`: the ingestion side (Yahoo, CSV, Parquet cache, universes)
//!
//! `analytics` performs no network or file I/O.

pub mod analytics;
pub mod data;
pub mod domain;

pub use analytics::{AnalysisError, AnalysisSession, QueryService, SessionStore};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: sessions are shared across threads behind `Arc`,
    /// so everything a session holds must be Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::PriceSeries>();
        require_sync::<domain::PriceSeries>();
        require_send::<domain::AnalysisWindow>();
        require_sync::<domain::AnalysisWindow>();

        require_send::<analytics::CorrelationMatrix>();
        require_sync::<analytics::CorrelationMatrix>();
        require_send::<analytics::CorrelationGraph>();
        require_sync::<analytics::CorrelationGraph>();
        require_send::<analytics::CommunityPartition>();
        require_sync::<analytics::CommunityPartition>();
        require_send::<analytics::AnalysisSession>();
        require_sync::<analytics::AnalysisSession>();
        require_send::<analytics::SessionStore>();
        require_sync::<analytics::SessionStore>();
        require_send::<analytics::QueryService>();
        require_sync::<analytics::QueryService>();
        require_send::<AnalysisError>();
        require_sync::<AnalysisError>();

        require_send::<data::CircuitBreaker>();
        require_sync::<data::CircuitBreaker>();
        require_send::<data::YahooProvider>();
        require_sync::<data::YahooProvider>();
    }

    /// Compile-time check: the analytics layer takes prices as plain data,
    /// never a provider.
    #[allow(dead_code)]
    fn analytics_entry_point_takes_plain_prices(
        prices: &domain::PriceTable,
        window: domain::AnalysisWindow,
    ) -> Result<AnalysisSession, AnalysisError> {
        AnalysisSession::analyze(prices, window, 0.5)
    }
}
