//! PearTrader Runner: analysis orchestration on top of `peartrader-core`.
//!
//! This crate provides:
//! - TOML configuration with threshold policy and run fingerprinting
//! - Price loading with cache/download/synthetic fallback
//! - The `run_analysis` entry point producing a fingerprinted run
//! - Artifact export (CSV, JSON, Markdown)

pub mod config;
pub mod data_loader;
pub mod export;
pub mod runner;

pub use config::{
    AnalysisConfig, ConfigError, ResolvedThreshold, ThresholdNotice, ThresholdPolicy,
};
pub use data_loader::{dataset_hash, LoadError, LoadOptions, PriceLoader};
pub use export::{generate_report, save_artifacts};
pub use runner::{run_analysis, AnalysisRun, RunError, RunManifest, SCHEMA_VERSION};
