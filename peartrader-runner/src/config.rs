//! Serializable analysis configuration.
//!
//! ```toml
//! [analysis]
//! start_date = "2024-01-01"
//! end_date = "2024-12-31"
//! threshold = 0.7
//! price_field = "adj_close"
//!
//! [threshold]
//! default = 0.68
//! minimum = 0.5
//!
//! [universe.sectors]
//! Technology = ["AAPL", "MSFT"]
//! Energy = ["XOM", "CVX"]
//!
//! [data]
//! cache_dir = "data/cache"
//! offline = false
//! synthetic = false
//! force = false
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use peartrader_core::analytics::AnalysisError;
use peartrader_core::data::{DataError, PriceField, Universe};
use peartrader_core::domain::AnalysisWindow;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),

    #[error(transparent)]
    Data(#[from] DataError),
}

/// Top-level configuration for one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub analysis: AnalysisSection,
    #[serde(default)]
    pub threshold: ThresholdPolicy,
    #[serde(default)]
    pub universe: Universe,
    #[serde(default)]
    pub data: DataSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSection {
    /// `YYYY-MM-DD`, inclusive.
    pub start_date: String,
    /// `YYYY-MM-DD`, exclusive.
    pub end_date: String,
    /// Graph threshold. Resolved through [`ThresholdPolicy`].
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub price_field: PriceField,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSection {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    /// Never contact the network.
    #[serde(default)]
    pub offline: bool,
    /// Generate synthetic prices for symbols that cannot be loaded.
    #[serde(default)]
    pub synthetic: bool,
    /// Refetch even when the cache covers the window.
    #[serde(default)]
    pub force: bool,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("data/cache")
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            offline: false,
            synthetic: false,
            force: false,
        }
    }
}

/// How a user-supplied threshold is accepted or replaced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPolicy {
    #[serde(default = "default_threshold")]
    pub default: f64,
    #[serde(default = "minimum_threshold")]
    pub minimum: f64,
}

fn default_threshold() -> f64 {
    0.68
}

fn minimum_threshold() -> f64 {
    0.5
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            default: default_threshold(),
            minimum: minimum_threshold(),
        }
    }
}

/// Why a requested threshold was replaced by the default.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ThresholdNotice {
    /// The input was not a number.
    Invalid { input: String },
    /// The input was below the policy minimum.
    TooLow { requested: f64, minimum: f64 },
}

impl fmt::Display for ThresholdNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid { input } => write!(f, "invalid threshold '{input}', set to default"),
            Self::TooLow { requested, minimum } => write!(
                f,
                "threshold {requested} is below the minimum {minimum}, set to default"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedThreshold {
    pub value: f64,
    pub notice: Option<ThresholdNotice>,
}

impl ThresholdPolicy {
    fn validate(&self) -> Result<(), ConfigError> {
        if !self.minimum.is_finite() || !self.default.is_finite() {
            return Err(ConfigError::Invalid(
                "threshold default and minimum must be finite".into(),
            ));
        }
        if self.default < self.minimum {
            return Err(ConfigError::Invalid(format!(
                "threshold default {} is below minimum {}",
                self.default, self.minimum
            )));
        }
        Ok(())
    }

    /// Accept `requested` if it is a finite number at or above the minimum;
    /// otherwise fall back to the default with a notice. `None` means the
    /// default was asked for and yields no notice.
    pub fn resolve(&self, requested: Option<f64>) -> ResolvedThreshold {
        match requested {
            None => self.accept(self.default),
            Some(v) if !v.is_finite() => self.replace(ThresholdNotice::Invalid {
                input: v.to_string(),
            }),
            Some(v) if v < self.minimum => self.replace(ThresholdNotice::TooLow {
                requested: v,
                minimum: self.minimum,
            }),
            Some(v) => self.accept(v),
        }
    }

    /// Like [`resolve`](Self::resolve), starting from raw text input. Blank
    /// input counts as invalid.
    pub fn resolve_input(&self, input: &str) -> ResolvedThreshold {
        match input.trim().parse::<f64>() {
            Ok(v) => self.resolve(Some(v)),
            Err(_) => self.replace(ThresholdNotice::Invalid {
                input: input.to_string(),
            }),
        }
    }

    fn accept(&self, value: f64) -> ResolvedThreshold {
        ResolvedThreshold {
            value,
            notice: None,
        }
    }

    fn replace(&self, notice: ThresholdNotice) -> ResolvedThreshold {
        ResolvedThreshold {
            value: self.default,
            notice: Some(notice),
        }
    }
}

/// The inputs that determine an analysis result.
#[derive(Serialize)]
struct FingerprintInput<'a> {
    start_date: &'a str,
    end_date: &'a str,
    threshold: f64,
    price_field: PriceField,
    symbols: Vec<String>,
}

impl AnalysisConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.universe = Universe::from_sectors(std::mem::take(&mut config.universe.sectors))?;
        config.validate()?;
        Ok(config)
    }

    /// Config over the built-in universe with every other setting defaulted.
    pub fn for_window(start_date: &str, end_date: &str) -> Self {
        Self {
            analysis: AnalysisSection {
                start_date: start_date.to_string(),
                end_date: end_date.to_string(),
                threshold: None,
                price_field: PriceField::default(),
            },
            threshold: ThresholdPolicy::default(),
            universe: Universe::default(),
            data: DataSection::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.window()?;
        self.threshold.validate()?;
        if self.universe.symbols().len() < 2 {
            return Err(ConfigError::Invalid(
                "universe must contain at least 2 symbols".into(),
            ));
        }
        if self.data.offline && self.data.force {
            return Err(ConfigError::Invalid(
                "`force` refetches from the network and cannot be combined with `offline`".into(),
            ));
        }
        Ok(())
    }

    pub fn window(&self) -> Result<AnalysisWindow, ConfigError> {
        Ok(AnalysisWindow::parse(
            &self.analysis.start_date,
            &self.analysis.end_date,
        )?)
    }

    pub fn resolved_threshold(&self) -> ResolvedThreshold {
        self.threshold.resolve(self.analysis.threshold)
    }

    /// BLAKE3 hash of the inputs that determine the analysis result.
    pub fn fingerprint(&self) -> Result<String, ConfigError> {
        let input = FingerprintInput {
            start_date: &self.analysis.start_date,
            end_date: &self.analysis.end_date,
            threshold: self.resolved_threshold().value,
            price_field: self.analysis.price_field,
            symbols: self.universe.symbols(),
        };
        let json = serde_json::to_string(&input)
            .map_err(|e| ConfigError::Invalid(format!("fingerprint serialization: {e}")))?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[analysis]
start_date = "2024-01-01"
end_date = "2024-07-01"
"#;

    #[test]
    fn minimal_config_takes_defaults() {
        let config = AnalysisConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.analysis.price_field, PriceField::AdjClose);
        assert_eq!(config.threshold, ThresholdPolicy::default());
        assert_eq!(config.universe, Universe::default_us());
        assert_eq!(config.data.cache_dir, PathBuf::from("data/cache"));
        assert_eq!(config.resolved_threshold().value, 0.68);
        assert!(config.resolved_threshold().notice.is_none());
    }

    #[test]
    fn full_config_parses() {
        let config = AnalysisConfig::from_toml(
            r#"
[analysis]
start_date = "2023-01-01"
end_date = "2024-01-01"
threshold = 0.75
price_field = "close"

[threshold]
default = 0.7
minimum = 0.6

[universe.sectors]
Tech = ["aapl", "MSFT"]

[data]
cache_dir = "/tmp/prices"
synthetic = true
"#,
        )
        .unwrap();

        assert_eq!(config.analysis.price_field, PriceField::Close);
        assert_eq!(config.universe.symbols(), vec!["AAPL", "MSFT"]);
        assert_eq!(config.resolved_threshold().value, 0.75);
        assert!(config.data.synthetic);
    }

    #[test]
    fn bad_dates_are_rejected() {
        let err = AnalysisConfig::from_toml(
            "[analysis]\nstart_date = \"2024-13-01\"\nend_date = \"2024-12-01\"\n",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Analysis(AnalysisError::InvalidDateFormat { .. })
        ));

        let err = AnalysisConfig::from_toml(
            "[analysis]\nstart_date = \"2024-06-01\"\nend_date = \"2024-06-01\"\n",
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Analysis(AnalysisError::InvalidDateRange { .. })
        ));
    }

    #[test]
    fn offline_force_conflict() {
        let toml = format!("{MINIMAL}\n[data]\noffline = true\nforce = true\n");
        assert!(matches!(
            AnalysisConfig::from_toml(&toml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn threshold_policy_replaces_low_and_invalid_input() {
        let policy = ThresholdPolicy::default();

        let low = policy.resolve(Some(0.3));
        assert_eq!(low.value, 0.68);
        assert_eq!(
            low.notice,
            Some(ThresholdNotice::TooLow {
                requested: 0.3,
                minimum: 0.5
            })
        );

        let text = policy.resolve_input("high");
        assert_eq!(text.value, 0.68);
        assert!(matches!(text.notice, Some(ThresholdNotice::Invalid { .. })));

        assert_eq!(policy.resolve_input(" 0.5 ").value, 0.5);
        assert!(policy.resolve_input("0.5").notice.is_none());
        assert!(policy.resolve_input("").notice.is_some());
    }

    #[test]
    fn non_finite_threshold_falls_back_to_default() {
        let policy = ThresholdPolicy::default();
        for requested in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
            let resolved = policy.resolve(Some(requested));
            assert_eq!(resolved.value, 0.68);
            assert!(matches!(
                resolved.notice,
                Some(ThresholdNotice::Invalid { .. })
            ));
        }
        let text = policy.resolve_input("inf");
        assert_eq!(text.value, 0.68);
        assert!(matches!(text.notice, Some(ThresholdNotice::Invalid { .. })));
    }

    #[test]
    fn fingerprint_tracks_result_inputs_only() {
        let a = AnalysisConfig::from_toml(MINIMAL).unwrap();
        let mut b = a.clone();
        b.data.offline = true;
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());

        b.analysis.threshold = Some(0.9);
        assert_ne!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    }
}
