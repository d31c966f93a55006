//! Experiment configuration and service settings.
//!
//! [`Configuration`] is the user-editable experiment: which distribution to
//! sample, its parameters, how many values to draw, how many histogram bins
//! to use and which goodness-of-fit test to run. Nothing here is validated on
//! mutation; [`crate::validate::validate`] runs at submit time.
//!
//! [`Settings`] is the optional TOML file the binary reads:
//!
//! ```toml
//! [service]
//! base_url = "http://localhost:5000"
//! connect_timeout_secs = 3
//!
//! [experiment]
//! distribution = "normal"
//! mean = 10.0
//! std_dev = 2.5
//! sample_size = 5000
//! num_bins = 20
//! test_kind = "ks"
//! ```

use std::path::Path;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::service::Endpoint;

/// Largest sample the statistics service accepts.
pub const MAX_SAMPLE_SIZE: i64 = 1_000_000;

/// Base URL used when neither flags, settings nor the environment name one.
pub const DEFAULT_API_URL: &str = "http://localhost:5000";

/// Environment variable overriding [`DEFAULT_API_URL`].
pub const API_URL_ENV: &str = "FITCHECK_API_URL";

// ---------------------------------------------------------------------------
// Distribution
// ---------------------------------------------------------------------------

/// Distribution selector without parameters (CLI and settings use this).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistributionKind {
    Uniform,
    Exponential,
    Normal,
}

impl std::fmt::Display for DistributionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DistributionKind::Uniform => write!(f, "uniform"),
            DistributionKind::Exponential => write!(f, "exponential"),
            DistributionKind::Normal => write!(f, "normal"),
        }
    }
}

/// A distribution together with its one active parameter set.
///
/// Serialized with the `distribution` tag next to the parameters, which is
/// the shape the statistics service expects:
/// `{"distribution":"uniform","a":0.0,"b":1.0}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "distribution", rename_all = "lowercase")]
pub enum Distribution {
    Uniform { a: f64, b: f64 },
    Exponential { lambda: f64 },
    Normal { mean: f64, std_dev: f64 },
}

impl Distribution {
    /// Parameter set the form starts with when the user picks `kind`.
    pub fn default_for(kind: DistributionKind) -> Self {
        match kind {
            DistributionKind::Uniform => Distribution::Uniform { a: 0.0, b: 1.0 },
            DistributionKind::Exponential => Distribution::Exponential { lambda: 1.0 },
            DistributionKind::Normal => Distribution::Normal { mean: 0.0, std_dev: 1.0 },
        }
    }

    pub fn kind(&self) -> DistributionKind {
        match self {
            Distribution::Uniform { .. } => DistributionKind::Uniform,
            Distribution::Exponential { .. } => DistributionKind::Exponential,
            Distribution::Normal { .. } => DistributionKind::Normal,
        }
    }

    /// Wire name of the distribution (`uniform`, `exponential`, `normal`).
    pub fn name(&self) -> &'static str {
        match self {
            Distribution::Uniform { .. } => "uniform",
            Distribution::Exponential { .. } => "exponential",
            Distribution::Normal { .. } => "normal",
        }
    }

    /// Wire field names of every distribution's parameters.
    pub const PARAMETER_FIELDS: [&'static str; 5] = ["a", "b", "lambda", "mean", "std_dev"];

    /// Active parameters as `(wire field name, value)` pairs, in wire order.
    pub fn params(&self) -> Vec<(&'static str, f64)> {
        match *self {
            Distribution::Uniform { a, b } => vec![("a", a), ("b", b)],
            Distribution::Exponential { lambda } => vec![("lambda", lambda)],
            Distribution::Normal { mean, std_dev } => vec![("mean", mean), ("std_dev", std_dev)],
        }
    }
}

impl Default for Distribution {
    fn default() -> Self {
        Distribution::default_for(DistributionKind::Uniform)
    }
}

impl std::fmt::Display for Distribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let params: Vec<String> = self
            .params()
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        write!(f, "{}({})", self.name(), params.join(", "))
    }
}

// ---------------------------------------------------------------------------
// NumBins
// ---------------------------------------------------------------------------

/// Histogram bin count. Only the four counts the service supports exist.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "u32", into = "u32")]
pub enum NumBins {
    #[default]
    Ten,
    Fifteen,
    Twenty,
    TwentyFive,
}

impl NumBins {
    pub const ALL: [NumBins; 4] = [NumBins::Ten, NumBins::Fifteen, NumBins::Twenty, NumBins::TwentyFive];

    pub fn get(self) -> u32 {
        match self {
            NumBins::Ten => 10,
            NumBins::Fifteen => 15,
            NumBins::Twenty => 20,
            NumBins::TwentyFive => 25,
        }
    }
}

impl TryFrom<u32> for NumBins {
    type Error = ConfigError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        NumBins::ALL
            .into_iter()
            .find(|bins| bins.get() == value)
            .ok_or(ConfigError::UnsupportedBinCount(value))
    }
}

impl From<NumBins> for u32 {
    fn from(bins: NumBins) -> u32 {
        bins.get()
    }
}

impl std::fmt::Display for NumBins {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.get())
    }
}

impl std::str::FromStr for NumBins {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: u32 = s
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("bin count `{s}` is not a number")))?;
        NumBins::try_from(value)
    }
}

// ---------------------------------------------------------------------------
// TestKind
// ---------------------------------------------------------------------------

/// Goodness-of-fit test selector.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum, Serialize,
    Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum TestKind {
    #[default]
    ChiSquare,
    Ks,
}

impl TestKind {
    pub const ALL: [TestKind; 2] = [TestKind::ChiSquare, TestKind::Ks];

    pub fn endpoint(self) -> Endpoint {
        match self {
            TestKind::ChiSquare => Endpoint::ChiSquareTest,
            TestKind::Ks => Endpoint::KsTest,
        }
    }

    /// Name of the statistic field in the service's raw response.
    pub fn statistic_field(self) -> &'static str {
        match self {
            TestKind::ChiSquare => "chi_square_stat",
            TestKind::Ks => "ks_stat",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TestKind::ChiSquare => "Chi-square",
            TestKind::Ks => "Kolmogorov-Smirnov",
        }
    }
}

impl std::fmt::Display for TestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestKind::ChiSquare => write!(f, "chi-square"),
            TestKind::Ks => write!(f, "ks"),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

fn default_sample_size() -> i64 {
    1000
}

/// The experiment a session runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    #[serde(flatten)]
    pub distribution: Distribution,
    #[serde(default = "default_sample_size")]
    pub sample_size: i64,
    #[serde(default)]
    pub num_bins: NumBins,
    #[serde(default)]
    pub test_kind: TestKind,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            distribution: Distribution::default(),
            sample_size: default_sample_size(),
            num_bins: NumBins::default(),
            test_kind: TestKind::default(),
        }
    }
}

impl Configuration {
    /// Switch to `kind`, resetting parameters only when the kind changes.
    pub fn select_distribution(&mut self, kind: DistributionKind) {
        if self.distribution.kind() != kind {
            self.distribution = Distribution::default_for(kind);
        }
    }
}

// ---------------------------------------------------------------------------
// Service configuration
// ---------------------------------------------------------------------------

/// Where the statistics service lives and how long to wait for it.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    /// Base URL, without trailing slash (e.g. `http://localhost:5000`).
    pub base_url: String,
    /// TCP connection timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout. `None` waits until the transport resolves.
    pub request_timeout: Option<Duration>,
}

impl ServiceConfig {
    /// Create a config with defaults:
    ///
    /// - connect_timeout: 3 s
    /// - request_timeout: none
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            connect_timeout: Duration::from_secs(3),
            request_timeout: None,
        }
    }

    /// Config aimed at `$FITCHECK_API_URL`, or [`DEFAULT_API_URL`].
    pub fn from_env() -> Self {
        match std::env::var(API_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => Self::new(url.trim()),
            _ => Self::new(DEFAULT_API_URL),
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Apply the `[service]` table of a settings file on top of `self`.
    pub fn with_settings(mut self, settings: &ServiceSettings) -> Self {
        if let Some(url) = &settings.base_url {
            self.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(secs) = settings.connect_timeout_secs {
            self.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = settings.request_timeout_secs {
            self.request_timeout = Some(Duration::from_secs(secs));
        }
        self
    }

    /// Absolute URL of `endpoint`.
    pub fn url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.base_url, endpoint.path())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

// ---------------------------------------------------------------------------
// Settings file
// ---------------------------------------------------------------------------

/// `[service]` table of the settings file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ServiceSettings {
    pub base_url: Option<String>,
    pub connect_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

fn check_parameter_fields(table: &toml::Table, distribution: &Distribution) -> Result<(), ConfigError> {
    let active = distribution.params();
    match Distribution::PARAMETER_FIELDS
        .iter()
        .find(|field| table.contains_key(**field) && !active.iter().any(|(name, _)| name == *field))
    {
        Some(field) => Err(ConfigError::InvalidValue(format!(
            "`{field}` does not apply to the {} distribution",
            distribution.name()
        ))),
        None => Ok(()),
    }
}

/// Parsed settings file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub service: ServiceSettings,
    pub experiment: Option<Configuration>,
}

impl Settings {
    /// Parse a settings file. An `[experiment]` table may only carry the
    /// parameters of the distribution it selects.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(text)?;
        if let Some(experiment) = &settings.experiment {
            let raw: toml::Table = toml::from_str(text)?;
            if let Some(toml::Value::Table(table)) = raw.get("experiment") {
                check_parameter_fields(table, &experiment.distribution)?;
            }
        }
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
