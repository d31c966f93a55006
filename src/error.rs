//! Error taxonomy.
//!
//! - [`Violation`] / [`ValidationReport`]: local configuration problems. They
//!   block submission; nothing is sent.
//! - [`ServiceError`]: a stage's request failed in transport, was rejected by
//!   the service, or came back malformed.
//! - [`InterpretError`]: a 2xx body lacked a required field or broke an
//!   invariant. Surfaced exactly like a server error.
//! - [`SubmitError`]: the session refused to start a stage.
//! - [`ConfigError`]: settings file and option parsing.
//!
//! Stale responses are not errors; see [`crate::session::Completion::Stale`].

use std::path::PathBuf;

use thiserror::Error;

use crate::config::MAX_SAMPLE_SIZE;
use crate::session::Stage;

/// One failed validation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Violation {
    #[error("sample size must be a positive integer")]
    SampleSizeNonPositive,
    #[error("sample size must not exceed {}", MAX_SAMPLE_SIZE)]
    SampleSizeTooLarge,
    #[error("lambda must be positive")]
    LambdaNonPositive,
    #[error("standard deviation must be positive")]
    StdDevNonPositive,
    #[error("lower bound a must be less than upper bound b")]
    UniformBoundsInvalid,
    #[error("distribution parameters must be finite numbers")]
    ParameterNotFinite,
}

impl Violation {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Violation::SampleSizeNonPositive => "SAMPLE_SIZE_NON_POSITIVE",
            Violation::SampleSizeTooLarge => "SAMPLE_SIZE_TOO_LARGE",
            Violation::LambdaNonPositive => "LAMBDA_NON_POSITIVE",
            Violation::StdDevNonPositive => "STD_DEV_NON_POSITIVE",
            Violation::UniformBoundsInvalid => "UNIFORM_BOUNDS_INVALID",
            Violation::ParameterNotFinite => "PARAMETER_NOT_FINITE",
        }
    }
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.code())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Every violation found in one configuration, in rule order. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid configuration: {}", summarize(.violations))]
pub struct ValidationReport {
    violations: Vec<Violation>,
}

impl ValidationReport {
    /// Returns `None` for an empty list.
    pub fn new(violations: Vec<Violation>) -> Option<Self> {
        if violations.is_empty() {
            None
        } else {
            Some(Self { violations })
        }
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }

    /// The violation shown to the user.
    pub fn first(&self) -> Violation {
        self.violations[0]
    }

    pub fn contains(&self, violation: Violation) -> bool {
        self.violations.contains(&violation)
    }

    pub fn codes(&self) -> Vec<&'static str> {
        self.violations.iter().map(|v| v.code()).collect()
    }
}

/// A successful response that cannot be applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpretError {
    #[error("malformed {stage} response: {detail}")]
    MalformedResponse { stage: Stage, detail: String },
}

impl InterpretError {
    pub fn malformed(stage: Stage, detail: impl Into<String>) -> Self {
        InterpretError::MalformedResponse {
            stage,
            detail: detail.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            InterpretError::MalformedResponse { .. } => "MALFORMED_RESPONSE",
        }
    }
}

/// Why a stage's request failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// No HTTP response: connection refused, reset, timed out.
    #[error("connection to {url} failed: {detail}")]
    Transport { url: String, detail: String },
    /// Non-2xx reply. `message` is the service's `error` string verbatim.
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error(transparent)]
    Malformed(#[from] InterpretError),
}

impl ServiceError {
    /// Short category label for reports and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Transport { .. } => "transport",
            ServiceError::Rejected { .. } => "server",
            ServiceError::Malformed(_) => "malformed",
        }
    }
}

/// The session refused to start a stage. Nothing was sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Invalid(#[from] ValidationReport),
    #[error("a {0} request is already in flight")]
    Busy(Stage),
    #[error("no sample available for the {0} stage; generate one first")]
    NoSample(Stage),
}

/// Settings file and option errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid settings: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unsupported bin count {0} (expected one of 10, 15, 20, 25)")]
    UnsupportedBinCount(u32),
    #[error("{0}")]
    InvalidValue(String),
}
