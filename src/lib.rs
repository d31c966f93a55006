//! # fitcheck
//!
//! Client-side orchestration for a statistics service that samples a
//! distribution, bins the sample and runs chi-square or Kolmogorov-Smirnov
//! goodness-of-fit tests on it.
//!
//! ```text
//! Configuration ──► validate ──► payload ──► Orchestrator ──► StatsService
//!                                                 │
//!                     Session (state, artifacts) ◄┴── interpret
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fitcheck::{HttpStatsService, Orchestrator, ServiceConfig, Session};
//!
//! let orchestrator = Orchestrator::new(HttpStatsService::new(ServiceConfig::from_env()));
//! let mut session = Session::default();
//! orchestrator.generate(&mut session).await?;
//! orchestrator.run_test(&mut session).await?;
//! println!("{:?}", session.current_test_result());
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod interpret;
pub mod orchestrator;
pub mod payload;
pub mod report;
pub mod service;
pub mod session;
pub mod validate;

pub use config::{Configuration, Distribution, DistributionKind, NumBins, ServiceConfig, Settings, TestKind};
pub use error::{ConfigError, InterpretError, ServiceError, SubmitError, ValidationReport, Violation};
pub use interpret::{Decision, HistogramBin, HistogramTable, TestResult};
pub use orchestrator::{Orchestrator, PipelineReport, StageReport};
pub use payload::Payload;
pub use service::{Endpoint, HttpStatsService, ServiceInfo, StatsService};
pub use session::{Completion, PipelineState, Sample, Session, Stage, StageFailure, TestState};
pub use validate::validate;
