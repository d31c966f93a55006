//! Session context and pipeline state machine.
//!
//! A [`Session`] owns everything one user works with: the editable
//! [`Configuration`], the current [`Sample`], the artifacts derived from it,
//! and the per-stage errors on display. It never performs I/O. Each stage is
//! split into a `begin_*` transition that hands out a ticket (request id and
//! payload) and a `complete_*` transition that takes the ticket back together
//! with whatever the service answered:
//!
//! ```text
//!   Idle ──begin_generate──► Generating ──ok──► Generated ──auto──► HistogramPending
//!    ▲                           │                  ▲                   │      │
//!    └──────────fail─────────────┘                  └────────fail───────┘      ok
//!                                                                              ▼
//!                                                                       HistogramReady
//!
//!   (orthogonal)  TestState::Idle ──begin_test──► Pending(kind) ──ok/fail──► Idle
//! ```
//!
//! Staleness: every ticket carries a request id. A completion is applied only
//! if that id is still the pending id for its stage. Starting a generate
//! clears the pending histogram and test ids, so replies computed against the
//! previous sample are dropped when they arrive ([`Completion::Stale`]).

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{Configuration, NumBins, TestKind};
use crate::error::{ServiceError, SubmitError, ValidationReport};
use crate::interpret::{self, HistogramTable, TestResult};
use crate::payload::{self, Payload};
use crate::validate::validate;

// ---------------------------------------------------------------------------
// States and stages
// ---------------------------------------------------------------------------

/// A request stage of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Generate,
    Histogram,
    Test(TestKind),
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Generate => write!(f, "generate"),
            Stage::Histogram => write!(f, "histogram"),
            Stage::Test(kind) => write!(f, "{kind} test"),
        }
    }
}

/// Position in the generate → histogram pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Generating,
    Generated,
    HistogramPending,
    HistogramReady,
}

/// Test requests run beside the pipeline once a sample exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TestState {
    Idle,
    Pending(TestKind),
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// A generated sample. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    version: u64,
    values: Vec<f64>,
}

impl Sample {
    /// Id of the generate request that produced this sample. Strictly
    /// increasing across the session.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Category of a surfaced failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Transport,
    Server,
    Malformed,
}

/// The single message shown for a failed stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub kind: FailureKind,
    pub message: String,
}

impl StageFailure {
    fn from_service(stage: Stage, err: &ServiceError) -> Self {
        let kind = match err {
            ServiceError::Transport { .. } => FailureKind::Transport,
            ServiceError::Rejected { .. } => FailureKind::Server,
            ServiceError::Malformed(_) => FailureKind::Malformed,
        };
        Self {
            stage,
            kind,
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for StageFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.message)
    }
}

/// What happened when a reply was handed back to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion<T> {
    Applied(T),
    Failed(StageFailure),
    /// The reply belonged to a superseded request and was discarded.
    Stale,
}

impl<T> Completion<T> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Completion::Applied(_))
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Completion::Stale)
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        match self {
            Completion::Failed(f) => Some(f),
            _ => None,
        }
    }

    /// Drop the applied value, keeping only the outcome.
    pub fn outcome(self) -> Completion<()> {
        match self {
            Completion::Applied(_) => Completion::Applied(()),
            Completion::Failed(f) => Completion::Failed(f),
            Completion::Stale => Completion::Stale,
        }
    }
}

// ---------------------------------------------------------------------------
// Tickets
// ---------------------------------------------------------------------------

/// An issued generate request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateTicket {
    request_id: u64,
    expected_len: usize,
    payload: Payload,
}

impl GenerateTicket {
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}

/// An issued histogram request for one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramTicket {
    request_id: u64,
    sample_version: u64,
    sample_len: usize,
    num_bins: NumBins,
    payload: Payload,
}

impl HistogramTicket {
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn sample_version(&self) -> u64 {
        self.sample_version
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}

/// An issued goodness-of-fit request for one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct TestTicket {
    request_id: u64,
    sample_version: u64,
    kind: TestKind,
    payload: Payload,
}

impl TestTicket {
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn sample_version(&self) -> u64 {
        self.sample_version
    }

    pub fn kind(&self) -> TestKind {
        self.kind
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One user's configuration, artifacts and pipeline state.
#[derive(Debug, Clone)]
pub struct Session {
    config: Configuration,
    state: PipelineState,
    test_state: TestState,
    sample: Option<Sample>,
    histogram: Option<HistogramTable>,
    test_results: BTreeMap<TestKind, TestResult>,
    errors: BTreeMap<Stage, StageFailure>,
    next_request_id: u64,
    pending_generate: Option<u64>,
    pending_histogram: Option<u64>,
    pending_test: Option<u64>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(Configuration::default())
    }
}

impl Session {
    pub fn new(config: Configuration) -> Self {
        Self {
            config,
            state: PipelineState::Idle,
            test_state: TestState::Idle,
            sample: None,
            histogram: None,
            test_results: BTreeMap::new(),
            errors: BTreeMap::new(),
            next_request_id: 1,
            pending_generate: None,
            pending_histogram: None,
            pending_test: None,
        }
    }

    // -- observable state ---------------------------------------------------

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Free editing; nothing is validated until the next submit.
    pub fn config_mut(&mut self) -> &mut Configuration {
        &mut self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn test_state(&self) -> TestState {
        self.test_state
    }

    /// True while any request is outstanding.
    pub fn is_loading(&self) -> bool {
        matches!(
            self.state,
            PipelineState::Generating | PipelineState::HistogramPending
        ) || matches!(self.test_state, TestState::Pending(_))
    }

    pub fn sample(&self) -> Option<&Sample> {
        self.sample.as_ref()
    }

    pub fn histogram(&self) -> Option<&HistogramTable> {
        self.histogram.as_ref()
    }

    pub fn test_result(&self, kind: TestKind) -> Option<&TestResult> {
        self.test_results.get(&kind)
    }

    /// Result for the currently selected test kind.
    pub fn current_test_result(&self) -> Option<&TestResult> {
        self.test_result(self.config.test_kind)
    }

    pub fn test_results(&self) -> impl Iterator<Item = &TestResult> {
        self.test_results.values()
    }

    pub fn error(&self, stage: Stage) -> Option<&StageFailure> {
        self.errors.get(&stage)
    }

    pub fn errors(&self) -> impl Iterator<Item = &StageFailure> {
        self.errors.values()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    // -- helpers --------------------------------------------------------------

    fn issue_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    fn surface(&mut self, failure: StageFailure) -> StageFailure {
        self.errors.insert(failure.stage, failure.clone());
        failure
    }

    /// Where the pipeline rests given the artifacts currently held.
    fn resting_state(&self) -> PipelineState {
        match (&self.sample, &self.histogram) {
            (None, _) => PipelineState::Idle,
            (Some(_), _) if self.pending_histogram.is_some() => PipelineState::HistogramPending,
            (Some(_), Some(_)) => PipelineState::HistogramReady,
            (Some(_), None) => PipelineState::Generated,
        }
    }

    fn reject_invalid(&mut self, stage: Stage) -> Result<(), SubmitError> {
        validate(&self.config).map_err(|report| self.block(stage, report))
    }

    fn block(&mut self, stage: Stage, report: ValidationReport) -> SubmitError {
        let first = report.first();
        warn!(stage = %stage, code = first.code(), violations = report.violations().len(), "submission blocked by validation");
        self.surface(StageFailure {
            stage,
            kind: FailureKind::Validation,
            message: first.to_string(),
        });
        SubmitError::Invalid(report)
    }

    fn start_histogram(&mut self) -> Option<HistogramTicket> {
        let sample = self.sample.as_ref()?;
        let payload = payload::build_histogram_payload(sample.values(), self.config.num_bins);
        let (sample_version, sample_len) = (sample.version(), sample.len());
        let request_id = self.issue_request_id();

        self.pending_histogram = Some(request_id);
        self.histogram = None;
        self.errors.remove(&Stage::Histogram);
        self.state = PipelineState::HistogramPending;
        debug!(request_id, sample_version, num_bins = %self.config.num_bins, "histogram requested");

        Some(HistogramTicket {
            request_id,
            sample_version,
            sample_len,
            num_bins: self.config.num_bins,
            payload,
        })
    }

    // -- generate ---------------------------------------------------------------

    /// Validate the configuration and start a generate request.
    ///
    /// Any histogram or test request still in flight is voided: its reply
    /// will come back as [`Completion::Stale`].
    pub fn begin_generate(&mut self) -> Result<GenerateTicket, SubmitError> {
        if self.pending_generate.is_some() {
            return Err(SubmitError::Busy(Stage::Generate));
        }
        self.reject_invalid(Stage::Generate)?;

        let payload = payload::build_generate_payload(&self.config);
        let request_id = self.issue_request_id();
        // validate() guarantees 0 < sample_size <= MAX_SAMPLE_SIZE.
        let expected_len = self.config.sample_size as usize;

        self.pending_generate = Some(request_id);
        self.pending_histogram = None;
        self.pending_test = None;
        self.test_state = TestState::Idle;
        self.errors.remove(&Stage::Generate);
        self.state = PipelineState::Generating;
        info!(
            request_id,
            distribution = %self.config.distribution,
            sample_size = self.config.sample_size,
            "generate requested"
        );

        Ok(GenerateTicket {
            request_id,
            expected_len,
            payload,
        })
    }

    /// Apply a generate reply.
    ///
    /// On success the new sample replaces the old one, every derived artifact
    /// is dropped, and the histogram request starts immediately; its ticket is
    /// returned. On failure the previous sample and artifacts stay.
    pub fn complete_generate(
        &mut self,
        ticket: GenerateTicket,
        reply: Result<Value, ServiceError>,
    ) -> Completion<HistogramTicket> {
        if self.pending_generate != Some(ticket.request_id) {
            debug!(request_id = ticket.request_id, "discarding stale generate reply");
            return Completion::Stale;
        }
        self.pending_generate = None;

        let parsed = reply.and_then(|raw| {
            interpret::parse_sample(&raw, ticket.expected_len).map_err(ServiceError::from)
        });

        match parsed {
            Ok(values) => {
                info!(request_id = ticket.request_id, len = values.len(), "sample received");
                self.sample = Some(Sample {
                    version: ticket.request_id,
                    values,
                });
                self.histogram = None;
                self.test_results.clear();
                self.errors.clear();
                self.state = PipelineState::Generated;
                match self.start_histogram() {
                    Some(next) => Completion::Applied(next),
                    None => Completion::Stale,
                }
            }
            Err(e) => {
                warn!(request_id = ticket.request_id, error = %e, kind = e.kind(), "generate failed");
                self.state = self.resting_state();
                Completion::Failed(self.surface(StageFailure::from_service(Stage::Generate, &e)))
            }
        }
    }

    // -- histogram ------------------------------------------------------------

    /// Re-request the histogram of the current sample (after a failure, or
    /// after changing the bin count).
    pub fn begin_histogram(&mut self) -> Result<HistogramTicket, SubmitError> {
        if self.pending_generate.is_some() {
            return Err(SubmitError::Busy(Stage::Generate));
        }
        if self.pending_histogram.is_some() {
            return Err(SubmitError::Busy(Stage::Histogram));
        }
        self.start_histogram()
            .ok_or(SubmitError::NoSample(Stage::Histogram))
    }

    pub fn complete_histogram(
        &mut self,
        ticket: HistogramTicket,
        reply: Result<Value, ServiceError>,
    ) -> Completion<()> {
        let current = self.sample.as_ref().map(Sample::version);
        if self.pending_histogram != Some(ticket.request_id) || current != Some(ticket.sample_version) {
            debug!(
                request_id = ticket.request_id,
                sample_version = ticket.sample_version,
                "discarding stale histogram reply"
            );
            return Completion::Stale;
        }
        self.pending_histogram = None;

        let parsed = reply.and_then(|raw| {
            interpret::parse_histogram(&raw, ticket.sample_len, ticket.num_bins)
                .map_err(ServiceError::from)
        });

        match parsed {
            Ok(table) => {
                info!(request_id = ticket.request_id, bins = table.len(), "histogram received");
                self.histogram = Some(table);
                self.state = PipelineState::HistogramReady;
                Completion::Applied(())
            }
            Err(e) => {
                warn!(request_id = ticket.request_id, error = %e, kind = e.kind(), "histogram failed");
                self.state = PipelineState::Generated;
                Completion::Failed(self.surface(StageFailure::from_service(Stage::Histogram, &e)))
            }
        }
    }

    // -- goodness-of-fit tests ----------------------------------------------------

    /// Start the configured test against the current sample.
    pub fn begin_test(&mut self) -> Result<TestTicket, SubmitError> {
        let kind = self.config.test_kind;
        if self.pending_generate.is_some() {
            return Err(SubmitError::Busy(Stage::Generate));
        }
        if let TestState::Pending(running) = self.test_state {
            return Err(SubmitError::Busy(Stage::Test(running)));
        }
        let Some(sample) = self.sample.as_ref() else {
            return Err(SubmitError::NoSample(Stage::Test(kind)));
        };
        let checked = validate(&self.config).map(|()| {
            let payload = payload::build_test_payload(sample.values(), &self.config, kind);
            (sample.version(), payload)
        });
        let (sample_version, payload) = match checked {
            Ok(ready) => ready,
            Err(report) => return Err(self.block(Stage::Test(kind), report)),
        };
        let request_id = self.issue_request_id();
        self.pending_test = Some(request_id);
        self.test_state = TestState::Pending(kind);
        self.errors.remove(&Stage::Test(kind));
        info!(request_id, sample_version, test = %kind, "test requested");

        Ok(TestTicket {
            request_id,
            sample_version,
            kind,
            payload,
        })
    }

    pub fn complete_test(
        &mut self,
        ticket: TestTicket,
        reply: Result<Value, ServiceError>,
    ) -> Completion<TestResult> {
        let current = self.sample.as_ref().map(Sample::version);
        if self.pending_test != Some(ticket.request_id) || current != Some(ticket.sample_version) {
            debug!(request_id = ticket.request_id, test = %ticket.kind, "discarding stale test reply");
            return Completion::Stale;
        }
        self.pending_test = None;
        self.test_state = TestState::Idle;

        let stage = Stage::Test(ticket.kind);
        let parsed = reply
            .and_then(|raw| interpret::interpret(&raw, ticket.kind).map_err(ServiceError::from));

        match parsed {
            Ok(result) => {
                info!(
                    request_id = ticket.request_id,
                    test = %ticket.kind,
                    statistic = result.statistic,
                    p_value = result.p_value,
                    decision = %result.decision,
                    "test result received"
                );
                self.test_results.insert(ticket.kind, result.clone());
                Completion::Applied(result)
            }
            Err(e) => {
                warn!(request_id = ticket.request_id, test = %ticket.kind, error = %e, "test failed");
                Completion::Failed(self.surface(StageFailure::from_service(stage, &e)))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
