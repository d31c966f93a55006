//! # Request Orchestrator
//!
//! Drives a [`Session`] against a [`StatsService`]:
//!
//! ```text
//! Session::begin_* ──ticket──► StatsService::send ──reply──► Session::complete_*
//!        ▲                          (await)                        │
//!        └──────────── auto histogram ticket on new sample ────────┘
//! ```
//!
//! Every network call is an `.await` on the service; the session itself never
//! blocks. The orchestrator holds `&mut Session` for the whole call, so two
//! calls on one session cannot interleave. Overlapping requests are a
//! property of the sans-IO session API and are tested there.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fitcheck::{HttpStatsService, Orchestrator, ServiceConfig, Session};
//!
//! let orchestrator = Orchestrator::new(HttpStatsService::new(ServiceConfig::from_env()));
//! let mut session = Session::default();
//! let report = orchestrator.generate(&mut session).await?;
//! if report.sample_ready() {
//!     orchestrator.run_test(&mut session).await?;
//! }
//! ```

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::TestKind;
use crate::error::{ServiceError, SubmitError};
use crate::service::{ServiceInfo, StatsService};
use crate::session::{Completion, HistogramTicket, Session, Stage, StageFailure};

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// How one stage ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StageReport {
    Applied { stage: Stage },
    Failed { failure: StageFailure },
    Stale { stage: Stage },
}

impl StageReport {
    fn from_completion<T>(stage: Stage, completion: Completion<T>) -> Self {
        match completion {
            Completion::Applied(_) => StageReport::Applied { stage },
            Completion::Failed(failure) => StageReport::Failed { failure },
            Completion::Stale => StageReport::Stale { stage },
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            StageReport::Applied { stage } | StageReport::Stale { stage } => *stage,
            StageReport::Failed { failure } => failure.stage,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, StageReport::Applied { .. })
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        match self {
            StageReport::Failed { failure } => Some(failure),
            _ => None,
        }
    }
}

/// Outcome of [`Orchestrator::generate`]: the generate stage and, when a
/// new sample arrived, the histogram that followed it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineReport {
    pub generate: StageReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub histogram: Option<StageReport>,
}

impl PipelineReport {
    /// True when a new sample was stored.
    pub fn sample_ready(&self) -> bool {
        self.generate.is_applied()
    }

    /// True when both the sample and its histogram were stored.
    pub fn is_complete(&self) -> bool {
        self.sample_ready()
            && self
                .histogram
                .as_ref()
                .map(StageReport::is_applied)
                .unwrap_or(false)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Async driver for [`Session`] transitions.
pub struct Orchestrator<S> {
    service: S,
}

impl<S: StatsService> Orchestrator<S> {
    pub fn new(service: S) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    /// Generate a new sample, then fetch its histogram.
    ///
    /// A histogram failure does not undo the sample: the report carries the
    /// failure and the session rests in `Generated`.
    pub async fn generate(&self, session: &mut Session) -> Result<PipelineReport, SubmitError> {
        let ticket = session.begin_generate()?;
        debug!(
            request_id = ticket.request_id(),
            bytes = ticket.payload().to_json_string().len(),
            "sending generate payload"
        );
        let reply = self.service.send(ticket.payload()).await;

        match session.complete_generate(ticket, reply) {
            Completion::Applied(histogram_ticket) => {
                let histogram = self.finish_histogram(session, histogram_ticket).await;
                Ok(PipelineReport {
                    generate: StageReport::Applied {
                        stage: Stage::Generate,
                    },
                    histogram: Some(histogram),
                })
            }
            other => Ok(PipelineReport {
                generate: StageReport::from_completion(Stage::Generate, other),
                histogram: None,
            }),
        }
    }

    /// Re-request the histogram of the current sample.
    pub async fn histogram(&self, session: &mut Session) -> Result<StageReport, SubmitError> {
        let ticket = session.begin_histogram()?;
        Ok(self.finish_histogram(session, ticket).await)
    }

    async fn finish_histogram(&self, session: &mut Session, ticket: HistogramTicket) -> StageReport {
        debug!(
            request_id = ticket.request_id(),
            sample_version = ticket.sample_version(),
            "sending histogram payload"
        );
        let reply = self.service.send(ticket.payload()).await;
        let report = StageReport::from_completion(Stage::Histogram, session.complete_histogram(ticket, reply));
        if let Some(failure) = report.failure() {
            warn!(error = %failure.message, "histogram unavailable; sample kept");
        }
        report
    }

    /// Run the session's selected test against the current sample.
    pub async fn run_test(&self, session: &mut Session) -> Result<StageReport, SubmitError> {
        let ticket = session.begin_test()?;
        let stage = Stage::Test(ticket.kind());
        debug!(request_id = ticket.request_id(), test = %ticket.kind(), "sending test payload");
        let reply = self.service.send(ticket.payload()).await;
        Ok(StageReport::from_completion(stage, session.complete_test(ticket, reply)))
    }

    /// Run each of `kinds` in turn, then restore the selected test kind.
    ///
    /// Stops at the first submission error; stage failures do not stop the
    /// remaining tests.
    pub async fn run_tests(
        &self,
        session: &mut Session,
        kinds: &[TestKind],
    ) -> Result<Vec<StageReport>, SubmitError> {
        let selected = session.config().test_kind;
        let mut reports = Vec::with_capacity(kinds.len());
        let mut outcome = Ok(());

        for &kind in kinds {
            session.config_mut().test_kind = kind;
            match self.run_test(session).await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        session.config_mut().test_kind = selected;
        outcome.map(|()| reports)
    }

    /// Ask the service to describe itself (`GET /`).
    pub async fn probe(&self) -> Result<ServiceInfo, ServiceError> {
        match self.service.describe().await {
            Ok(info) => {
                info!(message = %info.message, endpoints = info.endpoints.len(), "service reachable");
                Ok(info)
            }
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "service probe failed");
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Configuration, Distribution};
    use crate::payload::Payload;
    use crate::service::Endpoint;
    use crate::session::{FailureKind, PipelineState};
    use serde_json::{json, Value};
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Replies in the order they are scripted and records every endpoint hit.
    #[derive(Default)]
    struct Scripted {
        replies: RefCell<VecDeque<Result<Value, ServiceError>>>,
        sent: RefCell<Vec<Endpoint>>,
    }

    impl Scripted {
        fn with(replies: Vec<Result<Value, ServiceError>>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
                sent: RefCell::new(Vec::new()),
            }
        }

        fn sent(&self) -> Vec<Endpoint> {
            self.sent.borrow().clone()
        }
    }

    impl StatsService for Scripted {
        async fn send(&self, payload: &Payload) -> Result<Value, ServiceError> {
            self.sent.borrow_mut().push(payload.endpoint);
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| panic!("unscripted request to {}", payload.endpoint))
        }

        async fn describe(&self) -> Result<ServiceInfo, ServiceError> {
            Ok(ServiceInfo {
                message: "stub".to_string(),
                endpoints: Default::default(),
            })
        }
    }

    fn session(n: i64) -> Session {
        Session::new(Configuration {
            sample_size: n,
            ..Default::default()
        })
    }

    fn sample(n: usize) -> Value {
        json!({ "random_numbers": vec![0.5; n] })
    }

    fn histogram(n: u64) -> Value {
        let mut rows: Vec<Value> = (0..9)
            .map(|i| json!({"interval": format!("b{i}"), "frequency": 0, "relative_frequency": 0.0}))
            .collect();
        rows.push(json!({"interval": "b9", "frequency": n, "relative_frequency": 1.0}));
        json!({ "frequency_table": rows })
    }

    fn refused() -> ServiceError {
        ServiceError::Transport {
            url: "http://localhost:5000/api/histogram".to_string(),
            detail: "connection refused".to_string(),
        }
    }

    #[tokio::test]
    async fn generate_runs_histogram_automatically() {
        let svc = Scripted::with(vec![Ok(sample(8)), Ok(histogram(8))]);
        let orc = Orchestrator::new(svc);
        let mut s = session(8);

        let report = orc.generate(&mut s).await.unwrap();
        assert!(report.is_complete());
        assert_eq!(orc.service().sent(), vec![Endpoint::Generate, Endpoint::Histogram]);
        assert_eq!(s.state(), PipelineState::HistogramReady);
        assert_eq!(s.histogram().unwrap().total_frequency(), 8);
    }

    #[tokio::test]
    async fn invalid_configuration_sends_nothing() {
        let orc = Orchestrator::new(Scripted::default());
        let mut s = Session::new(Configuration {
            distribution: Distribution::Exponential { lambda: -1.0 },
            ..Default::default()
        });
        let err = orc.generate(&mut s).await.unwrap_err();
        assert!(matches!(err, SubmitError::Invalid(_)));
        assert!(orc.service().sent().is_empty());
    }

    #[tokio::test]
    async fn generate_failure_skips_histogram() {
        let rejected = ServiceError::Rejected {
            status: 400,
            message: "Distribución no válida".to_string(),
        };
        let orc = Orchestrator::new(Scripted::with(vec![Err(rejected)]));
        let mut s = session(8);

        let report = orc.generate(&mut s).await.unwrap();
        assert!(!report.sample_ready());
        assert!(report.histogram.is_none());
        assert_eq!(report.generate.failure().unwrap().kind, FailureKind::Server);
        assert_eq!(orc.service().sent(), vec![Endpoint::Generate]);
        assert_eq!(s.state(), PipelineState::Idle);
    }

    #[tokio::test]
    async fn histogram_failure_keeps_sample() {
        let orc = Orchestrator::new(Scripted::with(vec![Ok(sample(8)), Err(refused())]));
        let mut s = session(8);

        let report = orc.generate(&mut s).await.unwrap();
        assert!(report.sample_ready());
        assert!(!report.is_complete());
        assert_eq!(report.histogram.as_ref().unwrap().stage(), Stage::Histogram);
        assert_eq!(s.state(), PipelineState::Generated);
        assert_eq!(s.sample().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn histogram_retry_after_failure() {
        let orc = Orchestrator::new(Scripted::with(vec![
            Ok(sample(8)),
            Err(refused()),
            Ok(histogram(8)),
        ]));
        let mut s = session(8);
        orc.generate(&mut s).await.unwrap();

        let retry = orc.histogram(&mut s).await.unwrap();
        assert!(retry.is_applied());
        assert_eq!(s.state(), PipelineState::HistogramReady);
    }

    #[tokio::test]
    async fn run_test_stores_result() {
        let chi = json!({
            "test_type": "Chi-cuadrado",
            "chi_square_stat": 7.1,
            "critical_value": 16.92,
            "p_value": 0.62,
            "decision": "No se rechaza H0",
            "conclusion": "No se rechaza H0",
        });
        let orc = Orchestrator::new(Scripted::with(vec![Ok(sample(8)), Ok(histogram(8)), Ok(chi)]));
        let mut s = session(8);
        orc.generate(&mut s).await.unwrap();

        let report = orc.run_test(&mut s).await.unwrap();
        assert_eq!(report, StageReport::Applied { stage: Stage::Test(TestKind::ChiSquare) });
        let result = s.current_test_result().unwrap();
        assert!(result.decision.is_accept());
        assert_eq!(result.test_type.as_deref(), Some("Chi-cuadrado"));
    }

    #[tokio::test]
    async fn run_test_without_sample_is_refused() {
        let orc = Orchestrator::new(Scripted::default());
        let mut s = session(8);
        let err = orc.run_test(&mut s).await.unwrap_err();
        assert_eq!(err, SubmitError::NoSample(Stage::Test(TestKind::ChiSquare)));
    }

    #[tokio::test]
    async fn run_tests_covers_each_kind_and_restores_selection() {
        let chi = json!({"chi_square_stat": 3.0, "critical_value": 16.9, "p_value": 0.9, "conclusion": "No se rechaza H0"});
        let ks = json!({"ks_stat": 0.6, "critical_value": 0.41, "p_value": 0.001, "conclusion": "Se rechaza H0"});
        let orc = Orchestrator::new(Scripted::with(vec![
            Ok(sample(8)),
            Ok(histogram(8)),
            Ok(chi),
            Ok(ks),
        ]));
        let mut s = session(8);
        orc.generate(&mut s).await.unwrap();

        let reports = orc.run_tests(&mut s, &TestKind::ALL).await.unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(StageReport::is_applied));
        assert_eq!(s.config().test_kind, TestKind::ChiSquare);
        assert!(!s.test_result(TestKind::Ks).unwrap().decision.is_accept());
        assert_eq!(
            &orc.service().sent()[2..],
            &[Endpoint::ChiSquareTest, Endpoint::KsTest]
        );
    }

    #[tokio::test]
    async fn malformed_test_reply_is_reported() {
        let no_p = json!({"chi_square_stat": 3.0, "critical_value": 16.9, "conclusion": "No se rechaza H0"});
        let orc = Orchestrator::new(Scripted::with(vec![Ok(sample(8)), Ok(histogram(8)), Ok(no_p)]));
        let mut s = session(8);
        orc.generate(&mut s).await.unwrap();

        let report = orc.run_test(&mut s).await.unwrap();
        let failure = report.failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Malformed);
        assert!(failure.message.contains("p_value"));
        assert!(s.current_test_result().is_none());
    }

    #[tokio::test]
    async fn probe_returns_banner() {
        let orc = Orchestrator::new(Scripted::default());
        assert_eq!(orc.probe().await.unwrap().message, "stub");
    }

    #[test]
    fn stage_report_serializes_with_outcome_tag() {
        let report = StageReport::Applied { stage: Stage::Generate };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "applied");
        assert_eq!(json["stage"], "generate");
    }
}
