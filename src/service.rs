//! The statistics service boundary.
//!
//! [`StatsService`] is the seam the orchestrator talks through;
//! [`HttpStatsService`] is the reqwest implementation. Bodies are returned as
//! raw `serde_json::Value`s and interpreted by the session, so every
//! implementation gets the same malformed-response handling.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::{ServiceConfig, TestKind};
use crate::error::{InterpretError, ServiceError};
use crate::payload::Payload;
use crate::session::Stage;

/// Routes exposed by the statistics service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Endpoint {
    Index,
    Generate,
    Histogram,
    ChiSquareTest,
    KsTest,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Index => "/",
            Endpoint::Generate => "/api/generate",
            Endpoint::Histogram => "/api/histogram",
            Endpoint::ChiSquareTest => "/api/chi-square-test",
            Endpoint::KsTest => "/api/ks-test",
        }
    }

    /// Pipeline stage served by this endpoint. `None` for the index.
    pub fn stage(self) -> Option<Stage> {
        match self {
            Endpoint::Index => None,
            Endpoint::Generate => Some(Stage::Generate),
            Endpoint::Histogram => Some(Stage::Histogram),
            Endpoint::ChiSquareTest => Some(Stage::Test(TestKind::ChiSquare)),
            Endpoint::KsTest => Some(Stage::Test(TestKind::Ks)),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

/// Body of `GET /`: a banner and the routes the service offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub message: String,
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Anything that can answer the pipeline's requests.
///
/// Implementations only move bytes: they report transport failures and
/// non-2xx replies, and hand successful JSON bodies back untouched.
#[allow(async_fn_in_trait)]
pub trait StatsService {
    /// Post `payload.body` to `payload.endpoint` and return the JSON reply.
    async fn send(&self, payload: &Payload) -> Result<Value, ServiceError>;

    /// Fetch the service banner.
    async fn describe(&self) -> Result<ServiceInfo, ServiceError>;
}

/// Turn a raw HTTP reply into the body or the stage's error.
///
/// - 2xx with JSON → `Ok(body)`.
/// - 2xx without JSON → `Err(ServiceError::Malformed)`.
/// - non-2xx → `Err(ServiceError::Rejected)` carrying the body's `error`
///   string verbatim, or `HTTP <status>` when there is none.
pub fn decode_reply(stage: Stage, status: u16, body: &[u8]) -> Result<Value, ServiceError> {
    if (200..300).contains(&status) {
        return serde_json::from_slice::<Value>(body).map_err(|e| {
            InterpretError::malformed(stage, format!("body is not JSON: {e}")).into()
        });
    }

    let message = serde_json::from_slice::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_else(|| format!("HTTP {status}"));
    Err(ServiceError::Rejected { status, message })
}

/// reqwest-backed [`StatsService`].
pub struct HttpStatsService {
    config: ServiceConfig,
    client: reqwest::Client,
}

impl HttpStatsService {
    pub fn new(config: ServiceConfig) -> Self {
        let mut builder = reqwest::Client::builder().connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        // Builder failure only happens when the TLS backend cannot initialise;
        // fall back to a default client instead of panicking.
        let client = builder.build().unwrap_or_default();
        Self { config, client }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn transport_error(url: &str, e: reqwest::Error) -> ServiceError {
        ServiceError::Transport {
            url: url.to_string(),
            detail: e.to_string(),
        }
    }
}

impl StatsService for HttpStatsService {
    async fn send(&self, payload: &Payload) -> Result<Value, ServiceError> {
        let url = self.config.url(payload.endpoint);
        // The index is not a pipeline stage; report it against generate.
        let stage = payload.endpoint.stage().unwrap_or(Stage::Generate);
        debug!(url = %url, stage = %stage, "posting request");

        let resp = self
            .client
            .post(&url)
            .json(&payload.body)
            .send()
            .await
            .map_err(|e| Self::transport_error(&url, e))?;

        let status = resp.status().as_u16();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Self::transport_error(&url, e))?;
        debug!(url = %url, status, bytes = bytes.len(), "reply received");

        decode_reply(stage, status, &bytes)
    }

    async fn describe(&self) -> Result<ServiceInfo, ServiceError> {
        let url = self.config.url(Endpoint::Index);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Self::transport_error(&url, e))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            return Err(ServiceError::Rejected {
                status,
                message: format!("HTTP {status} from {url}"),
            });
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Self::transport_error(&url, e))?;
        serde_json::from_slice::<ServiceInfo>(&bytes).map_err(|e| ServiceError::Rejected {
            status,
            message: format!("unexpected banner from {url}: {e}"),
        })
    }
}
