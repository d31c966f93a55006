//! Request bodies for each pipeline stage.
//!
//! All builders are pure: the same inputs always produce the same JSON, and
//! the field names never depend on which step triggered the build.
//! `serde_json::Value` objects keep their keys sorted, so serializing a
//! payload is byte-for-byte reproducible.

use serde_json::{json, Map, Value};

use crate::config::{Configuration, Distribution, NumBins, TestKind};
use crate::service::Endpoint;

/// A body together with the endpoint it must be posted to.
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub endpoint: Endpoint,
    pub body: Value,
}

impl Payload {
    /// Compact JSON text of the body.
    pub fn to_json_string(&self) -> String {
        self.body.to_string()
    }
}

fn insert_params(body: &mut Map<String, Value>, distribution: &Distribution) {
    body.insert("distribution".to_string(), json!(distribution.name()));
    for (name, value) in distribution.params() {
        body.insert(name.to_string(), json!(value));
    }
}

/// `{distribution, sample_size, <params>}` for `POST /api/generate`.
pub fn build_generate_payload(config: &Configuration) -> Payload {
    let mut body = Map::new();
    insert_params(&mut body, &config.distribution);
    body.insert("sample_size".to_string(), json!(config.sample_size));
    Payload {
        endpoint: Endpoint::Generate,
        body: Value::Object(body),
    }
}

/// `{random_numbers, num_bins}` for `POST /api/histogram`.
pub fn build_histogram_payload(sample: &[f64], num_bins: NumBins) -> Payload {
    Payload {
        endpoint: Endpoint::Histogram,
        body: json!({
            "random_numbers": sample,
            "num_bins": num_bins.get(),
        }),
    }
}

/// `{random_numbers, distribution, num_bins, <params>}` for either test.
///
/// The body is the same for both kinds; `kind` only selects the endpoint.
pub fn build_test_payload(sample: &[f64], config: &Configuration, kind: TestKind) -> Payload {
    let mut body = Map::new();
    body.insert("random_numbers".to_string(), json!(sample));
    insert_params(&mut body, &config.distribution);
    body.insert("num_bins".to_string(), json!(config.num_bins.get()));
    Payload {
        endpoint: kind.endpoint(),
        body: Value::Object(body),
    }
}
