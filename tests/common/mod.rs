//! In-memory statistics service for pipeline tests.
//!
//! Draws real samples with a seeded RNG and bins them the way the HTTP
//! service does, so the session's histogram checks run against honest data.
//! Individual replies can be scripted per endpoint to inject failures.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};

use fitcheck::{Endpoint, Payload, ServiceError, ServiceInfo, StatsService};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};

pub const DO_NOT_REJECT: &str = "No se rechaza H0";
pub const REJECT: &str = "Se rechaza H0";

pub struct FakeStatsService {
    rng: RefCell<StdRng>,
    scripted: RefCell<HashMap<Endpoint, VecDeque<Result<Value, ServiceError>>>>,
    calls: RefCell<Vec<Endpoint>>,
    p_value: f64,
}

impl FakeStatsService {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
            scripted: RefCell::new(HashMap::new()),
            calls: RefCell::new(Vec::new()),
            p_value: 0.42,
        }
    }

    /// p-value reported by both tests.
    pub fn with_p_value(mut self, p_value: f64) -> Self {
        self.p_value = p_value;
        self
    }

    /// Answer the next request to `endpoint` with `reply` instead of computing one.
    pub fn respond_next(&self, endpoint: Endpoint, reply: Result<Value, ServiceError>) {
        self.scripted
            .borrow_mut()
            .entry(endpoint)
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self) -> Vec<Endpoint> {
        self.calls.borrow().clone()
    }

    fn generate(&self, body: &Value) -> Value {
        let n = body["sample_size"].as_u64().unwrap() as usize;
        let mut rng = self.rng.borrow_mut();
        let values: Vec<f64> = match body["distribution"].as_str().unwrap() {
            "uniform" => {
                let (a, b) = (body["a"].as_f64().unwrap(), body["b"].as_f64().unwrap());
                (0..n).map(|_| rng.gen_range(a..b)).collect()
            }
            "exponential" => {
                let lambda = body["lambda"].as_f64().unwrap();
                (0..n)
                    .map(|_| -(1.0 - rng.gen::<f64>()).ln() / lambda)
                    .collect()
            }
            "normal" => {
                let (mean, sd) = (body["mean"].as_f64().unwrap(), body["std_dev"].as_f64().unwrap());
                (0..n)
                    .map(|_| {
                        let u1: f64 = 1.0 - rng.gen::<f64>();
                        let u2: f64 = rng.gen();
                        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
                        mean + sd * z
                    })
                    .collect()
            }
            other => panic!("unexpected distribution {other}"),
        };
        json!({
            "random_numbers": values,
            "sample_size": n,
            "distribution": body["distribution"],
        })
    }

    fn histogram(&self, body: &Value) -> Value {
        let values: Vec<f64> = serde_json::from_value(body["random_numbers"].clone()).unwrap();
        let k = body["num_bins"].as_u64().unwrap() as usize;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let width = if max > min { (max - min) / k as f64 } else { 1.0 };

        let mut counts = vec![0u64; k];
        for v in &values {
            let idx = (((v - min) / width) as usize).min(k - 1);
            counts[idx] += 1;
        }

        let n = values.len() as f64;
        let edges: Vec<f64> = (0..=k).map(|i| min + i as f64 * width).collect();
        let table: Vec<Value> = counts
            .iter()
            .enumerate()
            .map(|(i, &f)| {
                json!({
                    "interval": format!("[{:.4}, {:.4})", edges[i], edges[i + 1]),
                    "frequency": f,
                    "relative_frequency": f as f64 / n,
                    "lower_bound": edges[i],
                    "upper_bound": edges[i + 1],
                })
            })
            .collect();
        json!({
            "frequency_table": table,
            "bin_edges": edges,
            "frequencies": counts,
            "sample_size": values.len(),
        })
    }

    fn test(&self, statistic_field: &str, test_type: &str, critical_value: f64) -> Value {
        let verdict = if self.p_value > 0.05 { DO_NOT_REJECT } else { REJECT };
        json!({
            "test_type": test_type,
            statistic_field: 1.234,
            "critical_value": critical_value,
            "p_value": self.p_value,
            "decision": verdict,
            "conclusion": verdict,
        })
    }
}

impl StatsService for FakeStatsService {
    async fn send(&self, payload: &Payload) -> Result<Value, ServiceError> {
        self.calls.borrow_mut().push(payload.endpoint);
        if let Some(reply) = self
            .scripted
            .borrow_mut()
            .get_mut(&payload.endpoint)
            .and_then(VecDeque::pop_front)
        {
            return reply;
        }

        let body = &payload.body;
        match payload.endpoint {
            Endpoint::Generate => Ok(self.generate(body)),
            Endpoint::Histogram => Ok(self.histogram(body)),
            Endpoint::ChiSquareTest => Ok(self.test("chi_square_stat", "Chi-cuadrado", 16.919)),
            Endpoint::KsTest => Ok(self.test("ks_stat", "Kolmogorov-Smirnov", 0.043)),
            Endpoint::Index => Err(ServiceError::Rejected {
                status: 405,
                message: "HTTP 405".to_string(),
            }),
        }
    }

    async fn describe(&self) -> Result<ServiceInfo, ServiceError> {
        Ok(ServiceInfo {
            message: "API de Simulación de Variables Aleatorias".to_string(),
            endpoints: [
                ("/api/generate", "POST - Genera números aleatorios"),
                ("/api/histogram", "POST - Genera histograma"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        })
    }
}

pub fn transport_error(endpoint: Endpoint) -> ServiceError {
    ServiceError::Transport {
        url: format!("http://localhost:5000{}", endpoint.path()),
        detail: "connection refused".to_string(),
    }
}
