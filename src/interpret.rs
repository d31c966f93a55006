//! Normalize raw service replies into typed records.
//!
//! Each stage has its own reply shape. The two test endpoints even name their
//! statistic differently (`chi_square_stat` vs `ks_stat`). Everything here is
//! pure: interpreting the same reply twice yields the same record, and a
//! reply that is missing a required field or breaks an invariant is rejected
//! whole with [`InterpretError::MalformedResponse`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{NumBins, TestKind};
use crate::error::InterpretError;
use crate::session::Stage;

/// Conclusion text the service uses when H0 is not rejected.
pub const DO_NOT_REJECT: &str = "No se rechaza H0";

/// Decision text the service uses when H0 is rejected.
pub const REJECT: &str = "Se rechaza H0";

/// Allowed drift of the relative frequencies' sum from 1.
pub const RELATIVE_FREQUENCY_TOLERANCE: f64 = 1e-6;

// ---------------------------------------------------------------------------
// Test results
// ---------------------------------------------------------------------------

/// Outcome of a goodness-of-fit test for H0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// H0 is not rejected.
    Accept,
    Reject,
}

impl Decision {
    /// Recognise an explicit decision value sent by the service.
    pub fn from_service(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw == DO_NOT_REJECT
            || ["accept", "do_not_reject", "fail_to_reject"]
                .iter()
                .any(|v| raw.eq_ignore_ascii_case(v))
        {
            Some(Decision::Accept)
        } else if raw == REJECT || raw.eq_ignore_ascii_case("reject") {
            Some(Decision::Reject)
        } else {
            None
        }
    }

    /// Fallback: H0 stands only when the conclusion is exactly [`DO_NOT_REJECT`].
    pub fn from_conclusion(conclusion: &str) -> Self {
        if conclusion.trim() == DO_NOT_REJECT {
            Decision::Accept
        } else {
            Decision::Reject
        }
    }

    pub fn is_accept(self) -> bool {
        self == Decision::Accept
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::Accept => write!(f, "do not reject H0"),
            Decision::Reject => write!(f, "reject H0"),
        }
    }
}

/// A test result with the kind-specific statistic field folded into `statistic`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestResult {
    pub kind: TestKind,
    pub statistic: f64,
    pub critical_value: f64,
    pub p_value: f64,
    pub decision: Decision,
    pub conclusion: String,
    /// The service's own label for the test, when it sends one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTestReply {
    chi_square_stat: Option<f64>,
    ks_stat: Option<f64>,
    critical_value: Option<f64>,
    p_value: Option<f64>,
    decision: Option<String>,
    conclusion: Option<String>,
    test_type: Option<String>,
}

fn required<T>(stage: Stage, field: &str, value: Option<T>) -> Result<T, InterpretError> {
    value.ok_or_else(|| InterpretError::malformed(stage, format!("missing field `{field}`")))
}

/// Interpret a raw chi-square or KS reply.
///
/// The decision comes from the reply's `decision` field when it holds a
/// recognised value, otherwise from comparing `conclusion` with
/// [`DO_NOT_REJECT`].
pub fn interpret(raw: &Value, kind: TestKind) -> Result<TestResult, InterpretError> {
    let stage = Stage::Test(kind);
    let reply = RawTestReply::deserialize(raw)
        .map_err(|e| InterpretError::malformed(stage, e.to_string()))?;

    let statistic = match kind {
        TestKind::ChiSquare => reply.chi_square_stat,
        TestKind::Ks => reply.ks_stat,
    };
    let statistic = required(stage, kind.statistic_field(), statistic)?;
    let critical_value = required(stage, "critical_value", reply.critical_value)?;
    let p_value = required(stage, "p_value", reply.p_value)?;
    let conclusion = required(stage, "conclusion", reply.conclusion)?;

    if !(0.0..=1.0).contains(&p_value) {
        return Err(InterpretError::malformed(
            stage,
            format!("p_value {p_value} outside [0, 1]"),
        ));
    }

    let decision = reply
        .decision
        .as_deref()
        .and_then(Decision::from_service)
        .unwrap_or_else(|| Decision::from_conclusion(&conclusion));

    Ok(TestResult {
        kind,
        statistic,
        critical_value,
        p_value,
        decision,
        conclusion,
        test_type: reply.test_type,
    })
}

// ---------------------------------------------------------------------------
// Samples
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawGenerateReply {
    random_numbers: Option<Vec<f64>>,
}

/// Extract the generated sample, which must hold exactly `expected_len` values.
pub fn parse_sample(raw: &Value, expected_len: usize) -> Result<Vec<f64>, InterpretError> {
    let stage = Stage::Generate;
    let reply = RawGenerateReply::deserialize(raw)
        .map_err(|e| InterpretError::malformed(stage, e.to_string()))?;
    let values = required(stage, "random_numbers", reply.random_numbers)?;

    if values.len() != expected_len {
        return Err(InterpretError::malformed(
            stage,
            format!("expected {expected_len} values, got {}", values.len()),
        ));
    }
    Ok(values)
}

// ---------------------------------------------------------------------------
// Histograms
// ---------------------------------------------------------------------------

/// One row of the frequency table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    /// Display label, e.g. `[0.1000, 0.2000)`.
    pub interval: String,
    pub frequency: u64,
    pub relative_frequency: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower_bound: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper_bound: Option<f64>,
}

/// Frequency table derived from one sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramTable {
    pub bins: Vec<HistogramBin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bin_edges: Option<Vec<f64>>,
}

impl HistogramTable {
    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Sum of all bin frequencies, saturating at `u64::MAX`.
    pub fn total_frequency(&self) -> u64 {
        self.checked_total_frequency().unwrap_or(u64::MAX)
    }

    /// Sum of all bin frequencies, `None` on overflow.
    pub fn checked_total_frequency(&self) -> Option<u64> {
        self.bins
            .iter()
            .try_fold(0u64, |acc, b| acc.checked_add(b.frequency))
    }

    pub fn max_frequency(&self) -> u64 {
        self.bins.iter().map(|b| b.frequency).max().unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
struct RawHistogramReply {
    frequency_table: Option<Vec<HistogramBin>>,
    bin_edges: Option<Vec<f64>>,
}

/// Extract and check the frequency table for a sample of `sample_len` values.
///
/// The table must have `num_bins` rows whose frequencies sum to `sample_len`
/// and whose relative frequencies lie in [0, 1] and sum to 1.
pub fn parse_histogram(
    raw: &Value,
    sample_len: usize,
    num_bins: NumBins,
) -> Result<HistogramTable, InterpretError> {
    let stage = Stage::Histogram;
    let reply = RawHistogramReply::deserialize(raw)
        .map_err(|e| InterpretError::malformed(stage, e.to_string()))?;
    let bins = required(stage, "frequency_table", reply.frequency_table)?;
    let table = HistogramTable {
        bins,
        bin_edges: reply.bin_edges,
    };

    if table.len() != num_bins.get() as usize {
        return Err(InterpretError::malformed(
            stage,
            format!("expected {num_bins} bins, got {}", table.len()),
        ));
    }

    let total = table
        .checked_total_frequency()
        .ok_or_else(|| InterpretError::malformed(stage, "frequency sum overflows"))?;
    if total != sample_len as u64 {
        return Err(InterpretError::malformed(
            stage,
            format!("frequencies sum to {total}, sample has {sample_len} values"),
        ));
    }

    if let Some(bin) = table
        .bins
        .iter()
        .find(|b| !(0.0..=1.0).contains(&b.relative_frequency))
    {
        return Err(InterpretError::malformed(
            stage,
            format!(
                "relative frequency {} of {} outside [0, 1]",
                bin.relative_frequency, bin.interval
            ),
        ));
    }

    let relative_sum: f64 = table.bins.iter().map(|b| b.relative_frequency).sum();
    if (relative_sum - 1.0).abs() > RELATIVE_FREQUENCY_TOLERANCE {
        return Err(InterpretError::malformed(
            stage,
            format!("relative frequencies sum to {relative_sum}"),
        ));
    }

    Ok(table)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
