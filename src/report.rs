//! Terminal and JSON rendering of a [`Session`].

use std::fmt::Write as _;

use colored::*;
use serde::Serialize;

use crate::config::Configuration;
use crate::interpret::{Decision, HistogramTable, TestResult};
use crate::session::{PipelineState, Session, StageFailure};

/// Widest histogram bar, in characters.
const BAR_WIDTH: usize = 40;

/// Descriptive statistics of the held sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleSummary {
    pub version: u64,
    pub len: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl SampleSummary {
    pub fn of(version: u64, values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        Some(Self {
            version,
            len: values.len(),
            min,
            max,
            mean,
        })
    }
}

/// Everything `--json` prints.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub configuration: Configuration,
    pub state: PipelineState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<SampleSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub histogram: Option<HistogramTable>,
    pub test_results: Vec<TestResult>,
    pub errors: Vec<StageFailure>,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            configuration: session.config().clone(),
            state: session.state(),
            sample: session
                .sample()
                .and_then(|s| SampleSummary::of(s.version(), s.values())),
            histogram: session.histogram().cloned(),
            test_results: session.test_results().cloned().collect(),
            errors: session.errors().cloned().collect(),
        }
    }
}

fn bar(frequency: u64, max: u64) -> String {
    if max == 0 {
        return String::new();
    }
    let width = (frequency as f64 / max as f64 * BAR_WIDTH as f64).round() as usize;
    "█".repeat(width)
}

fn render_histogram(out: &mut String, table: &HistogramTable) {
    let max = table.max_frequency();
    let label_width = table.bins.iter().map(|b| b.interval.len()).max().unwrap_or(0);
    for bin in &table.bins {
        let _ = writeln!(
            out,
            "  {:<label_width$}  {:>7}  {:>6.4}  {}",
            bin.interval,
            bin.frequency,
            bin.relative_frequency,
            bar(bin.frequency, max).bright_blue(),
        );
    }
}

fn render_test(out: &mut String, result: &TestResult) {
    let verdict = match result.decision {
        Decision::Accept => result.decision.to_string().bright_green().bold(),
        Decision::Reject => result.decision.to_string().bright_red().bold(),
    };
    let _ = writeln!(out, "{}", result.kind.label().bold());
    let _ = writeln!(out, "  statistic       {:.6}", result.statistic);
    let _ = writeln!(out, "  critical value  {:.6}", result.critical_value);
    let _ = writeln!(out, "  p-value         {:.6}", result.p_value);
    let _ = writeln!(out, "  decision        {verdict}");
    let _ = writeln!(out, "  conclusion      {}", result.conclusion);
}

/// Human-readable report of the session's artifacts and errors.
pub fn render(session: &Session) -> String {
    let mut out = String::new();
    let config = session.config();

    let _ = writeln!(
        out,
        "{} {}  n={}  bins={}",
        "distribution".bright_cyan().bold(),
        config.distribution,
        config.sample_size,
        config.num_bins,
    );

    if let Some(summary) = session
        .sample()
        .and_then(|s| SampleSummary::of(s.version(), s.values()))
    {
        let _ = writeln!(
            out,
            "{} {} values  min={:.4}  max={:.4}  mean={:.4}",
            "sample".bright_cyan().bold(),
            summary.len,
            summary.min,
            summary.max,
            summary.mean,
        );
    }

    if let Some(table) = session.histogram() {
        let _ = writeln!(out, "{}", "histogram".bright_cyan().bold());
        render_histogram(&mut out, table);
    }

    for result in session.test_results() {
        render_test(&mut out, result);
    }

    for failure in session.errors() {
        let _ = writeln!(out, "{} {}", "error".bright_red().bold(), failure);
    }

    out
}
