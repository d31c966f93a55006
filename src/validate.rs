//! Pre-flight validation of a [`Configuration`].

use crate::config::{Configuration, Distribution, MAX_SAMPLE_SIZE};
use crate::error::{ValidationReport, Violation};

/// Check every rule and collect all violations.
///
/// Rules are independent: a configuration with a non-positive sample size and
/// a non-positive lambda reports both. Parameter checks are written so that
/// NaN fails them. Every active parameter must also be finite, since JSON has
/// no encoding for NaN or infinity.
#[allow(clippy::neg_cmp_op_on_partial_ord)]
pub fn validate(config: &Configuration) -> Result<(), ValidationReport> {
    let mut violations = Vec::new();

    if config.sample_size <= 0 {
        violations.push(Violation::SampleSizeNonPositive);
    }
    if config.sample_size > MAX_SAMPLE_SIZE {
        violations.push(Violation::SampleSizeTooLarge);
    }

    match config.distribution {
        Distribution::Uniform { a, b } => {
            if !(a < b) {
                violations.push(Violation::UniformBoundsInvalid);
            }
        }
        Distribution::Exponential { lambda } => {
            if !(lambda > 0.0) {
                violations.push(Violation::LambdaNonPositive);
            }
        }
        Distribution::Normal { std_dev, .. } => {
            if !(std_dev > 0.0) {
                violations.push(Violation::StdDevNonPositive);
            }
        }
    }

    if !config.distribution.params().iter().all(|(_, v)| v.is_finite()) {
        violations.push(Violation::ParameterNotFinite);
    }

    match ValidationReport::new(violations) {
        Some(report) => Err(report),
        None => Ok(()),
    }
}
