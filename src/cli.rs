use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::{
    Configuration, Distribution, DistributionKind, NumBins, ServiceConfig, ServiceSettings, TestKind,
};
use crate::error::ConfigError;

#[derive(Parser, Debug)]
#[command(name = "fitcheck")]
#[command(version)]
#[command(about = "Sample a distribution, bin the sample and test its goodness of fit against a statistics service")]
pub struct Args {
    /// Distribution to sample (uniform, exponential, normal)
    #[arg(long, short, value_enum)]
    pub distribution: Option<DistributionKind>,

    /// Uniform lower bound
    #[arg(long, allow_negative_numbers = true)]
    pub a: Option<f64>,

    /// Uniform upper bound
    #[arg(long, allow_negative_numbers = true)]
    pub b: Option<f64>,

    /// Exponential rate
    #[arg(long, allow_negative_numbers = true)]
    pub lambda: Option<f64>,

    /// Normal mean
    #[arg(long, allow_negative_numbers = true)]
    pub mean: Option<f64>,

    /// Normal standard deviation
    #[arg(long, allow_negative_numbers = true)]
    pub std_dev: Option<f64>,

    /// Number of values to draw (1 to 1000000)
    #[arg(long, short = 'n', allow_negative_numbers = true)]
    pub sample_size: Option<i64>,

    /// Histogram bins: 10, 15, 20 or 25
    #[arg(long)]
    pub bins: Option<NumBins>,

    /// Goodness-of-fit test to run after the histogram
    #[arg(long, short, value_enum)]
    pub test: Option<TestKind>,

    /// Run both the chi-square and the KS test
    #[arg(long, conflicts_with_all = ["test", "skip_test"])]
    pub both_tests: bool,

    /// Stop after the histogram
    #[arg(long)]
    pub skip_test: bool,

    /// Base URL of the statistics service (overrides $FITCHECK_API_URL)
    #[arg(long)]
    pub api_url: Option<String>,

    /// Whole-request timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// TOML settings file with [service] and [experiment] tables
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print the session summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Only check that the service is reachable
    #[arg(long)]
    pub probe: bool,

    /// Debug-level logging
    #[arg(long, short)]
    pub verbose: bool,
}

fn misplaced(flag: &str, distribution: &Distribution) -> ConfigError {
    ConfigError::InvalidValue(format!(
        "--{flag} does not apply to the {} distribution",
        distribution.name()
    ))
}

/// Build the experiment from the settings file's `[experiment]` table (if
/// any) with command-line flags applied on top.
///
/// Parameter flags must belong to the selected distribution. Values are not
/// validated here; the session does that at submit time.
pub fn resolve_configuration(
    args: &Args,
    base: Option<&Configuration>,
) -> Result<Configuration, ConfigError> {
    let mut config = base.cloned().unwrap_or_default();
    if let Some(kind) = args.distribution {
        config.select_distribution(kind);
    }

    let d = config.distribution;
    let given = [
        ("a", args.a),
        ("b", args.b),
        ("lambda", args.lambda),
        ("mean", args.mean),
        ("std-dev", args.std_dev),
    ];
    let accepted: &[&str] = match d {
        Distribution::Uniform { .. } => &["a", "b"],
        Distribution::Exponential { .. } => &["lambda"],
        Distribution::Normal { .. } => &["mean", "std-dev"],
    };
    if let Some((flag, _)) = given
        .iter()
        .find(|(flag, value)| value.is_some() && !accepted.contains(flag))
    {
        return Err(misplaced(flag, &d));
    }

    config.distribution = match d {
        Distribution::Uniform { a, b } => Distribution::Uniform {
            a: args.a.unwrap_or(a),
            b: args.b.unwrap_or(b),
        },
        Distribution::Exponential { lambda } => Distribution::Exponential {
            lambda: args.lambda.unwrap_or(lambda),
        },
        Distribution::Normal { mean, std_dev } => Distribution::Normal {
            mean: args.mean.unwrap_or(mean),
            std_dev: args.std_dev.unwrap_or(std_dev),
        },
    };

    if let Some(n) = args.sample_size {
        config.sample_size = n;
    }
    if let Some(bins) = args.bins {
        config.num_bins = bins;
    }
    if let Some(kind) = args.test {
        config.test_kind = kind;
    }
    Ok(config)
}

/// Service location: flags, then the settings file, then
/// `$FITCHECK_API_URL`, then the default.
pub fn resolve_service_config(args: &Args, settings: &ServiceSettings) -> ServiceConfig {
    let mut config = ServiceConfig::from_env().with_settings(settings);
    if let Some(url) = &args.api_url {
        config.base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(secs) = args.timeout {
        config = config.request_timeout(Duration::from_secs(secs));
    }
    config
}

/// Tests to run once the histogram is in.
pub fn tests_to_run(args: &Args, config: &Configuration) -> Vec<TestKind> {
    if args.skip_test {
        Vec::new()
    } else if args.both_tests {
        TestKind::ALL.to_vec()
    } else {
        vec![config.test_kind]
    }
}
