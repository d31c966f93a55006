use clap::Parser;
use colored::*;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fitcheck::cli::{self, Args};
use fitcheck::config::Settings;
use fitcheck::error::SubmitError;
use fitcheck::orchestrator::Orchestrator;
use fitcheck::report::{self, SessionSummary};
use fitcheck::service::HttpStatsService;
use fitcheck::session::Session;

/// Logs go to stderr so `--json` output stays clean. `--verbose` wins over
/// `RUST_LOG`.
fn setup_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("fitcheck=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fitcheck=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    setup_logging(args.verbose);

    let settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    let service_config = cli::resolve_service_config(&args, &settings.service);
    info!(url = %service_config.base_url, "using statistics service");
    let orchestrator = Orchestrator::new(HttpStatsService::new(service_config));

    if args.probe {
        let info = orchestrator.probe().await?;
        if args.json {
            println!("{}", serde_json::to_string_pretty(&info)?);
        } else {
            println!("{} {}", "service".bright_cyan().bold(), info.message);
            for (path, description) in &info.endpoints {
                println!("  {path:<24} {description}");
            }
        }
        return Ok(());
    }

    let config = cli::resolve_configuration(&args, settings.experiment.as_ref())?;
    let kinds = cli::tests_to_run(&args, &config);
    let mut session = Session::new(config);

    match orchestrator.generate(&mut session).await {
        Ok(pipeline) if pipeline.sample_ready() && !kinds.is_empty() => {
            if let Err(e) = orchestrator.run_tests(&mut session, &kinds).await {
                error!(error = %e, "test not submitted");
            }
        }
        Ok(_) => {}
        // Validation failures are already surfaced on the session.
        Err(SubmitError::Invalid(_)) => {}
        Err(e) => return Err(e.into()),
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&SessionSummary::from(&session))?);
    } else {
        print!("{}", report::render(&session));
    }

    if session.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}
