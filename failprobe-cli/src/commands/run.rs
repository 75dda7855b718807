//! `failprobe run`

use crate::settings;
use anyhow::{Context, Result};
use failprobe_config::FailprobeConfig;
use failprobe_core::{ClusterEventSource, RunResult};
use failprobe_engine::RetryOrchestrator;
use failprobe_mongodb::MongoTopologyMonitor;
use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// A state change was provoked and captured
pub const EXIT_MATCHED: u8 = 0;
/// Every attempt ran out without a match
pub const EXIT_NO_MATCH: u8 = 1;
/// The run could not be carried out
pub const EXIT_FATAL: u8 = 2;
/// Stopped with Ctrl-C
pub const EXIT_INTERRUPTED: u8 = 130;

/// Run the orchestrator against the configured target and cluster
pub async fn run_command(config: &FailprobeConfig, report: Option<&Path>) -> Result<ExitCode> {
    let run_config = settings::run_config(config)?;
    let monitor_settings = settings::monitor_settings(&config.cluster)?;
    let invoker = settings::build_invoker(config);

    let monitor = MongoTopologyMonitor::connect(monitor_settings)
        .await
        .context("Failed to set up the cluster connection")?;
    let source: Arc<dyn ClusterEventSource> = Arc::new(monitor);

    let orchestrator = RetryOrchestrator::new(run_config, source.clone(), invoker);
    let outcome = tokio::select! {
        outcome = orchestrator.run() => Some(outcome),
        _ = signal::ctrl_c() => None,
    };

    // The orchestrator never closes the source it was given
    source.close().await;

    let code = match outcome {
        Some(Ok(result)) => {
            write_report(&result, report)?;
            if result.is_match() {
                info!(
                    "State change captured after {} attempt(s) in {:?}",
                    result.attempts.len(),
                    result.total_duration
                );
                EXIT_MATCHED
            } else {
                warn!(
                    "No state change after {} attempt(s)",
                    result.timed_out_attempts()
                );
                EXIT_NO_MATCH
            }
        }
        Some(Err(failure)) => {
            error!("Run failed ({}): {}", failure.kind(), failure.error);
            write_report(&failure.partial, report)?;
            EXIT_FATAL
        }
        None => {
            warn!(
                "Interrupted during {}; {} attempt(s) recorded",
                orchestrator.phase(),
                orchestrator.attempts().len()
            );
            EXIT_INTERRUPTED
        }
    };

    Ok(ExitCode::from(code))
}

/// Print the report as JSON to `path`, or to stdout when no path is given
pub fn write_report(result: &RunResult, path: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(result).context("Failed to serialize run report")?;

    match path {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).context("Failed to create report directory")?;
            }
            fs::write(path, json)
                .with_context(|| format!("Failed to write run report to {:?}", path))?;
            info!("Run report written to {:?}", path);
        }
        None => println!("{}", json),
    }
    Ok(())
}
