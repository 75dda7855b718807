//! Load invoker backed by the external `hey` tool

use crate::errors::HttpError;
use async_trait::async_trait;
use failprobe_core::{BurstReport, BurstStatus, LoadInvoker};
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, warn};
use url::Url;

/// Runs `hey -n <total> -c <concurrency> <url>` once per burst
#[derive(Debug, Clone)]
pub struct HeyInvoker {
    program: String,
}

impl HeyInvoker {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for HeyInvoker {
    fn default() -> Self {
        Self::new("hey")
    }
}

/// Command line arguments for one burst
pub fn hey_args(target: &Url, concurrency: u32, total_requests: u64) -> Vec<String> {
    // hey refuses -n smaller than -c
    let concurrency = concurrency.max(1);
    let total_requests = total_requests.max(concurrency as u64);
    vec![
        "-n".to_string(),
        total_requests.to_string(),
        "-c".to_string(),
        concurrency.to_string(),
        target.to_string(),
    ]
}

/// Request counts read from hey's report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeySummary {
    pub succeeded: u64,
    pub failed: u64,
}

/// Parse the status code and error distributions of a hey report
///
/// Returns `None` when the report has neither section.
pub fn parse_hey_summary(stdout: &str) -> Option<HeySummary> {
    enum Section {
        Other,
        Status,
        Errors,
    }

    let mut section = Section::Other;
    let mut seen = false;
    let mut summary = HeySummary::default();

    for line in stdout.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("Status code distribution:") {
            section = Section::Status;
            seen = true;
            continue;
        }
        if trimmed.starts_with("Error distribution:") {
            section = Section::Errors;
            seen = true;
            continue;
        }
        if trimmed.is_empty() || !trimmed.starts_with('[') {
            if !trimmed.is_empty() {
                section = Section::Other;
            }
            continue;
        }

        // "[200]\t1990 responses" or "[10]\tGet ...: i/o timeout"
        let Some((bracket, rest)) = trimmed[1..].split_once(']') else {
            continue;
        };
        match section {
            Section::Status => {
                let count = rest
                    .split_whitespace()
                    .next()
                    .and_then(|n| n.parse::<u64>().ok())
                    .unwrap_or(0);
                if bracket.starts_with('2') {
                    summary.succeeded += count;
                } else {
                    summary.failed += count;
                }
            }
            Section::Errors => {
                summary.failed += bracket.trim().parse::<u64>().unwrap_or(0);
            }
            Section::Other => {}
        }
    }

    seen.then_some(summary)
}

#[async_trait]
impl LoadInvoker for HeyInvoker {
    async fn invoke(
        &self,
        target: &Url,
        concurrency: u32,
        total_requests: u64,
    ) -> failprobe_core::Result<BurstReport> {
        let args = hey_args(target, concurrency, total_requests);
        debug!("Running {} {}", self.program, args.join(" "));

        let started = Instant::now();
        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(HttpError::from)?;
        let elapsed = started.elapsed();

        let stdout = String::from_utf8_lossy(&output.stdout);
        let summary = parse_hey_summary(&stdout);

        let exit_status = if output.status.success() {
            BurstStatus::Success
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(
                "{} exited with {:?}: {}",
                self.program,
                output.status.code(),
                stderr
            );
            BurstStatus::Failed {
                code: output.status.code(),
                message: stderr,
            }
        };

        Ok(BurstReport {
            elapsed,
            exit_status,
            succeeded: summary.map(|s| s.succeeded),
            failed: summary.map(|s| s.failed),
        })
    }
}
