//! Conversion from file configuration to engine and collaborator settings

use crate::cli::RunArgs;
use anyhow::{anyhow, Context, Result};
use failprobe_config::{
    BaselineScopeChoice, ClusterConfig, FailprobeConfig, InvokerKind, PolicyChoice,
    RampModeConfig, RunSettings,
};
use failprobe_core::{LoadInvoker, PolicyKind, RampMode};
use failprobe_engine::{BaselineScope, RampPlan, RunConfig};
use failprobe_http::{HeyInvoker, HttpLoadInvoker, LoadClientConfig};
use failprobe_mongodb::MonitorSettings;
use failprobe_resilience::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Apply `failprobe run` flags on top of the loaded configuration
pub fn apply_run_args(config: &mut FailprobeConfig, args: &RunArgs) -> Result<()> {
    if let Some(url) = &args.url {
        config.target.url = Some(url.clone());
    }
    if let Some(concurrency) = args.concurrency {
        config.ramp.ceiling = concurrency;
    }
    if let Some(increment) = args.increment {
        if increment < config.ramp.ceiling {
            config.ramp.set_increment(increment);
        } else {
            config.ramp.mode = RampModeConfig::Flat;
        }
    }
    if let Some(policy) = &args.policy {
        config.detection.policy = policy.parse::<PolicyChoice>().map_err(|e| anyhow!(e))?;
    }
    if let Some(secs) = args.duration {
        config.run.attempt_deadline = Duration::from_secs(secs);
    }
    if let Some(attempts) = args.attempts {
        config.run.max_attempts = attempts;
    }
    if let Some(secs) = args.backoff {
        config.run.backoff = Duration::from_secs(secs);
    }
    if let Some(secs) = args.grace {
        config.run.grace_period = Duration::from_secs(secs);
    }

    config
        .validate_all()
        .context("Invalid configuration after applying command line flags")
}

pub fn policy_kind(choice: PolicyChoice) -> PolicyKind {
    match choice {
        PolicyChoice::VersionBump => PolicyKind::VersionBump,
        PolicyChoice::ReadabilityLoss => PolicyKind::ReadabilityLoss,
        PolicyChoice::PrimaryChange => PolicyKind::PrimaryChange,
    }
}

fn baseline_scope(choice: BaselineScopeChoice) -> BaselineScope {
    match choice {
        BaselineScopeChoice::PerAttempt => BaselineScope::PerAttempt,
        BaselineScopeChoice::PerRun => BaselineScope::PerRun,
    }
}

fn ramp_mode(mode: RampModeConfig) -> RampMode {
    match mode {
        RampModeConfig::Flat => RampMode::Flat,
        RampModeConfig::Linear { step, initial } => RampMode::LinearRamp { step, initial },
    }
}

fn retry_policy(run: &RunSettings) -> RetryPolicy {
    RetryPolicy::fixed(run.max_attempts, run.backoff)
}

/// Build the engine's run configuration; the target URL is required here
pub fn run_config(config: &FailprobeConfig) -> Result<RunConfig> {
    let raw = config.target.url.as_deref().ok_or_else(|| {
        anyhow!("No target URL: pass --url, set target.url or FAILPROBE_TARGET_URL / LAMBDA_FUNCTION_URL")
    })?;
    let target = Url::parse(raw).with_context(|| format!("Invalid target URL: {}", raw))?;

    Ok(RunConfig {
        target,
        policy: policy_kind(config.detection.policy),
        baseline_scope: baseline_scope(config.detection.baseline_scope),
        ramp: RampPlan {
            ceiling: config.ramp.ceiling,
            initial_mode: ramp_mode(config.ramp.mode),
            flat_on_retry: config.ramp.flat_on_retry,
            inter_burst_pause: config.ramp.inter_burst_pause,
            requests_per_connection_multiplier: config.target.multiplier,
        },
        attempt_deadline: config.run.attempt_deadline,
        retry: retry_policy(&config.run),
        grace_period: config.run.grace_period,
    })
}

/// Build the topology monitor settings; the connection string is required here
pub fn monitor_settings(cluster: &ClusterConfig) -> Result<MonitorSettings> {
    let uri = cluster.uri.clone().ok_or_else(|| {
        anyhow!("No cluster connection string: set cluster.uri or FAILPROBE_MONGODB_URI / MONGODB_URI")
    })?;

    let mut settings = MonitorSettings::new(uri);
    settings.server_selection_timeout = cluster.server_selection_timeout;
    settings.heartbeat_interval = cluster.heartbeat_interval;
    Ok(settings)
}

pub fn build_invoker(config: &FailprobeConfig) -> Arc<dyn LoadInvoker> {
    match config.target.invoker {
        InvokerKind::Native => Arc::new(HttpLoadInvoker::with_config(LoadClientConfig::from(
            config.http.clone(),
        ))),
        InvokerKind::Hey => Arc::new(HeyInvoker::new(config.target.hey_path.clone())),
    }
}
