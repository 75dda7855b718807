//! Retry orchestration
//!
//! [`RetryOrchestrator::run`] subscribes to the event source once, then
//! repeats ramp-and-wait attempts until the detector reports a match or the
//! retry policy runs out of attempts.

use crate::detector::{BaselineScope, ChangeDetector};
use crate::listener::{CompositeListener, LoggingListener};
use crate::ramp::{LoadRampController, RampSettings};
use chrono::Utc;
use failprobe_core::{
    Attempt, AttemptOutcome, ChangeEvent, ClusterEventSource, HarnessError, LoadInvoker,
    PolicyKind, RampMode, RunResult, TopologySnapshot,
};
use failprobe_resilience::{RetryError, RetryExecutor, RetryPolicy};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

/// How the load ramp is shaped on each attempt
#[derive(Debug, Clone, PartialEq)]
pub struct RampPlan {
    pub ceiling: u32,
    /// Mode of the first attempt
    pub initial_mode: RampMode,
    /// Later attempts load at the ceiling from the first burst
    pub flat_on_retry: bool,
    pub inter_burst_pause: Duration,
    pub requests_per_connection_multiplier: u32,
}

impl RampPlan {
    /// Ramp mode for a 1-based attempt number
    pub fn for_attempt(&self, attempt: u32) -> RampMode {
        if attempt > 1 && self.flat_on_retry {
            RampMode::Flat
        } else {
            self.initial_mode
        }
    }

    pub fn settings_for_attempt(&self, target: &Url, attempt: u32) -> RampSettings {
        RampSettings {
            target: target.clone(),
            ceiling: self.ceiling,
            mode: self.for_attempt(attempt),
            inter_burst_pause: self.inter_burst_pause,
            requests_per_connection_multiplier: self.requests_per_connection_multiplier,
        }
    }
}

/// Everything a run needs; no field has an implicit default
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub target: Url,
    pub policy: PolicyKind,
    pub baseline_scope: BaselineScope,
    pub ramp: RampPlan,
    /// How long each attempt waits for a match
    pub attempt_deadline: Duration,
    /// Attempt count and the pause between attempts
    pub retry: RetryPolicy,
    /// Extra load time after a match
    pub grace_period: Duration,
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), HarnessError> {
        let invalid = |message: &str| Err(HarnessError::InvalidConfiguration(message.to_string()));

        if self.retry.max_attempts == 0 {
            return invalid("max_attempts must be at least 1");
        }
        if self.ramp.ceiling == 0 {
            return invalid("ramp ceiling must be at least 1");
        }
        if self.ramp.requests_per_connection_multiplier == 0 {
            return invalid("requests per connection multiplier must be at least 1");
        }
        if self.attempt_deadline.is_zero() {
            return invalid("attempt deadline must be positive");
        }
        if let RampMode::LinearRamp { step, initial } = self.ramp.initial_mode {
            if step == 0 {
                return invalid("linear ramp step must be at least 1");
            }
            if initial == 0 {
                return invalid("linear ramp initial concurrency must be at least 1");
            }
        }
        if self.ramp.inter_burst_pause.is_zero() {
            warn!("Inter-burst pause is zero; bursts will run back to back");
        }
        Ok(())
    }
}

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Subscribing,
    Attempting { attempt: u32 },
    Matched { attempt: u32 },
    TimedOut { attempt: u32 },
    Pausing { after_attempt: u32 },
    Done,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Idle => write!(f, "idle"),
            RunPhase::Subscribing => write!(f, "subscribing"),
            RunPhase::Attempting { attempt } => write!(f, "attempting #{}", attempt),
            RunPhase::Matched { attempt } => write!(f, "matched on #{}", attempt),
            RunPhase::TimedOut { attempt } => write!(f, "timed out on #{}", attempt),
            RunPhase::Pausing { after_attempt } => write!(f, "pausing after #{}", after_attempt),
            RunPhase::Done => write!(f, "done"),
            RunPhase::Failed => write!(f, "failed"),
        }
    }
}

/// A run that ended on a fatal error, with what was captured before it
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct RunFailure {
    pub error: HarnessError,
    pub partial: Box<RunResult>,
}

impl RunFailure {
    pub fn kind(&self) -> &'static str {
        self.error.kind()
    }
}

/// Races load ramps against the change detector, attempt after attempt
pub struct RetryOrchestrator {
    config: RunConfig,
    source: Arc<dyn ClusterEventSource>,
    invoker: Arc<dyn LoadInvoker>,
    phase: Mutex<RunPhase>,
    attempts: Mutex<Vec<Attempt>>,
}

impl RetryOrchestrator {
    pub fn new(
        config: RunConfig,
        source: Arc<dyn ClusterEventSource>,
        invoker: Arc<dyn LoadInvoker>,
    ) -> Self {
        Self {
            config,
            source,
            invoker,
            phase: Mutex::new(RunPhase::Idle),
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn phase(&self) -> RunPhase {
        *self.phase.lock()
    }

    /// Attempts recorded by the current or last run
    pub fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().clone()
    }

    fn transition(&self, next: RunPhase) {
        let previous = std::mem::replace(&mut *self.phase.lock(), next);
        info!("Run phase: {} -> {}", previous, next);
    }

    /// Execute one full run
    ///
    /// Exhausting every attempt is not an error: the result then carries no
    /// matched event. Only fatal conditions return [`RunFailure`].
    pub async fn run(&self) -> Result<RunResult, RunFailure> {
        let run_id = Uuid::new_v4();
        let clock = Instant::now();
        self.attempts.lock().clear();
        info!(
            "Run {} started: policy {}, up to {} attempts against {}",
            run_id, self.config.policy, self.config.retry.max_attempts, self.config.target
        );

        if let Err(error) = self.config.validate() {
            return Err(self.fail(run_id, clock, error, TopologySnapshot::empty()).await);
        }

        self.transition(RunPhase::Subscribing);
        let detector = Arc::new(ChangeDetector::new(
            self.config.policy,
            self.config.baseline_scope,
        ));
        let listener = CompositeListener::new()
            .with(Arc::new(LoggingListener))
            .with(detector.clone());
        self.source.subscribe(Arc::new(listener));

        if let Err(error) = self.source.probe().await {
            let error = match error {
                HarnessError::ConnectivityFailure(_) => error,
                other => HarnessError::ConnectivityFailure(other.to_string()),
            };
            return Err(self.fail(run_id, clock, error, TopologySnapshot::empty()).await);
        }

        let initial = self.source.snapshot().await;
        info!("Initial topology: {}", initial);

        if self.config.policy == PolicyKind::PrimaryChange {
            match self.source.resolve_primary().await {
                Ok(Some(primary)) => {
                    detector.seed_primary(primary);
                }
                Ok(None) => {
                    let error = HarnessError::PolicyUnsatisfiable(
                        "deployment has no single primary to compare against".to_string(),
                    );
                    return Err(self.fail(run_id, clock, error, initial).await);
                }
                Err(error) => {
                    let error = if error.is_fatal() {
                        error
                    } else {
                        HarnessError::PolicyUnsatisfiable(error.to_string())
                    };
                    return Err(self.fail(run_id, clock, error, initial).await);
                }
            }
        }

        let executor = RetryExecutor::new(self.config.retry.clone());
        let outcome = executor
            .execute_with_context(|attempt| self.run_attempt(attempt, &detector))
            .await;

        let matched_event = match outcome {
            Ok(event) => {
                self.transition(RunPhase::Done);
                Some(event)
            }
            Err(RetryError::MaxAttemptsExceeded { attempts, .. }) => {
                warn!("No matching state change after {} attempts", attempts);
                self.transition(RunPhase::Failed);
                None
            }
            Err(RetryError::NonRetryableError(error)) => {
                return Err(self.fail(run_id, clock, error, initial).await);
            }
        };

        let final_snapshot = self.source.snapshot().await;
        info!("Final topology: {}", final_snapshot);

        let result = self.result(run_id, clock, matched_event, initial, final_snapshot);
        info!(
            "Run {} finished in {:?} after {} attempts (matched: {})",
            run_id,
            result.total_duration,
            result.attempts.len(),
            result.is_match()
        );
        Ok(result)
    }

    async fn run_attempt(
        &self,
        attempt: u32,
        detector: &ChangeDetector,
    ) -> Result<ChangeEvent, HarnessError> {
        self.transition(RunPhase::Attempting { attempt });
        let settings = self
            .config
            .ramp
            .settings_for_attempt(&self.config.target, attempt);
        let ramp_mode = settings.mode;
        let started_at = Utc::now();
        let clock = Instant::now();

        let mut receiver = detector.begin_attempt();
        detector.seed_baselines(&self.source.snapshot().await);

        let mut ramp = LoadRampController::new(settings, self.invoker.clone());
        ramp.start();

        let outcome = receiver.await_match(self.config.attempt_deadline).await;
        match &outcome {
            Ok(event) => {
                self.transition(RunPhase::Matched { attempt });
                info!(
                    "Matched {} on attempt {}; keeping load for {:?}",
                    event.triggering, attempt, self.config.grace_period
                );
                tokio::time::sleep(self.config.grace_period).await;
            }
            Err(_) => self.transition(RunPhase::TimedOut { attempt }),
        }

        detector.end_attempt();
        ramp.stop();
        let summary = ramp.join().await;

        self.attempts.lock().push(Attempt {
            index: attempt,
            ramp_mode,
            started_at,
            ended_at: Utc::now(),
            duration: clock.elapsed(),
            outcome: if outcome.is_ok() {
                AttemptOutcome::Matched
            } else {
                AttemptOutcome::TimedOut
            },
            bursts: summary.bursts,
        });

        if outcome.is_err() && attempt < self.config.retry.max_attempts {
            self.transition(RunPhase::Pausing {
                after_attempt: attempt,
            });
        }
        outcome
    }

    async fn fail(
        &self,
        run_id: Uuid,
        clock: Instant,
        error: HarnessError,
        initial: TopologySnapshot,
    ) -> RunFailure {
        warn!("Run {} failed: {}", run_id, error);
        self.transition(RunPhase::Failed);
        let final_snapshot = self.source.snapshot().await;
        RunFailure {
            error,
            partial: Box::new(self.result(run_id, clock, None, initial, final_snapshot)),
        }
    }

    fn result(
        &self,
        run_id: Uuid,
        clock: Instant,
        matched_event: Option<ChangeEvent>,
        initial: TopologySnapshot,
        final_snapshot: TopologySnapshot,
    ) -> RunResult {
        RunResult {
            run_id,
            policy: self.config.policy,
            total_duration: clock.elapsed(),
            attempts: self.attempts(),
            matched_event,
            initial_topology_snapshot: initial,
            final_topology_snapshot: final_snapshot,
        }
    }
}
