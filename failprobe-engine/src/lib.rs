//! The failprobe engine
//!
//! Races an escalating load ramp against a topology change detector and
//! retries with backoff until a matching state change is captured or the
//! attempts run out.

pub mod detector;
pub mod listener;
pub mod orchestrator;
pub mod ramp;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use detector::{BaselineScope, ChangeDetector, MatchReceiver};
pub use listener::{CompositeListener, LoggingListener};
pub use orchestrator::{RampPlan, RetryOrchestrator, RunConfig, RunFailure, RunPhase};
pub use ramp::{ConcurrencySchedule, LoadRampController, RampSettings, RampSummary};
