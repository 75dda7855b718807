//! Core error types for failprobe

use std::time::Duration;
use thiserror::Error;

/// Error taxonomy for a failprobe run
///
/// Only [`HarnessError::AttemptTimeout`] is recovered locally (by the retry
/// loop); connectivity and policy failures end the run immediately.
#[derive(Debug, Clone, Error)]
pub enum HarnessError {
    /// The initial cluster connection or subscription could not be established
    #[error("Connectivity failure: {0}")]
    ConnectivityFailure(String),

    /// A detection policy precondition could not be resolved
    #[error("Policy unsatisfiable: {0}")]
    PolicyUnsatisfiable(String),

    /// No matching topology change within one attempt's deadline
    #[error("Attempt {attempt} timed out after {deadline:?} without a matching state change")]
    AttemptTimeout { attempt: u32, deadline: Duration },

    /// Run configuration could not be turned into a runnable plan
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Load invocation errors, absorbed by the ramp loop
    #[error("Load invocation error: {0}")]
    Load(String),
}

impl HarnessError {
    /// Whether this error ends the run without further attempts
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            HarnessError::ConnectivityFailure(_)
                | HarnessError::PolicyUnsatisfiable(_)
                | HarnessError::InvalidConfiguration(_)
        )
    }

    /// Short machine friendly name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            HarnessError::ConnectivityFailure(_) => "connectivity_failure",
            HarnessError::PolicyUnsatisfiable(_) => "policy_unsatisfiable",
            HarnessError::AttemptTimeout { .. } => "attempt_timeout",
            HarnessError::InvalidConfiguration(_) => "invalid_configuration",
            HarnessError::Load(_) => "load",
        }
    }
}

/// Result type alias for failprobe
pub type Result<T> = std::result::Result<T, HarnessError>;
