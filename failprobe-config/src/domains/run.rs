//! Attempt scheduling configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Attempt, deadline and backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// How long one attempt waits for a matching state change
    #[serde(with = "humantime_serde", default = "default_attempt_deadline")]
    pub attempt_deadline: Duration,

    /// Maximum number of attempts per run
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Pause between attempts so the cluster can settle
    #[serde(with = "humantime_serde", default = "default_backoff")]
    pub backoff: Duration,

    /// Extra load time after a match, to capture follow-up transitions
    #[serde(with = "humantime_serde", default = "default_grace_period")]
    pub grace_period: Duration,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            attempt_deadline: default_attempt_deadline(),
            max_attempts: default_max_attempts(),
            backoff: default_backoff(),
            grace_period: default_grace_period(),
        }
    }
}

impl Validatable for RunSettings {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(
            self.attempt_deadline.as_millis(),
            "attempt_deadline",
            self.domain_name(),
        )?;
        validate_positive(self.max_attempts, "max_attempts", self.domain_name())?;

        if self.max_attempts > 10 {
            return Err(self.validation_error(format!(
                "max_attempts must be at most 10, got {}",
                self.max_attempts
            )));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "run"
    }
}

// Default value functions
fn default_attempt_deadline() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_max_attempts() -> u32 {
    2
}

fn default_backoff() -> Duration {
    Duration::from_secs(60)
}

fn default_grace_period() -> Duration {
    Duration::from_secs(15)
}
