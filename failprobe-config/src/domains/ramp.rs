//! Concurrency ramp configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Ramp shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RampModeConfig {
    /// Every burst at the ceiling
    Flat,
    /// Start at `initial`, add `step` per burst
    Linear { step: u32, initial: u32 },
}

/// Concurrency ramp configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RampConfig {
    /// Maximum number of concurrent requests
    #[serde(default = "default_ceiling")]
    pub ceiling: u32,

    /// Ramp shape for the first attempt
    #[serde(default = "default_mode")]
    pub mode: RampModeConfig,

    /// Pause between two bursts
    #[serde(with = "humantime_serde", default = "default_inter_burst_pause")]
    pub inter_burst_pause: Duration,

    /// Load at the ceiling right away on retries
    #[serde(default = "crate::domains::utils::default_true")]
    pub flat_on_retry: bool,
}

impl RampConfig {
    /// Ramp up by `increment` per burst, starting at `increment`
    pub fn set_increment(&mut self, increment: u32) {
        self.mode = RampModeConfig::Linear {
            step: increment,
            initial: increment,
        };
    }
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            ceiling: default_ceiling(),
            mode: default_mode(),
            inter_burst_pause: default_inter_burst_pause(),
            flat_on_retry: true,
        }
    }
}

impl Validatable for RampConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.ceiling, "ceiling", self.domain_name())?;

        if let RampModeConfig::Linear { step, initial } = self.mode {
            validate_positive(step, "mode.step", self.domain_name())?;
            validate_positive(initial, "mode.initial", self.domain_name())?;
        }

        if self.inter_burst_pause > Duration::from_secs(60) {
            return Err(self.validation_error(format!(
                "inter_burst_pause must be at most 60s, got {:?}",
                self.inter_burst_pause
            )));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "ramp"
    }
}

// Default value functions
fn default_ceiling() -> u32 {
    1000
}

fn default_mode() -> RampModeConfig {
    // One step straight to the ceiling
    RampModeConfig::Linear {
        step: default_ceiling(),
        initial: default_ceiling(),
    }
}

fn default_inter_burst_pause() -> Duration {
    Duration::from_millis(100)
}
