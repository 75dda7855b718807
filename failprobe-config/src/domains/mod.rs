//! Domain-specific configuration modules

pub mod cluster;
pub mod detection;
pub mod http;
pub mod logging;
pub mod ramp;
pub mod run;
pub mod target;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main failprobe configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FailprobeConfig {
    /// Load target configuration
    #[serde(default)]
    pub target: target::TargetConfig,

    /// Concurrency ramp configuration
    #[serde(default)]
    pub ramp: ramp::RampConfig,

    /// State change detection configuration
    #[serde(default)]
    pub detection: detection::DetectionConfig,

    /// Attempt, deadline and backoff configuration
    #[serde(default)]
    pub run: run::RunSettings,

    /// Cluster connection configuration
    #[serde(default)]
    pub cluster: cluster::ClusterConfig,

    /// HTTP client configuration for the native load invoker
    #[serde(default)]
    pub http: http::HttpConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl FailprobeConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.target.validate()?;
        self.ramp.validate()?;
        self.detection.validate()?;
        self.run.validate()?;
        self.cluster.validate()?;
        self.http.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = FailprobeConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
