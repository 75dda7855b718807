//! State change detection configuration

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Which transition the run is trying to provoke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PolicyChoice {
    #[default]
    VersionBump,
    ReadabilityLoss,
    PrimaryChange,
}

impl FromStr for PolicyChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "version_bump" => Ok(PolicyChoice::VersionBump),
            "readability_loss" => Ok(PolicyChoice::ReadabilityLoss),
            "primary_change" => Ok(PolicyChoice::PrimaryChange),
            _ => Err(format!("Invalid detection policy: {}", s)),
        }
    }
}

/// How long topology version baselines are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BaselineScopeChoice {
    /// Baselines are cleared at the start of every attempt
    #[default]
    PerAttempt,
    /// Baselines recorded once for the whole run
    PerRun,
}

/// State change detection configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DetectionConfig {
    #[serde(default)]
    pub policy: PolicyChoice,

    #[serde(default)]
    pub baseline_scope: BaselineScopeChoice,
}

impl Validatable for DetectionConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.policy != PolicyChoice::VersionBump
            && self.baseline_scope == BaselineScopeChoice::PerRun
        {
            return Err(self.validation_error(
                "baseline_scope only applies to the version_bump policy",
            ));
        }
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "detection"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_str() {
        assert_eq!(
            "primary-change".parse::<PolicyChoice>().unwrap(),
            PolicyChoice::PrimaryChange
        );
        assert_eq!(
            "VERSION_BUMP".parse::<PolicyChoice>().unwrap(),
            PolicyChoice::VersionBump
        );
        assert!("election".parse::<PolicyChoice>().is_err());
    }

    #[test]
    fn test_baseline_scope_only_for_version_bump() {
        let mut config = DetectionConfig {
            policy: PolicyChoice::VersionBump,
            baseline_scope: BaselineScopeChoice::PerRun,
        };
        assert!(config.validate().is_ok());

        config.policy = PolicyChoice::ReadabilityLoss;
        assert!(config.validate().is_err());
    }
}
