//! Load target configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_required_string, validate_url, Validatable};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Which load invoker issues the bursts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InvokerKind {
    /// Requests issued in-process
    #[default]
    Native,
    /// One `hey` process per burst
    Hey,
}

impl FromStr for InvokerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "native" => Ok(InvokerKind::Native),
            "hey" => Ok(InvokerKind::Hey),
            _ => Err(format!("Invalid invoker: {}", s)),
        }
    }
}

/// Load target configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// URL the load is sent to (falls back to $LAMBDA_FUNCTION_URL)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Requests per burst = concurrency × multiplier
    #[serde(default = "default_multiplier")]
    pub multiplier: u32,

    /// Load invoker implementation
    #[serde(default)]
    pub invoker: InvokerKind,

    /// Path of the `hey` executable for the hey invoker
    #[serde(default = "default_hey_path")]
    pub hey_path: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            url: None,
            multiplier: default_multiplier(),
            invoker: InvokerKind::default(),
            hey_path: default_hey_path(),
        }
    }
}

impl Validatable for TargetConfig {
    fn validate(&self) -> ConfigResult<()> {
        if let Some(ref url) = self.url {
            validate_url(url, &["http", "https"], "url", self.domain_name())?;
        }

        validate_positive(self.multiplier, "multiplier", self.domain_name())?;

        if self.invoker == InvokerKind::Hey {
            validate_required_string(&self.hey_path, "hey_path", self.domain_name())?;
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "target"
    }
}

fn default_multiplier() -> u32 {
    2
}

fn default_hey_path() -> String {
    "hey".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_defaults() {
        let config = TargetConfig::default();
        assert!(config.url.is_none());
        assert_eq!(config.multiplier, 2);
        assert_eq!(config.invoker, InvokerKind::Native);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_target_validation() {
        let mut config = TargetConfig {
            url: Some("https://abc.lambda-url.us-east-1.on.aws/".to_string()),
            ..TargetConfig::default()
        };
        assert!(config.validate().is_ok());

        config.url = Some("mongodb://localhost".to_string());
        assert!(config.validate().is_err());

        config = TargetConfig::default();
        config.multiplier = 0;
        assert!(config.validate().is_err());

        config = TargetConfig::default();
        config.invoker = InvokerKind::Hey;
        config.hey_path = String::new();
        assert!(config.validate().is_err());
    }
}
