//! Cluster connection configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_url, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Cluster connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Connection string (falls back to $MONGODB_URI)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    /// How long the connectivity probe may wait for a server
    #[serde(with = "humantime_serde", default = "default_server_selection_timeout")]
    pub server_selection_timeout: Duration,

    /// Time between two checks of the same member
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    pub heartbeat_interval: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            uri: None,
            server_selection_timeout: default_server_selection_timeout(),
            heartbeat_interval: default_heartbeat_interval(),
        }
    }
}

impl Validatable for ClusterConfig {
    fn validate(&self) -> ConfigResult<()> {
        if let Some(ref uri) = self.uri {
            validate_url(uri, &["mongodb", "mongodb+srv"], "uri", self.domain_name())?;
        }

        validate_positive(
            self.server_selection_timeout.as_millis(),
            "server_selection_timeout",
            self.domain_name(),
        )?;

        if self.heartbeat_interval < Duration::from_millis(500) {
            return Err(self.validation_error(format!(
                "heartbeat_interval must be at least 500ms, got {:?}",
                self.heartbeat_interval
            )));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "cluster"
    }
}

fn default_server_selection_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_millis(500)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_validation() {
        let mut config = ClusterConfig::default();
        assert!(config.validate().is_ok());

        config.uri = Some("mongodb://db-0:27017,db-1:27017/?replicaSet=rs0".to_string());
        assert!(config.validate().is_ok());

        config.uri = Some("mongodb+srv://cluster0.example.net".to_string());
        assert!(config.validate().is_ok());

        config.uri = Some("https://db-0".to_string());
        assert!(config.validate().is_err());

        config = ClusterConfig::default();
        config.heartbeat_interval = Duration::from_millis(250);
        assert!(config.validate().is_err());
    }
}
