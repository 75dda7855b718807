//! HTTP load client configuration

use failprobe_config::HttpConfig as ConfigHttpConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for the client used by [`crate::HttpLoadInvoker`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadClientConfig {
    /// Per-request timeout
    pub timeout: Duration,

    /// User agent string
    pub user_agent: String,

    /// Whether to verify SSL certificates
    pub verify_ssl: bool,

    /// Maximum idle connections kept per host
    pub max_idle_per_host: usize,
}

impl Default for LoadClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "failprobe/0.1".to_string(),
            verify_ssl: true,
            max_idle_per_host: 1000,
        }
    }
}

impl From<ConfigHttpConfig> for LoadClientConfig {
    fn from(config: ConfigHttpConfig) -> Self {
        Self {
            timeout: config.timeout,
            user_agent: config.user_agent,
            verify_ssl: config.verify_ssl,
            max_idle_per_host: config.max_idle_per_host,
        }
    }
}
