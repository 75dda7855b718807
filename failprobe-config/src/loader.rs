//! Configuration loading and environment variable handling

use crate::domains::FailprobeConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Unprefixed variable the target URL falls back to
pub const LAMBDA_FUNCTION_URL_VAR: &str = "LAMBDA_FUNCTION_URL";

/// Unprefixed variable the cluster URI falls back to
pub const MONGODB_URI_VAR: &str = "MONGODB_URI";

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "FAILPROBE".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<FailprobeConfig> {
        let content = std::fs::read_to_string(path)?;
        let mut config: FailprobeConfig = serde_yaml::from_str(&content)?;

        // Apply environment variable overrides
        self.apply_env_overrides(&mut config)?;

        // Validate all domains
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<FailprobeConfig> {
        let mut config = FailprobeConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<FailprobeConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut FailprobeConfig) -> ConfigResult<()> {
        self.apply_target_overrides(&mut config.target)?;
        self.apply_ramp_overrides(&mut config.ramp)?;
        self.apply_detection_overrides(&mut config.detection)?;
        self.apply_run_overrides(&mut config.run)?;
        self.apply_cluster_overrides(&mut config.cluster)?;
        self.apply_http_overrides(&mut config.http)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    /// Apply target config overrides
    fn apply_target_overrides(
        &self,
        config: &mut crate::domains::target::TargetConfig,
    ) -> ConfigResult<()> {
        if let Ok(url) = self.get_env_var("TARGET_URL") {
            config.url = Some(url);
        } else if config.url.is_none() {
            config.url = std::env::var(LAMBDA_FUNCTION_URL_VAR).ok();
        }

        if let Ok(multiplier) = self.get_env_var("MULTIPLIER") {
            config.multiplier = parse_env("MULTIPLIER", &multiplier)?;
        }

        if let Ok(invoker) = self.get_env_var("INVOKER") {
            config.invoker = crate::domains::target::InvokerKind::from_str(&invoker)
                .map_err(|_| ConfigError::EnvError(format!("Invalid INVOKER: {}", invoker)))?;
        }

        if let Ok(hey_path) = self.get_env_var("HEY_PATH") {
            config.hey_path = hey_path;
        }

        Ok(())
    }

    /// Apply ramp config overrides
    fn apply_ramp_overrides(
        &self,
        config: &mut crate::domains::ramp::RampConfig,
    ) -> ConfigResult<()> {
        if let Ok(concurrency) = self.get_env_var("CONCURRENCY") {
            config.ceiling = parse_env("CONCURRENCY", &concurrency)?;
        }

        if let Ok(increment) = self.get_env_var("INCREMENT") {
            config.set_increment(parse_env("INCREMENT", &increment)?);
        }

        if let Ok(pause) = self.get_env_var("INTER_BURST_PAUSE_MS") {
            let millis: u64 = parse_env("INTER_BURST_PAUSE_MS", &pause)?;
            config.inter_burst_pause = Duration::from_millis(millis);
        }

        if let Ok(flat) = self.get_env_var("FLAT_ON_RETRY") {
            config.flat_on_retry = parse_env("FLAT_ON_RETRY", &flat)?;
        }

        Ok(())
    }

    /// Apply detection config overrides
    fn apply_detection_overrides(
        &self,
        config: &mut crate::domains::detection::DetectionConfig,
    ) -> ConfigResult<()> {
        if let Ok(policy) = self.get_env_var("POLICY") {
            config.policy = crate::domains::detection::PolicyChoice::from_str(&policy)
                .map_err(|_| ConfigError::EnvError(format!("Invalid POLICY: {}", policy)))?;
        }

        Ok(())
    }

    /// Apply run config overrides
    fn apply_run_overrides(&self, config: &mut crate::domains::run::RunSettings) -> ConfigResult<()> {
        if let Ok(deadline) = self.get_env_var("ATTEMPT_DEADLINE") {
            let seconds: u64 = parse_env("ATTEMPT_DEADLINE", &deadline)?;
            config.attempt_deadline = Duration::from_secs(seconds);
        }

        if let Ok(attempts) = self.get_env_var("MAX_ATTEMPTS") {
            config.max_attempts = parse_env("MAX_ATTEMPTS", &attempts)?;
        }

        if let Ok(backoff) = self.get_env_var("BACKOFF") {
            let seconds: u64 = parse_env("BACKOFF", &backoff)?;
            config.backoff = Duration::from_secs(seconds);
        }

        if let Ok(grace) = self.get_env_var("GRACE_PERIOD") {
            let seconds: u64 = parse_env("GRACE_PERIOD", &grace)?;
            config.grace_period = Duration::from_secs(seconds);
        }

        Ok(())
    }

    /// Apply cluster config overrides
    fn apply_cluster_overrides(
        &self,
        config: &mut crate::domains::cluster::ClusterConfig,
    ) -> ConfigResult<()> {
        if let Ok(uri) = self.get_env_var("MONGODB_URI") {
            config.uri = Some(uri);
        } else if config.uri.is_none() {
            config.uri = std::env::var(MONGODB_URI_VAR).ok();
        }

        if let Ok(timeout) = self.get_env_var("SERVER_SELECTION_TIMEOUT") {
            let seconds: u64 = parse_env("SERVER_SELECTION_TIMEOUT", &timeout)?;
            config.server_selection_timeout = Duration::from_secs(seconds);
        }

        Ok(())
    }

    /// Apply HTTP config overrides
    fn apply_http_overrides(
        &self,
        config: &mut crate::domains::http::HttpConfig,
    ) -> ConfigResult<()> {
        if let Ok(timeout) = self.get_env_var("HTTP_TIMEOUT") {
            let seconds: u64 = parse_env("HTTP_TIMEOUT", &timeout)?;
            config.timeout = Duration::from_secs(seconds);
        }

        if let Ok(user_agent) = self.get_env_var("HTTP_USER_AGENT") {
            config.user_agent = user_agent;
        }

        if let Ok(verify_ssl) = self.get_env_var("HTTP_VERIFY_SSL") {
            config.verify_ssl = parse_env("HTTP_VERIFY_SSL", &verify_ssl)?;
        }

        Ok(())
    }

    /// Apply logging config overrides
    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = crate::domains::logging::LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = crate::domains::logging::LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_env<T>(name: &str, value: &str) -> ConfigResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| ConfigError::EnvError(format!("Invalid {}: {}", name, e)))
}
