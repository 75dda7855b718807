//! HTTP error types

use failprobe_core::HarnessError;

/// Error type for load invocation
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to launch load tool: {0}")]
    SpawnError(#[from] std::io::Error),
}

impl From<HttpError> for HarnessError {
    fn from(err: HttpError) -> Self {
        HarnessError::Load(err.to_string())
    }
}
