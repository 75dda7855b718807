//! MongoDB event source errors

use failprobe_core::HarnessError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MongoSourceError {
    #[error("MongoDB driver error: {0}")]
    Driver(#[from] mongodb::error::Error),

    #[error("Invalid member address '{address}': {message}")]
    InvalidAddress { address: String, message: String },

    #[error("Cluster unreachable: {0}")]
    Unreachable(String),
}

impl From<MongoSourceError> for HarnessError {
    fn from(err: MongoSourceError) -> Self {
        HarnessError::ConnectivityFailure(err.to_string())
    }
}
