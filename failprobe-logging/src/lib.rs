//! Logging setup for failprobe
//!
//! Everything logs through `tracing`; crates that use the `log` facade are
//! bridged by the subscriber installed here.

pub mod init;

pub use init::{build_env_filter, init_logging_from_config, init_simple_tracing};

// Re-export the configuration types so callers need only this crate
pub use failprobe_config::{LogFormat, LogLevel, LoggingConfig};
