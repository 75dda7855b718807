//! Domain-driven configuration management for failprobe
//!
//! Configuration is split by functional domain (target, ramp, detection,
//! run, cluster, http, logging), each with its own defaults and validation,
//! and can be loaded from YAML with `FAILPROBE_*` environment overrides.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    cluster::ClusterConfig,
    detection::{BaselineScopeChoice, DetectionConfig, PolicyChoice},
    http::HttpConfig,
    logging::{LogFormat, LogLevel, LoggingConfig},
    ramp::{RampConfig, RampModeConfig},
    run::RunSettings,
    target::{InvokerKind, TargetConfig},
    FailprobeConfig,
};
