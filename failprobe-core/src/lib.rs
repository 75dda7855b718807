//! Core domain models and interfaces for failprobe
//!
//! This crate holds the types shared by every other failprobe crate: the
//! topology data model, the run report, the collaborator traits the engine
//! drives (load invokers and cluster event sources) and the error taxonomy.

pub mod error;
pub mod model;
pub mod traits;

// Re-export commonly used types
pub use error::{HarnessError, Result};
pub use model::{
    Attempt, AttemptOutcome, BurstReport, BurstStatus, ChangeEvent, PolicyKind, RampMode,
    RunResult, ServerAddress, ServerDescription, TopologyNotification, TopologySnapshot,
    TopologyVersion,
};
pub use traits::{ClusterEventSource, LoadInvoker, TopologyListener};
