//! Topology data model and run report types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Identifier (`host:port`) of one cluster member
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerAddress(String);

impl ServerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServerAddress {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for ServerAddress {
    fn from(address: String) -> Self {
        Self(address)
    }
}

/// Opaque per-server version token, compared for equality only
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopologyVersion {
    pub process_id: String,
    pub counter: i64,
}

impl TopologyVersion {
    pub fn new(process_id: impl Into<String>, counter: i64) -> Self {
        Self {
            process_id: process_id.into(),
            counter,
        }
    }
}

impl fmt::Display for TopologyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.process_id, self.counter)
    }
}

/// Snapshot of one server's state at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDescription {
    pub address: ServerAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology_version: Option<TopologyVersion>,
    pub is_readable: bool,
    pub is_writable: bool,
    pub server_type_known: bool,
}

impl ServerDescription {
    /// Description of a server that has not been checked yet, or whose last
    /// check failed
    pub fn unknown(address: impl Into<ServerAddress>) -> Self {
        Self {
            address: address.into(),
            topology_version: None,
            is_readable: false,
            is_writable: false,
            server_type_known: false,
        }
    }

    /// Readable and writable member
    pub fn primary(address: impl Into<ServerAddress>) -> Self {
        Self {
            address: address.into(),
            topology_version: None,
            is_readable: true,
            is_writable: true,
            server_type_known: true,
        }
    }

    /// Readable, non-writable member
    pub fn secondary(address: impl Into<ServerAddress>) -> Self {
        Self {
            address: address.into(),
            topology_version: None,
            is_readable: true,
            is_writable: false,
            server_type_known: true,
        }
    }

    pub fn with_topology_version(mut self, version: TopologyVersion) -> Self {
        self.topology_version = Some(version);
        self
    }

    /// Human readable role derived from the flags
    pub fn role(&self) -> &'static str {
        match (self.server_type_known, self.is_writable, self.is_readable) {
            (false, _, _) => "Unknown",
            (true, true, _) => "Writable",
            (true, false, true) => "Readable",
            (true, false, false) => "Unavailable",
        }
    }
}

impl fmt::Display for ServerDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<ServerDescription {} {}", self.address, self.role())?;
        if let Some(version) = &self.topology_version {
            write!(f, " topology_version={}", version)?;
        }
        write!(f, ">")
    }
}

/// A change of one server's description, as delivered by the event source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyNotification {
    pub address: ServerAddress,
    pub previous: ServerDescription,
    pub new: ServerDescription,
    pub observed_at: DateTime<Utc>,
}

impl TopologyNotification {
    /// Build a notification for `new.address`, timestamped now
    pub fn new(previous: ServerDescription, new: ServerDescription) -> Self {
        Self {
            address: new.address.clone(),
            previous,
            new,
            observed_at: Utc::now(),
        }
    }
}

impl fmt::Display for TopologyNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "server {} changed from {} to {}",
            self.address, self.previous, self.new
        )
    }
}

/// Detection policy selected for a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// A server reports a topology version different from its first-seen one
    VersionBump,
    /// A known server stops being readable
    ReadabilityLoss,
    /// A member other than the initial primary becomes writable
    PrimaryChange,
}

impl PolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyKind::VersionBump => "version_bump",
            PolicyKind::ReadabilityLoss => "readability_loss",
            PolicyKind::PrimaryChange => "primary_change",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The first transition matched by the detector during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub policy: PolicyKind,
    pub baseline: ServerDescription,
    pub triggering: TopologyNotification,
}

/// Concurrency schedule used by a load ramp
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RampMode {
    /// Every burst runs at the ceiling
    Flat,
    /// Start at `initial` and add `step` per burst up to the ceiling
    LinearRamp { step: u32, initial: u32 },
}

impl fmt::Display for RampMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RampMode::Flat => write!(f, "flat"),
            RampMode::LinearRamp { step, initial } => {
                write!(f, "linear(initial={}, step={})", initial, step)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Matched,
    TimedOut,
}

/// One ramp-and-wait cycle of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    /// 1-based attempt number
    pub index: u32,
    pub ramp_mode: RampMode,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub outcome: AttemptOutcome,
    /// Number of load bursts issued during the attempt
    pub bursts: u64,
}

/// Full view of the cluster at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub captured_at: DateTime<Utc>,
    pub servers: BTreeMap<ServerAddress, ServerDescription>,
}

impl TopologySnapshot {
    pub fn new(servers: impl IntoIterator<Item = ServerDescription>) -> Self {
        Self {
            captured_at: Utc::now(),
            servers: servers
                .into_iter()
                .map(|sd| (sd.address.clone(), sd))
                .collect(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn get(&self, address: &ServerAddress) -> Option<&ServerDescription> {
        self.servers.get(address)
    }

    /// Address of the first writable member, if any
    pub fn writable(&self) -> Option<&ServerAddress> {
        self.servers
            .values()
            .find(|sd| sd.is_writable)
            .map(|sd| &sd.address)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

impl fmt::Display for TopologySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<TopologySnapshot at {}", self.captured_at.to_rfc3339())?;
        for sd in self.servers.values() {
            write!(f, "\n  {}", sd)?;
        }
        write!(f, ">")
    }
}

/// Final report of one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub policy: PolicyKind,
    #[serde(with = "humantime_serde")]
    pub total_duration: Duration,
    pub attempts: Vec<Attempt>,
    pub matched_event: Option<ChangeEvent>,
    pub initial_topology_snapshot: TopologySnapshot,
    pub final_topology_snapshot: TopologySnapshot,
}

impl RunResult {
    /// Whether the run provoked and captured a state change
    pub fn is_match(&self) -> bool {
        self.matched_event.is_some()
    }

    pub fn timed_out_attempts(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.outcome == AttemptOutcome::TimedOut)
            .count()
    }
}

/// How a single load burst ended, as far as the invoker can tell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BurstStatus {
    Success,
    Failed {
        code: Option<i32>,
        message: String,
    },
}

impl BurstStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, BurstStatus::Success)
    }
}

/// Outcome of one load burst
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurstReport {
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    pub exit_status: BurstStatus,
    /// Requests that completed successfully, when the invoker can count them
    pub succeeded: Option<u64>,
    /// Requests that failed, when the invoker can count them
    pub failed: Option<u64>,
}
