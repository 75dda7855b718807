//! MongoDB-backed cluster event source for failprobe
//!
//! [`MongoTopologyMonitor`] listens to the driver's SDAM heartbeat events and
//! turns each change of a member's `hello` reply into a
//! [`failprobe_core::TopologyNotification`].

pub mod error;
pub mod hello;
pub mod monitor;

pub use error::MongoSourceError;
pub use hello::{discover_members, is_sharded, parse_hello};
pub use monitor::{MongoTopologyMonitor, MonitorSettings};
