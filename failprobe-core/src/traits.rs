//! Collaborator interfaces driven by the failprobe engine

use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

use crate::error::Result;
use crate::model::{BurstReport, ServerAddress, TopologyNotification, TopologySnapshot};

/// Issues one burst of requests against a target
///
/// An invocation runs to completion; the caller has no way to interrupt it.
#[async_trait]
pub trait LoadInvoker: Send + Sync {
    /// Send `total_requests` requests to `target` with at most `concurrency`
    /// of them in flight at any time.
    async fn invoke(
        &self,
        target: &Url,
        concurrency: u32,
        total_requests: u64,
    ) -> Result<BurstReport>;
}

/// Receives topology events from a [`ClusterEventSource`]
///
/// Methods are called synchronously from the source's delivery context and
/// must not block.
pub trait TopologyListener: Send + Sync {
    fn on_server_opened(&self, _address: &ServerAddress) {}

    fn on_description_changed(&self, notification: &TopologyNotification);

    fn on_server_closed(&self, _address: &ServerAddress) {}
}

/// Source of cluster topology notifications
#[async_trait]
pub trait ClusterEventSource: Send + Sync {
    /// Register a listener; it receives every event delivered afterwards
    fn subscribe(&self, listener: Arc<dyn TopologyListener>);

    /// Check that the cluster can be reached and start delivering events
    async fn probe(&self) -> Result<()>;

    /// Current view of every known member
    async fn snapshot(&self) -> TopologySnapshot;

    /// Address of the current primary, `None` when the deployment has no
    /// single primary
    async fn resolve_primary(&self) -> Result<Option<ServerAddress>>;

    /// Stop monitoring and release connections
    async fn close(&self);
}
