//! Topology monitor built on the driver's SDAM events

use crate::error::MongoSourceError;
use crate::hello::{discover_members, is_sharded, parse_hello};
use async_trait::async_trait;
use failprobe_core::{
    ClusterEventSource, HarnessError, ServerAddress, ServerDescription, TopologyListener,
    TopologyNotification, TopologySnapshot,
};
use mongodb::bson::{doc, Document};
use mongodb::event::sdam::SdamEvent;
use mongodb::event::EventHandler;
use mongodb::options::ClientOptions;
use mongodb::Client;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Connection settings for [`MongoTopologyMonitor`]
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub uri: String,
    /// Bound on the connectivity probe and on the first check of every member
    pub server_selection_timeout: Duration,
    /// Driver heartbeat frequency; the driver refuses anything below 500ms
    pub heartbeat_interval: Duration,
}

impl MonitorSettings {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            server_selection_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_millis(500),
        }
    }
}

#[derive(Default)]
struct MonitorShared {
    listeners: Mutex<Vec<Arc<dyn TopologyListener>>>,
    descriptions: Mutex<BTreeMap<ServerAddress, ServerDescription>>,
    recorded: Notify,
}

impl MonitorShared {
    fn listeners(&self) -> Vec<Arc<dyn TopologyListener>> {
        self.listeners.lock().clone()
    }

    fn snapshot(&self) -> TopologySnapshot {
        TopologySnapshot::new(self.descriptions.lock().values().cloned())
    }

    /// Called by the driver's monitors, one event at a time per server
    fn handle_event(&self, event: SdamEvent) {
        match event {
            SdamEvent::ServerHeartbeatSucceeded(event) => {
                self.heartbeat_succeeded(event.server_address.to_string(), &event.reply);
            }
            SdamEvent::ServerHeartbeatFailed(event) => {
                debug!("Heartbeat to {} failed: {}", event.server_address, event.failure);
                self.heartbeat_failed(event.server_address.to_string());
            }
            SdamEvent::ServerClosed(event) => {
                self.forget(&ServerAddress::new(event.address.to_string()));
            }
            _ => {}
        }
    }

    fn heartbeat_succeeded(&self, address: impl Into<ServerAddress>, reply: &Document) {
        self.record(parse_hello(&address.into(), reply));
    }

    fn heartbeat_failed(&self, address: impl Into<ServerAddress>) {
        self.record(ServerDescription::unknown(address));
    }

    /// Store a check result and notify listeners when it changed anything
    fn record(&self, description: ServerDescription) {
        let previous = self
            .descriptions
            .lock()
            .insert(description.address.clone(), description.clone());
        self.recorded.notify_waiters();

        if previous.as_ref() == Some(&description) {
            return;
        }

        let listeners = self.listeners();
        let previous = match previous {
            Some(previous) => previous,
            None => {
                for listener in &listeners {
                    listener.on_server_opened(&description.address);
                }
                ServerDescription::unknown(description.address.clone())
            }
        };
        // First sighting of a member that did not answer
        if previous == description {
            return;
        }

        let notification = TopologyNotification::new(previous, description);
        for listener in &listeners {
            listener.on_description_changed(&notification);
        }
    }

    /// Drop a member the driver stopped monitoring
    fn forget(&self, address: &ServerAddress) {
        if self.descriptions.lock().remove(address).is_none() {
            return;
        }
        for listener in self.listeners() {
            listener.on_server_closed(address);
        }
    }

    fn knows_all(&self, members: &[ServerAddress]) -> bool {
        let descriptions = self.descriptions.lock();
        members.iter().all(|member| descriptions.contains_key(member))
    }

    /// Wait until every member has been checked at least once
    ///
    /// Returns `false` when `timeout` runs out first.
    async fn await_members(&self, members: &[ServerAddress], timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.recorded.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.knows_all(members) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.knows_all(members);
            }
        }
    }
}

/// Cluster event source fed by the driver's own server monitoring
///
/// The client, and with it the driver's monitors, is created by the first
/// [`probe`](ClusterEventSource::probe); every heartbeat reply is turned into
/// a [`ServerDescription`]. [`close`](ClusterEventSource::close) shuts the
/// client down.
pub struct MongoTopologyMonitor {
    settings: MonitorSettings,
    options: ClientOptions,
    shared: Arc<MonitorShared>,
    client: Mutex<Option<Client>>,
    sharded: AtomicBool,
}

impl MongoTopologyMonitor {
    /// Parse the connection string
    ///
    /// No server is contacted until [`probe`](ClusterEventSource::probe).
    pub async fn connect(settings: MonitorSettings) -> Result<Self, MongoSourceError> {
        let mut options = ClientOptions::parse(settings.uri.as_str()).await?;
        options.server_selection_timeout = Some(settings.server_selection_timeout);
        options.heartbeat_freq = Some(settings.heartbeat_interval);
        options.app_name = Some("failprobe".to_string());

        Ok(Self {
            settings,
            options,
            shared: Arc::new(MonitorShared::default()),
            client: Mutex::new(None),
            sharded: AtomicBool::new(false),
        })
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    fn seed_hosts(&self) -> Vec<String> {
        self.options.hosts.iter().map(|h| h.to_string()).collect()
    }

    /// The shared client, created with the event handler on first use
    fn client(&self) -> Result<Client, MongoSourceError> {
        let mut slot = self.client.lock();
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }

        let mut options = self.options.clone();
        let shared = self.shared.clone();
        options.sdam_event_handler = Some(EventHandler::callback(move |event: SdamEvent| {
            shared.handle_event(event)
        }));

        let client = Client::with_options(options)?;
        *slot = Some(client.clone());
        Ok(client)
    }
}

async fn hello(client: &Client) -> mongodb::error::Result<Document> {
    client.database("admin").run_command(doc! { "hello": 1 }).await
}

#[async_trait]
impl ClusterEventSource for MongoTopologyMonitor {
    fn subscribe(&self, listener: Arc<dyn TopologyListener>) {
        self.shared.listeners.lock().push(listener);
    }

    async fn probe(&self) -> failprobe_core::Result<()> {
        let client = self.client()?;
        let reply = hello(&client).await.map_err(|e| {
            HarnessError::from(MongoSourceError::Unreachable(format!(
                "{} ({})",
                e,
                self.seed_hosts().join(", ")
            )))
        })?;
        info!("Connected to cluster via {}", self.seed_hosts().join(", "));
        self.sharded.store(is_sharded(&reply), Ordering::SeqCst);

        let members: Vec<ServerAddress> = discover_members(&reply, &self.seed_hosts())
            .into_iter()
            .map(ServerAddress::new)
            .collect();
        let timeout = self.settings.server_selection_timeout;
        if self.shared.await_members(&members, timeout).await {
            debug!("All {} members checked", members.len());
        } else {
            warn!(
                "Not every member was checked within {:?}; the initial topology is partial",
                timeout
            );
        }
        Ok(())
    }

    async fn snapshot(&self) -> TopologySnapshot {
        self.shared.snapshot()
    }

    async fn resolve_primary(&self) -> failprobe_core::Result<Option<ServerAddress>> {
        if self.sharded.load(Ordering::SeqCst) {
            warn!("Connected to mongos; a sharded cluster has no single primary");
            return Ok(None);
        }

        // A primary elected during the probe may not be reported yet
        let deadline = Instant::now() + self.settings.server_selection_timeout;
        loop {
            if let Some(primary) = self.shared.snapshot().writable().cloned() {
                return Ok(Some(primary));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.settings.heartbeat_interval).await;
        }
    }

    async fn close(&self) {
        let client = self.client.lock().take();
        if let Some(client) = client {
            client.shutdown().await;
        }

        let addresses: Vec<ServerAddress> = std::mem::take(&mut *self.shared.descriptions.lock())
            .into_keys()
            .collect();
        for listener in self.shared.listeners() {
            for address in &addresses {
                listener.on_server_closed(address);
            }
        }
        info!("Topology monitor closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use failprobe_core::TopologyVersion;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        opened: AtomicUsize,
        closed: AtomicUsize,
        changed: Mutex<Vec<TopologyNotification>>,
    }

    impl TopologyListener for Counting {
        fn on_server_opened(&self, _address: &ServerAddress) {
            self.opened.fetch_add(1, Ordering::SeqCst);
        }

        fn on_description_changed(&self, notification: &TopologyNotification) {
            self.changed.lock().push(notification.clone());
        }

        fn on_server_closed(&self, _address: &ServerAddress) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn shared_with_listener() -> (Arc<MonitorShared>, Arc<Counting>) {
        let shared = Arc::new(MonitorShared::default());
        let listener = Arc::new(Counting::default());
        shared.listeners.lock().push(listener.clone());
        (shared, listener)
    }

    #[test]
    fn test_record_only_notifies_on_change() {
        let (shared, listener) = shared_with_listener();

        let v1 = ServerDescription::primary("db-0:27017")
            .with_topology_version(TopologyVersion::new("p", 1));
        shared.record(v1.clone());
        shared.record(v1.clone());
        shared.record(ServerDescription::unknown("db-0:27017"));

        assert_eq!(listener.opened.load(Ordering::SeqCst), 1);
        let changed = listener.changed.lock();
        assert_eq!(changed.len(), 2);
        assert!(!changed[0].previous.server_type_known);
        assert_eq!(changed[0].new, v1);
        assert_eq!(changed[1].previous, v1);
        assert!(!changed[1].new.server_type_known);
    }

    #[test]
    fn test_heartbeats_become_descriptions() {
        let (shared, listener) = shared_with_listener();
        let reply = doc! {
            "isWritablePrimary": true,
            "topologyVersion": { "processId": "abc", "counter": 3_i64 },
        };

        shared.heartbeat_succeeded("db-0:27017", &reply);
        // Unanswered first check: stored, but nothing changed
        shared.heartbeat_failed("db-1:27017");

        let snapshot = shared.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot.writable(), Some(&ServerAddress::from("db-0:27017")));
        assert_eq!(listener.opened.load(Ordering::SeqCst), 2);
        assert_eq!(listener.changed.lock().len(), 1);

        shared.heartbeat_failed("db-0:27017");
        let changed = listener.changed.lock();
        assert_eq!(changed.len(), 2);
        assert_eq!(
            changed[1].previous.topology_version,
            Some(TopologyVersion::new("abc", 3))
        );
        assert!(!changed[1].new.is_readable);
    }

    #[test]
    fn test_forget_emits_closed_once() {
        let (shared, listener) = shared_with_listener();
        shared.record(ServerDescription::secondary("db-2:27017"));

        shared.forget(&ServerAddress::from("db-2:27017"));
        shared.forget(&ServerAddress::from("db-2:27017"));

        assert_eq!(listener.closed.load(Ordering::SeqCst), 1);
        assert!(shared.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_members_waits_for_every_first_check() {
        let shared = Arc::new(MonitorShared::default());
        let members = vec![
            ServerAddress::from("db-0:27017"),
            ServerAddress::from("db-1:27017"),
        ];

        let background = shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            background.record(ServerDescription::primary("db-0:27017"));
            // A member that is not in the awaited list does not count
            background.record(ServerDescription::secondary("seed:27017"));
            tokio::time::sleep(Duration::from_millis(300)).await;
            background.record(ServerDescription::secondary("db-1:27017"));
        });

        let start = Instant::now();
        assert!(shared.await_members(&members, Duration::from_secs(10)).await);
        assert_eq!(start.elapsed(), Duration::from_millis(600));

        let snapshot = shared.snapshot();
        assert!(snapshot.get(&ServerAddress::from("db-0:27017")).is_some());
        assert!(snapshot.get(&ServerAddress::from("db-1:27017")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_members_gives_up_after_timeout() {
        let shared = Arc::new(MonitorShared::default());
        shared.record(ServerDescription::primary("db-0:27017"));
        let members = vec![
            ServerAddress::from("db-0:27017"),
            ServerAddress::from("db-1:27017"),
        ];

        let start = Instant::now();
        assert!(!shared.await_members(&members, Duration::from_secs(2)).await);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_connect_rejects_bad_uri() {
        let result = MongoTopologyMonitor::connect(MonitorSettings::new("https://db-0:27017")).await;
        assert!(matches!(result, Err(MongoSourceError::Driver(_))));
    }

    #[tokio::test]
    async fn test_connect_is_lazy() {
        // Nothing listens on this port; connect must still succeed
        let monitor = MongoTopologyMonitor::connect(MonitorSettings::new(
            "mongodb://127.0.0.1:1/?replicaSet=rs0",
        ))
        .await
        .unwrap();

        assert!(monitor.client.lock().is_none());
        assert!(monitor.snapshot().await.is_empty());
        assert_eq!(monitor.seed_hosts(), vec!["127.0.0.1:1".to_string()]);
    }

    #[tokio::test]
    async fn test_probe_unreachable_cluster() {
        let mut settings = MonitorSettings::new("mongodb://127.0.0.1:1/");
        settings.server_selection_timeout = Duration::from_millis(200);
        let monitor = MongoTopologyMonitor::connect(settings).await.unwrap();

        let err = monitor.probe().await.unwrap_err();
        assert!(matches!(err, HarnessError::ConnectivityFailure(_)));
        monitor.close().await;
        assert!(monitor.client.lock().is_none());
    }
}
