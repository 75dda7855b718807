//! Test doubles for the engine's collaborators
//!
//! [`ScriptedEventSource`] replays a fixed timeline of topology changes and
//! [`RecordingInvoker`] records bursts instead of sending requests. Both are
//! driven by tokio time, so they work under a paused clock.

use async_trait::async_trait;
use failprobe_core::{
    BurstReport, BurstStatus, ClusterEventSource, HarnessError, LoadInvoker, Result,
    ServerAddress, ServerDescription, TopologyListener, TopologyNotification, TopologySnapshot,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use url::Url;

/// One burst as seen by [`RecordingInvoker`]
#[derive(Debug, Clone)]
pub struct RecordedBurst {
    pub concurrency: u32,
    pub total_requests: u64,
    pub started_at: Instant,
}

/// Load invoker that records every burst and optionally takes time or fails
#[derive(Default)]
pub struct RecordingInvoker {
    calls: Mutex<Vec<RecordedBurst>>,
    completed: AtomicU64,
    burst_duration: Duration,
    failure: Option<String>,
}

impl RecordingInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every burst fails with [`HarnessError::Load`]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_burst_duration(mut self, duration: Duration) -> Self {
        self.burst_duration = duration;
        self
    }

    pub fn calls(&self) -> Vec<RecordedBurst> {
        self.calls.lock().clone()
    }

    /// Bursts that ran to completion
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn max_concurrency(&self) -> Option<u32> {
        self.calls.lock().iter().map(|c| c.concurrency).max()
    }
}

#[async_trait]
impl LoadInvoker for RecordingInvoker {
    async fn invoke(
        &self,
        _target: &Url,
        concurrency: u32,
        total_requests: u64,
    ) -> Result<BurstReport> {
        self.calls.lock().push(RecordedBurst {
            concurrency,
            total_requests,
            started_at: Instant::now(),
        });

        if !self.burst_duration.is_zero() {
            tokio::time::sleep(self.burst_duration).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);

        match &self.failure {
            Some(message) => Err(HarnessError::Load(message.clone())),
            None => Ok(BurstReport {
                elapsed: self.burst_duration,
                exit_status: BurstStatus::Success,
                succeeded: Some(total_requests),
                failed: Some(0),
            }),
        }
    }
}

/// A description that takes effect `at` after the probe
#[derive(Debug, Clone)]
pub struct ScriptedChange {
    pub at: Duration,
    pub description: ServerDescription,
}

#[derive(Default)]
struct SourceShared {
    listeners: Mutex<Vec<Arc<dyn TopologyListener>>>,
    current: Mutex<BTreeMap<ServerAddress, ServerDescription>>,
    delivered: AtomicUsize,
}

impl SourceShared {
    fn listeners(&self) -> Vec<Arc<dyn TopologyListener>> {
        self.listeners.lock().clone()
    }

    fn apply(&self, description: ServerDescription) {
        let previous = {
            let mut current = self.current.lock();
            current
                .insert(description.address.clone(), description.clone())
                .unwrap_or_else(|| ServerDescription::unknown(description.address.clone()))
        };

        let notification = TopologyNotification::new(previous, description);
        for listener in self.listeners() {
            listener.on_description_changed(&notification);
        }
        self.delivered.fetch_add(1, Ordering::SeqCst);
    }
}

/// Event source that replays a timeline of topology changes
///
/// `probe()` delivers the initial members (as changes from unknown) and
/// starts the timeline; offsets are measured from the probe.
pub struct ScriptedEventSource {
    members: Vec<ServerDescription>,
    script: Vec<ScriptedChange>,
    probe_error: Option<String>,
    shared: Arc<SourceShared>,
    task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ScriptedEventSource {
    pub fn builder() -> ScriptedEventSourceBuilder {
        ScriptedEventSourceBuilder::default()
    }

    /// Source with no members and no events
    pub fn silent() -> Self {
        Self::builder().build()
    }

    /// Notifications delivered so far
    pub fn delivered(&self) -> usize {
        self.shared.delivered.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.shared.listeners.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterEventSource for ScriptedEventSource {
    fn subscribe(&self, listener: Arc<dyn TopologyListener>) {
        self.shared.listeners.lock().push(listener);
    }

    async fn probe(&self) -> Result<()> {
        if let Some(message) = &self.probe_error {
            return Err(HarnessError::ConnectivityFailure(message.clone()));
        }

        let mut task = self.task.lock();
        if task.is_some() {
            return Ok(());
        }

        for member in &self.members {
            for listener in self.shared.listeners() {
                listener.on_server_opened(&member.address);
            }
            self.shared.apply(member.clone());
        }

        let shared = self.shared.clone();
        let mut script = self.script.clone();
        script.sort_by_key(|change| change.at);
        let start = Instant::now();
        *task = Some(tokio::spawn(async move {
            for change in script {
                tokio::time::sleep_until(start + change.at).await;
                shared.apply(change.description);
            }
        }));

        Ok(())
    }

    async fn snapshot(&self) -> TopologySnapshot {
        TopologySnapshot::new(self.shared.current.lock().values().cloned())
    }

    async fn resolve_primary(&self) -> Result<Option<ServerAddress>> {
        Ok(self.snapshot().await.writable().cloned())
    }

    async fn close(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        if !self.closed.swap(true, Ordering::SeqCst) {
            let addresses: Vec<ServerAddress> =
                self.shared.current.lock().keys().cloned().collect();
            for address in addresses {
                for listener in self.shared.listeners() {
                    listener.on_server_closed(&address);
                }
            }
        }
    }
}

/// Builder for [`ScriptedEventSource`]
#[derive(Default)]
pub struct ScriptedEventSourceBuilder {
    members: Vec<ServerDescription>,
    script: Vec<ScriptedChange>,
    probe_error: Option<String>,
}

impl ScriptedEventSourceBuilder {
    /// Member known from the probe onwards
    pub fn member(mut self, description: ServerDescription) -> Self {
        self.members.push(description);
        self
    }

    /// Replace a member's description `at` after the probe
    pub fn change_at(mut self, at: Duration, description: ServerDescription) -> Self {
        self.script.push(ScriptedChange { at, description });
        self
    }

    /// Make `probe()` fail with [`HarnessError::ConnectivityFailure`]
    pub fn failing_probe(mut self, message: impl Into<String>) -> Self {
        self.probe_error = Some(message.into());
        self
    }

    pub fn build(self) -> ScriptedEventSource {
        ScriptedEventSource {
            members: self.members,
            script: self.script,
            probe_error: self.probe_error,
            shared: Arc::new(SourceShared::default()),
            task: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use failprobe_core::TopologyVersion;

    #[derive(Default)]
    struct Collect {
        seen: Mutex<Vec<TopologyNotification>>,
        closed: AtomicUsize,
    }

    impl TopologyListener for Collect {
        fn on_description_changed(&self, notification: &TopologyNotification) {
            self.seen.lock().push(notification.clone());
        }

        fn on_server_closed(&self, _address: &ServerAddress) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_source_replays_timeline() {
        let source = ScriptedEventSource::builder()
            .member(ServerDescription::primary("a:1").with_topology_version(TopologyVersion::new("p", 1)))
            .member(ServerDescription::secondary("b:1"))
            .change_at(Duration::from_secs(2), ServerDescription::secondary("a:1"))
            .build();
        let collect = Arc::new(Collect::default());
        source.subscribe(collect.clone());

        source.probe().await.unwrap();
        assert_eq!(source.delivered(), 2);
        assert_eq!(
            source.resolve_primary().await.unwrap(),
            Some(ServerAddress::from("a:1"))
        );

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(source.delivered(), 3);
        let seen = collect.seen.lock().clone();
        assert_eq!(seen[2].previous.role(), "Writable");
        assert_eq!(seen[2].new.role(), "Readable");
        assert_eq!(source.resolve_primary().await.unwrap(), None);

        source.close().await;
        assert!(source.is_closed());
        assert_eq!(collect.closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failing_probe() {
        let source = ScriptedEventSource::builder().failing_probe("no route to host").build();
        assert!(matches!(
            source.probe().await,
            Err(HarnessError::ConnectivityFailure(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recording_invoker() {
        let invoker = RecordingInvoker::new().with_burst_duration(Duration::from_millis(10));
        let url = Url::parse("http://localhost/").unwrap();

        let report = invoker.invoke(&url, 3, 6).await.unwrap();
        assert_eq!(report.succeeded, Some(6));
        assert_eq!(invoker.completed(), 1);
        assert_eq!(invoker.max_concurrency(), Some(3));

        let failing = RecordingInvoker::failing("boom");
        assert!(failing.invoke(&url, 1, 2).await.is_err());
        assert_eq!(failing.calls().len(), 1);
    }
}
