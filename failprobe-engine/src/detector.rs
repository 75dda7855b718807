//! Topology change detection
//!
//! [`ChangeDetector`] classifies every notification delivered by the event
//! source against one [`PolicyKind`]. The first match of an attempt is handed
//! to that attempt's [`MatchReceiver`] through a single-slot channel; every
//! later match of the same attempt is dropped.

use failprobe_core::{
    ChangeEvent, HarnessError, PolicyKind, ServerAddress, ServerDescription, TopologyListener,
    TopologyNotification, TopologySnapshot,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info};

/// Lifetime of the version baselines recorded by [`PolicyKind::VersionBump`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BaselineScope {
    /// Cleared at the start of every attempt
    #[default]
    PerAttempt,
    /// Recorded once and kept for the whole run
    PerRun,
}

#[derive(Default)]
struct DetectorState {
    baselines: HashMap<ServerAddress, ServerDescription>,
    initial_primary: Option<ServerAddress>,
    slot: Option<mpsc::Sender<ChangeEvent>>,
    matched: bool,
    attempt: u32,
}

/// Classifies topology notifications and publishes the first match of each
/// attempt
pub struct ChangeDetector {
    policy: PolicyKind,
    scope: BaselineScope,
    state: Mutex<DetectorState>,
}

impl ChangeDetector {
    pub fn new(policy: PolicyKind, scope: BaselineScope) -> Self {
        Self {
            policy,
            scope,
            state: Mutex::new(DetectorState::default()),
        }
    }

    pub fn policy(&self) -> PolicyKind {
        self.policy
    }

    pub fn scope(&self) -> BaselineScope {
        self.scope
    }

    /// Fix the primary that [`PolicyKind::PrimaryChange`] compares against
    ///
    /// Only the first call has an effect; returns whether it was applied.
    pub fn seed_primary(&self, primary: ServerAddress) -> bool {
        let mut state = self.state.lock();
        if state.initial_primary.is_some() {
            return false;
        }
        info!("Initial primary is {}", primary);
        state.initial_primary = Some(primary);
        true
    }

    pub fn initial_primary(&self) -> Option<ServerAddress> {
        self.state.lock().initial_primary.clone()
    }

    /// Record version baselines from a snapshot without replacing any
    /// baseline that is already known
    pub fn seed_baselines(&self, snapshot: &TopologySnapshot) {
        if self.policy != PolicyKind::VersionBump {
            return;
        }
        let mut state = self.state.lock();
        for description in snapshot.servers.values() {
            if description.topology_version.is_some() {
                state
                    .baselines
                    .entry(description.address.clone())
                    .or_insert_with(|| description.clone());
            }
        }
    }

    pub fn baseline(&self, address: &ServerAddress) -> Option<ServerDescription> {
        self.state.lock().baselines.get(address).cloned()
    }

    /// Reset per-attempt state and open a fresh match slot
    pub fn begin_attempt(&self) -> MatchReceiver {
        let (tx, rx) = mpsc::channel(1);
        let mut state = self.state.lock();
        if self.scope == BaselineScope::PerAttempt {
            state.baselines.clear();
        }
        state.matched = false;
        state.slot = Some(tx);
        state.attempt += 1;
        debug!("Detector armed for attempt {}", state.attempt);
        MatchReceiver {
            attempt: state.attempt,
            rx,
        }
    }

    /// Close the current slot; notifications until the next
    /// [`begin_attempt`](Self::begin_attempt) never produce a match
    pub fn end_attempt(&self) {
        self.state.lock().slot = None;
    }

    /// Whether the current attempt already published a match
    pub fn matched(&self) -> bool {
        self.state.lock().matched
    }

    /// Classify one notification; never blocks on I/O
    pub fn observe(&self, notification: &TopologyNotification) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let baseline = match self.policy {
            PolicyKind::VersionBump => {
                let Some(version) = notification.new.topology_version.as_ref() else {
                    return;
                };
                match state.baselines.get(&notification.address) {
                    None => {
                        debug!(
                            "Recorded baseline for {}: {}",
                            notification.address, notification.new
                        );
                        state
                            .baselines
                            .insert(notification.address.clone(), notification.new.clone());
                        None
                    }
                    Some(baseline) if baseline.topology_version.as_ref() != Some(version) => {
                        Some(baseline.clone())
                    }
                    Some(_) => None,
                }
            }
            PolicyKind::ReadabilityLoss => (notification.previous.server_type_known
                && !notification.new.is_readable)
                .then(|| notification.previous.clone()),
            PolicyKind::PrimaryChange => match state.initial_primary.as_ref() {
                Some(primary) if notification.new.is_writable && notification.address != *primary => {
                    Some(notification.previous.clone())
                }
                _ => None,
            },
        };

        let Some(baseline) = baseline else {
            return;
        };
        if state.matched {
            return;
        }
        let Some(slot) = state.slot.as_ref() else {
            debug!("Ignoring match between attempts: {}", notification);
            return;
        };

        let event = ChangeEvent {
            policy: self.policy,
            baseline,
            triggering: notification.clone(),
        };
        if slot.try_send(event).is_ok() {
            info!(
                "Attempt {} matched {}: {}",
                state.attempt, self.policy, notification
            );
            state.matched = true;
        }
    }
}

impl TopologyListener for ChangeDetector {
    fn on_description_changed(&self, notification: &TopologyNotification) {
        self.observe(notification);
    }
}

/// Receiving end of one attempt's match slot
pub struct MatchReceiver {
    attempt: u32,
    rx: mpsc::Receiver<ChangeEvent>,
}

impl MatchReceiver {
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Wait for the attempt's match, failing with
    /// [`HarnessError::AttemptTimeout`] once `deadline` elapses
    pub async fn await_match(&mut self, deadline: Duration) -> Result<ChangeEvent, HarnessError> {
        match timeout(deadline, self.rx.recv()).await {
            Ok(Some(event)) => Ok(event),
            Ok(None) | Err(_) => Err(HarnessError::AttemptTimeout {
                attempt: self.attempt,
                deadline,
            }),
        }
    }

    /// Take a match that is already waiting, if any
    pub fn try_take(&mut self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use failprobe_core::TopologyVersion;
    use proptest::prelude::*;

    fn versioned(address: &str, counter: i64) -> ServerDescription {
        ServerDescription::secondary(address).with_topology_version(TopologyVersion::new("p1", counter))
    }

    fn notify(previous: ServerDescription, new: ServerDescription) -> TopologyNotification {
        TopologyNotification::new(previous, new)
    }

    #[test]
    fn test_version_bump_matches_against_first_seen_baseline() {
        let detector = ChangeDetector::new(PolicyKind::VersionBump, BaselineScope::PerAttempt);
        let mut rx = detector.begin_attempt();

        detector.observe(&notify(ServerDescription::unknown("a:1"), versioned("a:1", 1)));
        assert!(rx.try_take().is_none());

        detector.observe(&notify(versioned("a:1", 1), versioned("a:1", 2)));
        let event = rx.try_take().unwrap();
        assert_eq!(event.policy, PolicyKind::VersionBump);
        assert_eq!(event.baseline.topology_version, Some(TopologyVersion::new("p1", 1)));
        assert_eq!(
            event.triggering.new.topology_version,
            Some(TopologyVersion::new("p1", 2))
        );
    }

    #[test]
    fn test_version_bump_ignores_missing_versions() {
        let detector = ChangeDetector::new(PolicyKind::VersionBump, BaselineScope::PerAttempt);
        let mut rx = detector.begin_attempt();

        detector.observe(&notify(
            ServerDescription::unknown("a:1"),
            ServerDescription::secondary("a:1"),
        ));
        assert!(detector.baseline(&ServerAddress::from("a:1")).is_none());

        detector.observe(&notify(ServerDescription::secondary("a:1"), versioned("a:1", 7)));
        assert!(rx.try_take().is_none());
        assert_eq!(
            detector
                .baseline(&ServerAddress::from("a:1"))
                .and_then(|b| b.topology_version),
            Some(TopologyVersion::new("p1", 7))
        );
    }

    #[test]
    fn test_baseline_scope() {
        let per_attempt = ChangeDetector::new(PolicyKind::VersionBump, BaselineScope::PerAttempt);
        let per_run = ChangeDetector::new(PolicyKind::VersionBump, BaselineScope::PerRun);

        for detector in [&per_attempt, &per_run] {
            let _rx = detector.begin_attempt();
            detector.observe(&notify(ServerDescription::unknown("a:1"), versioned("a:1", 1)));
            detector.end_attempt();
        }

        let mut rx = per_attempt.begin_attempt();
        per_attempt.observe(&notify(versioned("a:1", 1), versioned("a:1", 2)));
        assert!(rx.try_take().is_none(), "per-attempt baseline starts over");

        let mut rx = per_run.begin_attempt();
        per_run.observe(&notify(versioned("a:1", 1), versioned("a:1", 2)));
        assert!(rx.try_take().is_some(), "per-run baseline survives attempts");
    }

    #[test]
    fn test_seed_baselines_keeps_first_seen() {
        let detector = ChangeDetector::new(PolicyKind::VersionBump, BaselineScope::PerAttempt);
        let mut rx = detector.begin_attempt();
        detector.observe(&notify(ServerDescription::unknown("a:1"), versioned("a:1", 1)));

        detector.seed_baselines(&TopologySnapshot::new(vec![
            versioned("a:1", 5),
            versioned("b:1", 3),
            ServerDescription::unknown("c:1"),
        ]));

        let a = detector.baseline(&ServerAddress::from("a:1")).unwrap();
        assert_eq!(a.topology_version, Some(TopologyVersion::new("p1", 1)));
        assert!(detector.baseline(&ServerAddress::from("b:1")).is_some());
        assert!(detector.baseline(&ServerAddress::from("c:1")).is_none());

        detector.observe(&notify(versioned("b:1", 3), versioned("b:1", 4)));
        assert!(rx.try_take().is_some());
    }

    #[test]
    fn test_primary_change() {
        let detector = ChangeDetector::new(PolicyKind::PrimaryChange, BaselineScope::default());
        assert!(detector.seed_primary(ServerAddress::from("a:1")));
        assert!(!detector.seed_primary(ServerAddress::from("b:1")));
        assert_eq!(detector.initial_primary(), Some(ServerAddress::from("a:1")));

        let mut rx = detector.begin_attempt();
        detector.observe(&notify(
            ServerDescription::unknown("a:1"),
            ServerDescription::primary("a:1"),
        ));
        assert!(rx.try_take().is_none());

        let elected = notify(
            ServerDescription::secondary("b:1"),
            ServerDescription::primary("b:1"),
        );
        detector.observe(&elected);
        detector.observe(&elected);
        let event = rx.try_take().unwrap();
        assert_eq!(event.triggering.address, ServerAddress::from("b:1"));
        assert!(rx.try_take().is_none());
        assert!(detector.matched());
    }

    #[test]
    fn test_primary_change_without_seed_never_matches() {
        let detector = ChangeDetector::new(PolicyKind::PrimaryChange, BaselineScope::default());
        let mut rx = detector.begin_attempt();
        detector.observe(&notify(
            ServerDescription::secondary("b:1"),
            ServerDescription::primary("b:1"),
        ));
        assert!(rx.try_take().is_none());
    }

    #[test]
    fn test_readability_loss() {
        let detector = ChangeDetector::new(PolicyKind::ReadabilityLoss, BaselineScope::default());
        let mut rx = detector.begin_attempt();

        // Discovery: unknown -> known never matches
        detector.observe(&notify(
            ServerDescription::unknown("a:1"),
            ServerDescription::secondary("a:1"),
        ));
        detector.observe(&notify(
            ServerDescription::unknown("b:1"),
            ServerDescription::unknown("b:1"),
        ));
        assert!(rx.try_take().is_none());

        detector.observe(&notify(
            ServerDescription::secondary("a:1"),
            ServerDescription::unknown("a:1"),
        ));
        let event = rx.try_take().unwrap();
        assert_eq!(event.baseline, ServerDescription::secondary("a:1"));
    }

    #[test]
    fn test_matches_between_attempts_are_not_carried_over() {
        let detector = ChangeDetector::new(PolicyKind::ReadabilityLoss, BaselineScope::default());
        let mut first = detector.begin_attempt();
        detector.end_attempt();

        let lost = notify(
            ServerDescription::secondary("a:1"),
            ServerDescription::unknown("a:1"),
        );
        detector.observe(&lost);
        assert!(first.try_take().is_none());

        let mut second = detector.begin_attempt();
        assert_eq!(second.attempt(), 2);
        assert!(second.try_take().is_none());
        assert!(!detector.matched());

        detector.observe(&lost);
        assert!(second.try_take().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_match_times_out() {
        let detector = ChangeDetector::new(PolicyKind::VersionBump, BaselineScope::default());
        let mut rx = detector.begin_attempt();
        let start = tokio::time::Instant::now();

        let err = rx.await_match(Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(
            err,
            HarnessError::AttemptTimeout { attempt: 1, deadline } if deadline == Duration::from_secs(5)
        ));
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_await_match_from_another_thread() {
        let detector = std::sync::Arc::new(ChangeDetector::new(
            PolicyKind::ReadabilityLoss,
            BaselineScope::default(),
        ));
        let mut rx = detector.begin_attempt();

        let observer = detector.clone();
        std::thread::spawn(move || {
            observer.observe(&TopologyNotification::new(
                ServerDescription::primary("a:1"),
                ServerDescription::unknown("a:1"),
            ));
        });

        let event = rx.await_match(Duration::from_secs(10)).await.unwrap();
        assert_eq!(event.policy, PolicyKind::ReadabilityLoss);
    }

    fn version_sequence() -> impl Strategy<Value = Vec<(u8, i64)>> {
        prop::collection::vec((0u8..4, 0i64..3), 1..40)
    }

    proptest! {
        #[test]
        fn prop_first_match_has_differing_versions(steps in version_sequence()) {
            let detector = ChangeDetector::new(PolicyKind::VersionBump, BaselineScope::PerAttempt);
            let mut rx = detector.begin_attempt();
            let mut first_seen: HashMap<u8, i64> = HashMap::new();
            let mut expect_match = false;

            for (server, counter) in &steps {
                let address = format!("m{}:27017", server);
                let baseline = *first_seen.entry(*server).or_insert(*counter);
                expect_match |= baseline != *counter;
                detector.observe(&notify(
                    ServerDescription::unknown(address.as_str()),
                    versioned(&address, *counter),
                ));
            }

            match rx.try_take() {
                Some(event) => {
                    prop_assert!(expect_match);
                    prop_assert_ne!(
                        event.baseline.topology_version,
                        event.triggering.new.topology_version
                    );
                }
                None => prop_assert!(!expect_match),
            }
        }

        #[test]
        fn prop_constant_versions_never_match(servers in prop::collection::vec(0u8..5, 1..40)) {
            let detector = ChangeDetector::new(PolicyKind::VersionBump, BaselineScope::PerAttempt);
            let mut rx = detector.begin_attempt();

            for server in servers {
                let address = format!("m{}:27017", server);
                detector.observe(&notify(
                    versioned(&address, 9),
                    versioned(&address, 9),
                ));
            }

            prop_assert!(rx.try_take().is_none());
        }
    }
}
