//! Load ramp controller
//!
//! A [`LoadRampController`] drives one background task that issues bursts
//! through a [`LoadInvoker`] until it is told to stop. Concurrency follows a
//! [`ConcurrencySchedule`]; stopping is cooperative and never interrupts a
//! burst in flight.

use failprobe_core::{LoadInvoker, RampMode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

/// Everything one ramp needs to run
#[derive(Debug, Clone, PartialEq)]
pub struct RampSettings {
    pub target: Url,
    /// Upper bound for the concurrency of any burst
    pub ceiling: u32,
    pub mode: RampMode,
    pub inter_burst_pause: Duration,
    /// Requests per burst = concurrency × multiplier
    pub requests_per_connection_multiplier: u32,
}

impl RampSettings {
    pub fn schedule(&self) -> ConcurrencySchedule {
        ConcurrencySchedule::new(self.mode, self.ceiling)
    }
}

/// Concurrency of successive bursts
///
/// The sequence is infinite: once the ceiling is reached every further
/// burst stays at the ceiling.
#[derive(Debug, Clone)]
pub struct ConcurrencySchedule {
    mode: RampMode,
    ceiling: u32,
    previous: Option<u32>,
}

impl ConcurrencySchedule {
    pub fn new(mode: RampMode, ceiling: u32) -> Self {
        Self {
            mode,
            ceiling,
            previous: None,
        }
    }
}

impl Iterator for ConcurrencySchedule {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        let next = match (self.mode, self.previous) {
            (RampMode::Flat, _) => self.ceiling,
            (RampMode::LinearRamp { initial, .. }, None) => initial.min(self.ceiling),
            (RampMode::LinearRamp { step, .. }, Some(previous)) => {
                previous.saturating_add(step).min(self.ceiling)
            }
        };
        self.previous = Some(next);
        Some(next)
    }
}

/// What a finished ramp did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RampSummary {
    pub bursts: u64,
    pub peak_concurrency: u32,
    pub failed_bursts: u64,
}

/// Owns the background burst loop of one attempt
pub struct LoadRampController {
    settings: RampSettings,
    invoker: Arc<dyn LoadInvoker>,
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<RampSummary>>,
}

impl LoadRampController {
    pub fn new(settings: RampSettings, invoker: Arc<dyn LoadInvoker>) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            settings,
            invoker,
            stop_tx,
            handle: None,
        }
    }

    pub fn settings(&self) -> &RampSettings {
        &self.settings
    }

    /// Spawn the burst loop and return immediately
    pub fn start(&mut self) {
        if self.handle.is_some() {
            warn!("Load ramp already started");
            return;
        }

        info!(
            "Starting load ramp against {} ({}, ceiling {})",
            self.settings.target, self.settings.mode, self.settings.ceiling
        );
        let stop_rx = self.stop_tx.subscribe();
        let settings = self.settings.clone();
        let invoker = self.invoker.clone();
        self.handle = Some(tokio::spawn(run_ramp(settings, invoker, stop_rx)));
    }

    /// Ask the loop to exit after its current burst
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    /// Wait for the loop to exit
    pub async fn join(&mut self) -> RampSummary {
        let Some(handle) = self.handle.take() else {
            return RampSummary::default();
        };
        match handle.await {
            Ok(summary) => {
                info!(
                    "Load ramp finished after {} bursts (peak concurrency {}, {} failed)",
                    summary.bursts, summary.peak_concurrency, summary.failed_bursts
                );
                summary
            }
            Err(e) => {
                warn!("Load ramp task ended abnormally: {}", e);
                RampSummary::default()
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

async fn run_ramp(
    settings: RampSettings,
    invoker: Arc<dyn LoadInvoker>,
    mut stop_rx: watch::Receiver<bool>,
) -> RampSummary {
    let mut summary = RampSummary::default();
    let multiplier = u64::from(settings.requests_per_connection_multiplier);

    for concurrency in settings.schedule() {
        if *stop_rx.borrow_and_update() {
            break;
        }

        let total_requests = u64::from(concurrency) * multiplier;
        debug!(
            "Burst {}: {} requests at concurrency {}",
            summary.bursts + 1,
            total_requests,
            concurrency
        );

        match invoker
            .invoke(&settings.target, concurrency, total_requests)
            .await
        {
            Ok(report) if report.exit_status.is_success() => {
                debug!("Burst finished in {:?}", report.elapsed);
            }
            Ok(report) => {
                summary.failed_bursts += 1;
                warn!(
                    "Burst at concurrency {} failed: {:?}",
                    concurrency, report.exit_status
                );
            }
            Err(e) => {
                summary.failed_bursts += 1;
                warn!("Burst at concurrency {} failed: {}", concurrency, e);
            }
        }
        summary.bursts += 1;
        summary.peak_concurrency = summary.peak_concurrency.max(concurrency);

        tokio::select! {
            _ = tokio::time::sleep(settings.inter_burst_pause) => {}
            changed = stop_rx.changed() => {
                // Controller dropped without stopping
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingInvoker;

    fn settings(mode: RampMode, ceiling: u32) -> RampSettings {
        RampSettings {
            target: Url::parse("http://127.0.0.1:8080/").unwrap(),
            ceiling,
            mode,
            inter_burst_pause: Duration::from_millis(100),
            requests_per_connection_multiplier: 2,
        }
    }

    #[test]
    fn test_linear_schedule_reaches_ceiling_after_twenty_bursts() {
        let schedule = ConcurrencySchedule::new(
            RampMode::LinearRamp {
                step: 50,
                initial: 50,
            },
            1000,
        );
        let values: Vec<u32> = schedule.take(30).collect();

        assert_eq!(values[0], 50);
        assert_eq!(values[18], 950);
        assert_eq!(values[19], 1000);
        assert!(values.iter().all(|c| *c <= 1000));
        assert!(values[19..].iter().all(|c| *c == 1000));
    }

    #[test]
    fn test_linear_schedule_clamps_initial_and_overshoot() {
        let values: Vec<u32> = ConcurrencySchedule::new(
            RampMode::LinearRamp {
                step: 300,
                initial: 2000,
            },
            1000,
        )
        .take(3)
        .collect();
        assert_eq!(values, vec![1000, 1000, 1000]);

        let values: Vec<u32> = ConcurrencySchedule::new(
            RampMode::LinearRamp {
                step: 400,
                initial: 100,
            },
            1000,
        )
        .take(4)
        .collect();
        assert_eq!(values, vec![100, 500, 900, 1000]);
    }

    #[test]
    fn test_flat_schedule() {
        let values: Vec<u32> = ConcurrencySchedule::new(RampMode::Flat, 250).take(5).collect();
        assert_eq!(values, vec![250; 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ramp_issues_bursts_until_stopped() {
        let invoker = Arc::new(RecordingInvoker::new());
        let mut ramp = LoadRampController::new(
            settings(
                RampMode::LinearRamp {
                    step: 50,
                    initial: 50,
                },
                1000,
            ),
            invoker.clone(),
        );

        ramp.start();
        assert!(ramp.is_running());
        tokio::time::sleep(Duration::from_millis(2950)).await;
        ramp.stop();
        let summary = ramp.join().await;

        let calls = invoker.calls();
        assert_eq!(summary.bursts, calls.len() as u64);
        assert!(summary.bursts >= 25, "only {} bursts", summary.bursts);
        assert_eq!(summary.peak_concurrency, 1000);
        assert_eq!(summary.failed_bursts, 0);
        assert_eq!(calls[19].concurrency, 1000);
        assert!(calls.iter().all(|c| c.concurrency <= 1000));
        assert!(calls.iter().all(|c| c.total_requests == u64::from(c.concurrency) * 2));
        assert!(!ramp.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_burst_in_flight() {
        let invoker = Arc::new(RecordingInvoker::new().with_burst_duration(Duration::from_secs(5)));
        let mut ramp = LoadRampController::new(settings(RampMode::Flat, 10), invoker.clone());

        ramp.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let stopped_at = tokio::time::Instant::now();
        ramp.stop();
        let summary = ramp.join().await;

        assert_eq!(summary.bursts, 1);
        assert_eq!(invoker.completed(), 1);
        assert_eq!(stopped_at.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_bursts_are_absorbed() {
        let invoker = Arc::new(RecordingInvoker::failing("connection refused"));
        let mut ramp = LoadRampController::new(settings(RampMode::Flat, 10), invoker.clone());

        ramp.start();
        tokio::time::sleep(Duration::from_millis(450)).await;
        ramp.stop();
        let summary = ramp.join().await;

        assert!(summary.bursts >= 4);
        assert_eq!(summary.failed_bursts, summary.bursts);
    }

    #[tokio::test]
    async fn test_join_without_start() {
        let mut ramp = LoadRampController::new(
            settings(RampMode::Flat, 10),
            Arc::new(RecordingInvoker::new()),
        );
        assert!(!ramp.is_running());
        assert_eq!(ramp.join().await, RampSummary::default());
    }
}
