//! Connection Monitor
//!
//! Periodically combines control-port circuit details with the egress probe
//! into one [`ConnectionStatus`] snapshot and publishes it:
//! - First check runs immediately, then on a fixed interval
//! - Polls never overlap; late ticks are skipped
//! - Control-port failures never block the probe, and vice versa
//! - Snapshots are replaced wholesale, readers only ever see copies
//!
//! Stopping cancels the schedule only. A poll already in flight finishes and
//! publishes once more before the loop exits; a restarted schedule waits for
//! it before running its own first poll.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use onionlens_core::{CircuitDetails, ConnectionStatus, PrivacyMode, SharedClock, UNKNOWN_NICKNAME};
use onionlens_tor::{ProbeError, ProbeReport, SharedProbe, TorControlClient};

use crate::store::{put_json, SharedStore, STATUS_KEY};

/// Shortest accepted poll interval
const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Monitor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Seconds between checks
    pub interval_secs: u64,
    /// Bound on one egress check, in seconds
    pub probe_timeout_secs: u64,
    /// Query the control port for circuit details
    pub use_control_port: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            probe_timeout_secs: 10,
            use_control_port: true,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Merge circuit details and a probe outcome into a snapshot.
///
/// Hop fields come from the control port whenever it answered, even if the
/// probe failed; `connected`, `circuit_established` and `error` come from the
/// probe alone.
pub fn merge_status(
    details: Option<&CircuitDetails>,
    probe: Result<ProbeReport, ProbeError>,
    now: DateTime<Utc>,
) -> ConnectionStatus {
    let base = ConnectionStatus {
        last_checked: now,
        ..Default::default()
    }
    .with_circuit(details);

    match probe {
        Ok(report) => {
            let exit_country = details
                .and_then(|d| d.exit_node.as_ref())
                .and_then(|node| node.country.clone());
            let country = exit_country.or_else(|| {
                report
                    .observed_address
                    .as_ref()
                    .map(|_| UNKNOWN_NICKNAME.to_string())
            });

            ConnectionStatus {
                connected: report.reachable,
                circuit_established: report.reachable && report.confirmed_tor,
                country: country.filter(|_| report.reachable),
                ..base
            }
        }
        Err(e) => ConnectionStatus {
            error: Some(e.to_string()),
            ..base
        },
    }
}

struct MonitorInner {
    client: Option<Arc<TorControlClient>>,
    probe: SharedProbe,
    store: SharedStore,
    clock: SharedClock,
    probe_timeout: Duration,
    status: watch::Sender<ConnectionStatus>,
    /// Held for a whole poll cycle, across schedules and manual checks
    poll_guard: tokio::sync::Mutex<()>,
}

impl MonitorInner {
    async fn check_connection(&self) -> ConnectionStatus {
        let _poll = self.poll_guard.lock().await;
        debug!("Checking connection...");

        let details = match &self.client {
            Some(client) => match client.circuit_details().await {
                Ok(details) => details,
                Err(e) => {
                    warn!("Control port unavailable, continuing with egress check: {}", e);
                    None
                }
            },
            None => None,
        };

        let probe = match timeout(self.probe_timeout, self.probe.check()).await {
            Ok(result) => result,
            Err(_) => Err(ProbeError::Timeout(self.probe_timeout)),
        };
        if let Err(e) = &probe {
            warn!("Connectivity check failed: {}", e);
        }

        let status = merge_status(details.as_ref(), probe, self.clock.now());
        self.publish(&status);
        status
    }

    fn publish(&self, status: &ConnectionStatus) {
        self.status.send_replace(status.clone());

        if let Err(e) = put_json(self.store.as_ref(), STATUS_KEY, status) {
            warn!("Failed to write status snapshot: {}", e);
        }

        debug!(
            connected = status.connected,
            circuit_established = status.circuit_established,
            "Status published"
        );
    }

    async fn run(self: Arc<Self>, period: Duration, mut cancel: watch::Receiver<bool>) {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.changed() => break,
                _ = ticker.tick() => {}
            }

            // Not raced against cancellation: an in-flight poll always publishes
            self.check_connection().await;

            if *cancel.borrow() {
                break;
            }
        }

        debug!("Monitoring loop stopped");
    }
}

struct PollTask {
    cancel: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PollTask {
    fn cancel(self) {
        let _ = self.cancel.send(true);
    }
}

/// Periodic connection checker
pub struct ConnectionMonitor {
    inner: Arc<MonitorInner>,
    task: Mutex<Option<PollTask>>,
}

impl ConnectionMonitor {
    /// Create a monitor. Pass `None` as client to skip the control port.
    pub fn new(
        client: Option<Arc<TorControlClient>>,
        probe: SharedProbe,
        store: SharedStore,
        clock: SharedClock,
        config: &MonitorConfig,
    ) -> Self {
        let client = client.filter(|_| config.use_control_port);
        let (status, _) = watch::channel(ConnectionStatus::default());

        Self {
            inner: Arc::new(MonitorInner {
                client,
                probe,
                store,
                clock,
                probe_timeout: config.probe_timeout(),
                status,
                poll_guard: tokio::sync::Mutex::new(()),
            }),
            task: Mutex::new(None),
        }
    }

    /// Run one check now and publish its result
    pub async fn check_connection(&self) -> ConnectionStatus {
        self.inner.check_connection().await
    }

    /// Latest published snapshot
    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.borrow().clone()
    }

    /// Receive every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    /// Start periodic checks, replacing any running schedule.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_monitoring(&self, period: Duration) {
        let period = period.max(MIN_INTERVAL);
        let mut task = self.task.lock();

        if let Some(previous) = task.take() {
            debug!("Replacing running monitoring schedule");
            previous.cancel();
        }

        let (cancel, cancel_rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&self.inner).run(period, cancel_rx));
        *task = Some(PollTask { cancel, handle });

        info!("Monitoring started (every {:?})", period);
    }

    /// Stop periodic checks
    pub fn stop_monitoring(&self) {
        if let Some(task) = self.task.lock().take() {
            task.cancel();
            info!("Monitoring stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Poll while the privacy mode is `tor`, stay idle otherwise.
    ///
    /// The returned task ends when the mode sender is dropped.
    pub fn follow_mode(
        self: &Arc<Self>,
        mut modes: watch::Receiver<PrivacyMode>,
        period: Duration,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                let mode = *modes.borrow_and_update();
                if mode == PrivacyMode::Tor {
                    if !monitor.is_monitoring() {
                        monitor.start_monitoring(period);
                    }
                } else {
                    monitor.stop_monitoring();
                }

                if modes.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.cancel();
        }
    }
}
