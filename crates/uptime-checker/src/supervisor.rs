//! Worker supervisor — one background polling loop per monitor.
//!
//! The `WorkerSupervisor` keeps a registry of running workers keyed by
//! monitor id, each with its own shutdown signal. Workers capture their
//! monitor's url, interval, and timeout when they start; a configuration
//! edit takes effect only through [`WorkerSupervisor::restart`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use uptime_state::{Check, Monitor, MonitorId, MonitorState, StateError};

use crate::alerter::{Alerter, Delivery};
use crate::prober::{ProbeError, Prober};
use crate::storage::SharedStore;
use crate::sweeper::RetentionSweeper;
use crate::tracker::{Transition, next_state};

/// Delay before a worker's first probe.
pub const STARTUP_STAGGER: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to list monitors: {0}")]
    Startup(#[source] StateError),

    #[error("monitor {0} already has a running worker")]
    AlreadyRunning(MonitorId),

    #[error("monitor {id}: {source}")]
    Probe {
        id: MonitorId,
        #[source]
        source: ProbeError,
    },

    #[error("supervisor is stopped")]
    Stopped,
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Handle to one background task.
struct WorkerSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl WorkerSlot {
    /// Signal the task to exit after its current tick.
    fn cancel(self) -> JoinHandle<()> {
        let _ = self.shutdown_tx.send(true);
        self.handle
    }
}

#[derive(Default)]
struct Registry {
    /// Active workers: monitor_id → slot.
    workers: HashMap<MonitorId, WorkerSlot>,
    /// Cancelled workers that may still be finishing a tick.
    retired: Vec<(MonitorId, JoinHandle<()>)>,
    sweeper: Option<WorkerSlot>,
    stopped: bool,
}

impl Registry {
    fn retire(&mut self, id: MonitorId, slot: WorkerSlot) {
        self.retired.retain(|(_, handle)| !handle.is_finished());
        self.retired.push((id, slot.cancel()));
    }

    /// Take the still-running retired loops for `id`, cancelling the
    /// active one too. A replacement worker waits on these before probing.
    fn take_previous(&mut self, id: MonitorId) -> Vec<JoinHandle<()>> {
        let mut previous = Vec::new();
        let mut kept = Vec::with_capacity(self.retired.len());
        for (retired_id, handle) in self.retired.drain(..) {
            if retired_id == id && !handle.is_finished() {
                previous.push(handle);
            } else if !handle.is_finished() {
                kept.push((retired_id, handle));
            }
        }
        self.retired = kept;
        if let Some(active) = self.workers.remove(&id) {
            previous.push(active.cancel());
        }
        previous
    }
}

/// Owns the per-monitor polling loops and the retention sweeper.
pub struct WorkerSupervisor {
    store: SharedStore,
    alerter: Alerter,
    stagger: Duration,
    registry: Mutex<Registry>,
}

impl WorkerSupervisor {
    pub fn new(store: SharedStore, alerter: Alerter) -> Self {
        Self {
            store,
            alerter,
            stagger: STARTUP_STAGGER,
            registry: Mutex::new(Registry::default()),
        }
    }

    /// Override the startup stagger (for testing).
    pub fn with_stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    /// Start a worker for every stored monitor, plus the retention sweeper.
    ///
    /// Listing the monitors is the only fatal step. A monitor whose worker
    /// cannot be built is logged and skipped. Returns the number started.
    pub async fn start(&self) -> SupervisorResult<usize> {
        let monitors = self.store.list_monitors().map_err(SupervisorError::Startup)?;

        let mut registry = self.registry.lock().await;
        if registry.stopped {
            return Err(SupervisorError::Stopped);
        }

        let mut started = 0;
        for monitor in &monitors {
            if registry.workers.contains_key(&monitor.id) {
                warn!(monitor_id = monitor.id, "worker already running, not starting twice");
                continue;
            }
            match self.build_worker(monitor) {
                Ok(worker) => {
                    let previous = registry.take_previous(monitor.id);
                    registry
                        .workers
                        .insert(monitor.id, self.launch(worker, previous));
                    started += 1;
                }
                Err(e) => error!(error = %e, "failed to start monitor worker"),
            }
        }

        if registry.sweeper.is_none() {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let sweeper = RetentionSweeper::new(self.store.clone());
            let handle = tokio::spawn(async move { sweeper.run(shutdown_rx).await });
            registry.sweeper = Some(WorkerSlot {
                handle,
                shutdown_tx,
            });
        }

        info!(monitors = started, "supervisor started");
        Ok(started)
    }

    /// Start a worker for a newly created monitor.
    ///
    /// Fails if a worker for the same id is already registered; the
    /// existing worker is left running.
    pub async fn add(&self, monitor: &Monitor) -> SupervisorResult<()> {
        let mut registry = self.registry.lock().await;
        if registry.stopped {
            return Err(SupervisorError::Stopped);
        }
        if registry.workers.contains_key(&monitor.id) {
            warn!(monitor_id = monitor.id, "add for a monitor that is already running");
            return Err(SupervisorError::AlreadyRunning(monitor.id));
        }

        let worker = self.build_worker(monitor)?;
        let previous = registry.take_previous(monitor.id);
        registry
            .workers
            .insert(monitor.id, self.launch(worker, previous));
        info!(monitor_id = monitor.id, name = %monitor.name, "monitor worker added");
        Ok(())
    }

    /// Replace the worker for `monitor` with one using its current settings.
    ///
    /// The swap happens under the registry lock. The new worker waits for
    /// the old one to finish any in-flight tick, then starts over with the
    /// startup stagger rather than continuing the old schedule.
    pub async fn restart(&self, monitor: &Monitor) -> SupervisorResult<()> {
        let mut registry = self.registry.lock().await;
        if registry.stopped {
            return Err(SupervisorError::Stopped);
        }

        // Built first so a failure leaves the old worker running.
        let worker = self.build_worker(monitor)?;
        let previous = registry.take_previous(monitor.id);
        registry
            .workers
            .insert(monitor.id, self.launch(worker, previous));
        info!(
            monitor_id = monitor.id,
            interval_secs = monitor.interval_seconds,
            timeout_secs = monitor.timeout_seconds,
            "monitor worker restarted"
        );
        Ok(())
    }

    /// Stop the worker for a monitor. Returns true if one was running.
    ///
    /// No new probe starts after this returns; a probe already in flight
    /// may still record its result.
    pub async fn remove(&self, id: MonitorId) -> bool {
        let mut registry = self.registry.lock().await;
        match registry.workers.remove(&id) {
            Some(slot) => {
                registry.retire(id, slot);
                info!(monitor_id = id, "monitor worker removed");
                true
            }
            None => false,
        }
    }

    /// Cancel every worker and the sweeper, and wait for all of them to exit.
    ///
    /// Later calls to `start`, `add`, and `restart` fail with
    /// [`SupervisorError::Stopped`]. Calling `stop` again is a no-op.
    pub async fn stop(&self) {
        let handles: Vec<(Option<MonitorId>, JoinHandle<()>)> = {
            let mut registry = self.registry.lock().await;
            registry.stopped = true;

            let mut handles: Vec<_> = registry
                .workers
                .drain()
                .map(|(id, slot)| (Some(id), slot.cancel()))
                .collect();
            handles.extend(
                registry
                    .retired
                    .drain(..)
                    .map(|(id, handle)| (Some(id), handle)),
            );
            if let Some(sweeper) = registry.sweeper.take() {
                handles.push((None, sweeper.cancel()));
            }
            handles
        };

        let count = handles.len();
        for (id, handle) in handles {
            if let Err(e) = handle.await {
                error!(monitor_id = ?id, error = %e, "worker task failed");
            }
        }
        info!(tasks = count, "supervisor stopped");
    }

    /// List monitor ids with active workers.
    pub async fn active_monitors(&self) -> Vec<MonitorId> {
        let registry = self.registry.lock().await;
        let mut ids: Vec<_> = registry.workers.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Check if a monitor has an active worker.
    pub async fn is_monitoring(&self, id: MonitorId) -> bool {
        let registry = self.registry.lock().await;
        registry.workers.contains_key(&id)
    }

    fn build_worker(&self, monitor: &Monitor) -> SupervisorResult<MonitorWorker> {
        MonitorWorker::new(monitor, self.store.clone(), self.alerter.clone()).map_err(|source| {
            SupervisorError::Probe {
                id: monitor.id,
                source,
            }
        })
    }

    /// Spawn `worker` once every loop in `previous` has exited.
    ///
    /// The previous loops are already cancelled, so this waits at most for
    /// one tick each. Two probes for the same monitor never overlap.
    fn launch(&self, worker: MonitorWorker, previous: Vec<JoinHandle<()>>) -> WorkerSlot {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let stagger = self.stagger;
        let id = worker.id;
        let handle = tokio::spawn(async move {
            for handle in previous {
                if let Err(e) = handle.await {
                    error!(monitor_id = id, error = %e, "retired worker task failed");
                }
            }
            worker.run(stagger, shutdown_rx).await
        });
        WorkerSlot {
            handle,
            shutdown_tx,
        }
    }
}

/// Result of one completed tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub check: Check,
    /// Stored state before this tick.
    pub previous: MonitorState,
    pub transition: Transition,
    /// Set only on the transition into `down`.
    pub alert: Option<Delivery>,
}

/// The polling loop for a single monitor.
pub struct MonitorWorker {
    id: MonitorId,
    url: String,
    interval: Duration,
    prober: Prober,
    store: SharedStore,
    alerter: Alerter,
}

impl MonitorWorker {
    /// Capture the monitor's probe parameters.
    pub fn new(monitor: &Monitor, store: SharedStore, alerter: Alerter) -> Result<Self, ProbeError> {
        Ok(Self {
            id: monitor.id,
            url: monitor.url.clone(),
            interval: monitor.interval(),
            prober: Prober::new(monitor.timeout())?,
            store,
            alerter,
        })
    }

    /// Probe after `stagger`, then every interval, until shutdown.
    pub async fn run(self, stagger: Duration, mut shutdown: watch::Receiver<bool>) {
        debug!(monitor_id = self.id, url = %self.url, "worker starting");

        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                debug!(monitor_id = self.id, "worker cancelled before first probe");
                return;
            }
            _ = tokio::time::sleep(stagger) => {}
        }

        self.tick().await;

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    debug!(monitor_id = self.id, "worker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// Probe once, record the check, and apply the state transition.
    ///
    /// Returns `None` when the tick was abandoned: the URL is invalid, a
    /// store call failed, or the monitor no longer exists.
    pub async fn tick(&self) -> Option<TickOutcome> {
        let outcome = match self.prober.probe(&self.url).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(monitor_id = self.id, error = %e, "probe skipped");
                return None;
            }
        };

        let check = match self.store.record_check(
            self.id,
            outcome.status_code,
            outcome.response_time_ms,
            outcome.is_up,
        ) {
            Ok(check) => check,
            Err(StateError::NotFound(_)) => {
                debug!(monitor_id = self.id, "monitor deleted, dropping check");
                return None;
            }
            Err(e) => {
                error!(monitor_id = self.id, error = %e, "failed to record check");
                return None;
            }
        };

        let monitor = match self.store.get_monitor(self.id) {
            Ok(Some(monitor)) => monitor,
            Ok(None) => {
                debug!(monitor_id = self.id, "monitor deleted, skipping state update");
                return None;
            }
            Err(e) => {
                error!(monitor_id = self.id, error = %e, "failed to read monitor state");
                return None;
            }
        };

        let previous = monitor.state;
        let transition = next_state(previous, monitor.consecutive_failures, check.is_up);
        if let Err(e) =
            self.store
                .update_state(self.id, transition.state, transition.consecutive_failures)
        {
            error!(monitor_id = self.id, error = %e, "failed to update monitor state");
            return None;
        }

        if transition.state != previous {
            info!(
                monitor_id = self.id,
                from = %previous,
                to = %transition.state,
                failures = transition.consecutive_failures,
                "monitor state changed"
            );
        }

        let alert = if transition.is_down_edge(previous) {
            Some(self.alerter.notify(&monitor).await)
        } else {
            None
        };

        Some(TickOutcome {
            check,
            previous,
            transition,
            alert,
        })
    }
}
