//! Declarative monitor reconciliation.
//!
//! The config file lists the desired monitors by name. Reconciling diffs
//! that list against the store and applies the difference one monitor at a
//! time: each store write is paired with the matching supervisor call
//! before the next one starts, so an error part way through leaves the
//! store and the running workers in step.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use anyhow::Context;
use tracing::{info, warn};

use uptime_checker::WorkerSupervisor;
use uptime_state::{Monitor, MonitorId, MonitorUpdate, NewMonitor, StateResult, StateStore};

use crate::config::MonitorConfig;

/// The store operations reconciliation needs.
pub trait MonitorCatalog {
    fn list_monitors(&self) -> StateResult<Vec<Monitor>>;
    fn create_monitor(&self, new: &NewMonitor) -> StateResult<Monitor>;
    fn update_monitor(&self, id: MonitorId, update: &MonitorUpdate)
    -> StateResult<Option<Monitor>>;
    fn delete_monitor(&self, id: MonitorId) -> StateResult<bool>;
}

impl MonitorCatalog for StateStore {
    fn list_monitors(&self) -> StateResult<Vec<Monitor>> {
        StateStore::list_monitors(self)
    }

    fn create_monitor(&self, new: &NewMonitor) -> StateResult<Monitor> {
        StateStore::create_monitor(self, new)
    }

    fn update_monitor(
        &self,
        id: MonitorId,
        update: &MonitorUpdate,
    ) -> StateResult<Option<Monitor>> {
        StateStore::update_monitor(self, id, update)
    }

    fn delete_monitor(&self, id: MonitorId) -> StateResult<bool> {
        StateStore::delete_monitor(self, id)
    }
}

/// Changes made by one reconcile pass.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub created: Vec<Monitor>,
    pub updated: Vec<Monitor>,
    pub deleted: Vec<MonitorId>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Bring the store, and the running workers if `supervisor` is given, in
/// line with `desired`.
///
/// Monitors are matched by name. Runtime state (up/down and the failure
/// count) survives an update; a deleted monitor takes its checks with it.
/// Without a supervisor only the store changes, which is what startup wants
/// before [`WorkerSupervisor::start`] reads it.
///
/// On error the changes already made stay made, in both places.
pub async fn reconcile<C: MonitorCatalog>(
    catalog: &C,
    desired: &[MonitorConfig],
    supervisor: Option<&WorkerSupervisor>,
) -> anyhow::Result<ReconcileReport> {
    let existing = catalog.list_monitors().context("failed to list monitors")?;
    let wanted: HashSet<&str> = desired.iter().map(|m| m.name.as_str()).collect();
    let mut by_name: HashMap<&str, &Monitor> = HashMap::new();
    let mut report = ReconcileReport::default();

    // `existing` is ordered by id, so the oldest row for a name wins.
    for monitor in &existing {
        match by_name.entry(monitor.name.as_str()) {
            Entry::Vacant(slot) => {
                slot.insert(monitor);
            }
            Entry::Occupied(_) => {
                warn!(monitor_id = monitor.id, name = %monitor.name, "duplicate monitor name in store");
                delete(catalog, supervisor, monitor).await?;
                report.deleted.push(monitor.id);
            }
        }
    }

    let mut stale: Vec<&Monitor> = by_name
        .values()
        .filter(|m| !wanted.contains(m.name.as_str()))
        .copied()
        .collect();
    stale.sort_by_key(|m| m.id);
    for monitor in stale {
        delete(catalog, supervisor, monitor).await?;
        info!(monitor_id = monitor.id, name = %monitor.name, "monitor deleted");
        report.deleted.push(monitor.id);
    }

    for want in desired {
        match by_name.get(want.name.as_str()) {
            None => {
                let monitor = catalog
                    .create_monitor(&want.to_new_monitor())
                    .with_context(|| format!("failed to create monitor {:?}", want.name))?;
                info!(monitor_id = monitor.id, name = %monitor.name, url = %monitor.url, "monitor created");
                if let Some(supervisor) = supervisor {
                    if let Err(e) = supervisor.add(&monitor).await {
                        warn!(monitor_id = monitor.id, error = %e, "failed to add monitor worker");
                    }
                }
                report.created.push(monitor);
            }
            Some(current) => {
                let update = diff(current, want);
                if update.is_empty() {
                    continue;
                }
                let monitor = catalog
                    .update_monitor(current.id, &update)
                    .with_context(|| format!("failed to update monitor {:?}", want.name))?
                    .with_context(|| format!("monitor {:?} vanished during reconcile", want.name))?;
                info!(monitor_id = monitor.id, name = %monitor.name, "monitor updated");
                if let Some(supervisor) = supervisor {
                    if let Err(e) = supervisor.restart(&monitor).await {
                        warn!(monitor_id = monitor.id, error = %e, "failed to restart monitor worker");
                    }
                }
                report.updated.push(monitor);
            }
        }
    }

    Ok(report)
}

/// Stop the monitor's worker, then delete it. If the delete fails the
/// worker is brought back.
async fn delete<C: MonitorCatalog>(
    catalog: &C,
    supervisor: Option<&WorkerSupervisor>,
    monitor: &Monitor,
) -> anyhow::Result<()> {
    let was_running = match supervisor {
        Some(supervisor) => supervisor.remove(monitor.id).await,
        None => false,
    };

    if let Err(e) = catalog.delete_monitor(monitor.id) {
        if let (Some(supervisor), true) = (supervisor, was_running) {
            if let Err(e) = supervisor.restart(monitor).await {
                warn!(monitor_id = monitor.id, error = %e, "failed to resume monitor worker");
            }
        }
        return Err(e).with_context(|| format!("failed to delete monitor {:?}", monitor.name));
    }
    Ok(())
}

fn diff(current: &Monitor, want: &MonitorConfig) -> MonitorUpdate {
    MonitorUpdate {
        name: None,
        url: (current.url != want.url).then(|| want.url.clone()),
        interval_seconds: (current.interval_seconds != want.interval_seconds)
            .then_some(want.interval_seconds),
        timeout_seconds: (current.timeout_seconds != want.timeout_seconds)
            .then_some(want.timeout_seconds),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use uptime_checker::Alerter;
    use uptime_state::{MonitorState, StateError};

    fn want(name: &str, url: &str, interval: u64) -> MonitorConfig {
        MonitorConfig {
            name: name.to_string(),
            url: url.to_string(),
            interval_seconds: interval,
            timeout_seconds: 10,
        }
    }

    /// A catalog whose writes can be made to fail.
    struct FailingCatalog {
        inner: StateStore,
        fail_create: Option<&'static str>,
        fail_delete: bool,
    }

    impl FailingCatalog {
        fn new(inner: StateStore) -> Self {
            Self {
                inner,
                fail_create: None,
                fail_delete: false,
            }
        }

        fn busy() -> StateError {
            StateError::Transaction("database is busy".to_string())
        }
    }

    impl MonitorCatalog for FailingCatalog {
        fn list_monitors(&self) -> StateResult<Vec<Monitor>> {
            self.inner.list_monitors()
        }

        fn create_monitor(&self, new: &NewMonitor) -> StateResult<Monitor> {
            if self.fail_create == Some(new.name.as_str()) {
                return Err(Self::busy());
            }
            self.inner.create_monitor(new)
        }

        fn update_monitor(
            &self,
            id: MonitorId,
            update: &MonitorUpdate,
        ) -> StateResult<Option<Monitor>> {
            self.inner.update_monitor(id, update)
        }

        fn delete_monitor(&self, id: MonitorId) -> StateResult<bool> {
            if self.fail_delete {
                return Err(Self::busy());
            }
            self.inner.delete_monitor(id)
        }
    }

    /// A supervisor whose workers never reach their first probe.
    async fn idle_supervisor(store: &StateStore) -> WorkerSupervisor {
        let supervisor = WorkerSupervisor::new(Arc::new(store.clone()), Alerter::disabled())
            .with_stagger(Duration::from_secs(3600));
        supervisor.start().await.unwrap();
        supervisor
    }

    fn stored_ids(store: &StateStore) -> Vec<MonitorId> {
        store.list_monitors().unwrap().into_iter().map(|m| m.id).collect()
    }

    fn stored_names(store: &StateStore) -> Vec<String> {
        store.list_monitors().unwrap().into_iter().map(|m| m.name).collect()
    }

    #[tokio::test]
    async fn creates_missing_monitors() {
        let store = StateStore::open_in_memory().unwrap();
        let report = reconcile(
            &store,
            &[
                want("api", "http://127.0.0.1:1/", 60),
                want("web", "http://127.0.0.1:2/", 30),
            ],
            None,
        )
        .await
        .unwrap();

        assert_eq!(report.created.len(), 2);
        assert!(report.updated.is_empty());
        assert!(report.deleted.is_empty());
        assert_eq!(stored_names(&store), ["api", "web"]);
    }

    #[tokio::test]
    async fn second_pass_is_a_no_op() {
        let store = StateStore::open_in_memory().unwrap();
        let desired = [want("api", "http://127.0.0.1:1/", 60)];
        reconcile(&store, &desired, None).await.unwrap();

        let report = reconcile(&store, &desired, None).await.unwrap();
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn update_keeps_id_and_state() {
        let store = StateStore::open_in_memory().unwrap();
        let report = reconcile(&store, &[want("api", "http://127.0.0.1:1/", 60)], None)
            .await
            .unwrap();
        let id = report.created[0].id;
        store.update_state(id, MonitorState::Down, 4).unwrap();

        let report = reconcile(&store, &[want("api", "http://127.0.0.1:9/", 15)], None)
            .await
            .unwrap();
        assert_eq!(report.updated.len(), 1);
        let updated = &report.updated[0];
        assert_eq!(updated.id, id);
        assert_eq!(updated.url, "http://127.0.0.1:9/");
        assert_eq!(updated.interval_seconds, 15);
        assert_eq!(updated.state, MonitorState::Down);
        assert_eq!(updated.consecutive_failures, 4);
    }

    #[tokio::test]
    async fn deletes_monitors_not_in_config() {
        let store = StateStore::open_in_memory().unwrap();
        let report = reconcile(
            &store,
            &[
                want("api", "http://127.0.0.1:1/", 60),
                want("old", "http://127.0.0.1:2/", 60),
            ],
            None,
        )
        .await
        .unwrap();
        let old_id = report.created[1].id;
        store.record_check(old_id, Some(200), 3, true).unwrap();

        let report = reconcile(&store, &[want("api", "http://127.0.0.1:1/", 60)], None)
            .await
            .unwrap();
        assert_eq!(report.deleted, [old_id]);
        assert!(store.get_monitor(old_id).unwrap().is_none());
        assert!(store.recent_checks(old_id, 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_names_in_store_collapse_to_oldest() {
        let store = StateStore::open_in_memory().unwrap();
        let new = NewMonitor {
            name: "api".to_string(),
            url: "http://127.0.0.1:1/".to_string(),
            interval_seconds: 60,
            timeout_seconds: 10,
        };
        let first = store.create_monitor(&new).unwrap();
        let second = store.create_monitor(&new).unwrap();

        let report = reconcile(&store, &[want("api", "http://127.0.0.1:1/", 60)], None)
            .await
            .unwrap();
        assert_eq!(report.deleted, [second.id]);
        assert_eq!(stored_ids(&store), [first.id]);
    }

    #[tokio::test]
    async fn reload_drives_supervisor() {
        let store = StateStore::open_in_memory().unwrap();
        reconcile(
            &store,
            &[
                want("keep", "http://127.0.0.1:1/", 60),
                want("drop", "http://127.0.0.1:2/", 60),
            ],
            None,
        )
        .await
        .unwrap();
        let supervisor = idle_supervisor(&store).await;
        assert_eq!(supervisor.active_monitors().await.len(), 2);

        let report = reconcile(
            &store,
            &[
                want("keep", "http://127.0.0.1:3/", 60),
                want("fresh", "http://127.0.0.1:4/", 60),
            ],
            Some(&supervisor),
        )
        .await
        .unwrap();

        assert_eq!(supervisor.active_monitors().await, stored_ids(&store));
        assert!(!supervisor.is_monitoring(report.deleted[0]).await);

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn failed_create_leaves_store_and_workers_in_step() {
        let store = StateStore::open_in_memory().unwrap();
        reconcile(
            &store,
            &[
                want("keep", "http://127.0.0.1:1/", 60),
                want("drop", "http://127.0.0.1:2/", 60),
            ],
            None,
        )
        .await
        .unwrap();
        let drop_id = stored_ids(&store)[1];
        let supervisor = idle_supervisor(&store).await;

        let mut catalog = FailingCatalog::new(store.clone());
        catalog.fail_create = Some("broken");
        let result = reconcile(
            &catalog,
            &[
                want("keep", "http://127.0.0.1:3/", 60),
                want("fresh", "http://127.0.0.1:4/", 60),
                want("broken", "http://127.0.0.1:5/", 60),
                want("later", "http://127.0.0.1:6/", 60),
            ],
            Some(&supervisor),
        )
        .await;

        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("broken"));

        // Everything before the failure reached both sides; nothing after it did.
        assert_eq!(stored_names(&store), ["keep", "fresh"]);
        assert_eq!(supervisor.active_monitors().await, stored_ids(&store));
        assert!(!supervisor.is_monitoring(drop_id).await);

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn failed_delete_keeps_worker_running() {
        let store = StateStore::open_in_memory().unwrap();
        reconcile(
            &store,
            &[
                want("keep", "http://127.0.0.1:1/", 60),
                want("drop", "http://127.0.0.1:2/", 60),
            ],
            None,
        )
        .await
        .unwrap();
        let supervisor = idle_supervisor(&store).await;

        let mut catalog = FailingCatalog::new(store.clone());
        catalog.fail_delete = true;
        let result = reconcile(
            &catalog,
            &[want("keep", "http://127.0.0.1:1/", 60)],
            Some(&supervisor),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(stored_names(&store), ["keep", "drop"]);
        assert_eq!(supervisor.active_monitors().await, stored_ids(&store));

        supervisor.stop().await;
    }
}
