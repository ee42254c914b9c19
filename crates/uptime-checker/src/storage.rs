//! The storage operations the checker depends on.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uptime_state::{Check, Monitor, MonitorId, MonitorState, StateResult, StateStore};

/// Read/write contract between the checker and the monitor store.
///
/// Writers are serialized by the implementation. Any method may fail
/// transiently; callers log and move on rather than retry.
pub trait CheckStore: Send + Sync + 'static {
    /// All monitors; read once when the supervisor starts.
    fn list_monitors(&self) -> StateResult<Vec<Monitor>>;

    /// Current snapshot of one monitor, or `None` if it was deleted.
    fn get_monitor(&self, id: MonitorId) -> StateResult<Option<Monitor>>;

    /// Write state and failure count together.
    fn update_state(
        &self,
        id: MonitorId,
        state: MonitorState,
        consecutive_failures: u32,
    ) -> StateResult<()>;

    /// Append one probe result.
    fn record_check(
        &self,
        monitor_id: MonitorId,
        status_code: Option<u16>,
        response_time_ms: u64,
        is_up: bool,
    ) -> StateResult<Check>;

    /// Delete checks recorded before `older_than`; returns how many.
    fn prune_checks(&self, older_than: DateTime<Utc>) -> StateResult<u64>;
}

/// Store handle shared by the supervisor, its workers, and the sweeper.
pub type SharedStore = Arc<dyn CheckStore>;

impl CheckStore for StateStore {
    fn list_monitors(&self) -> StateResult<Vec<Monitor>> {
        StateStore::list_monitors(self)
    }

    fn get_monitor(&self, id: MonitorId) -> StateResult<Option<Monitor>> {
        StateStore::get_monitor(self, id)
    }

    fn update_state(
        &self,
        id: MonitorId,
        state: MonitorState,
        consecutive_failures: u32,
    ) -> StateResult<()> {
        StateStore::update_state(self, id, state, consecutive_failures)
    }

    fn record_check(
        &self,
        monitor_id: MonitorId,
        status_code: Option<u16>,
        response_time_ms: u64,
        is_up: bool,
    ) -> StateResult<Check> {
        StateStore::record_check(self, monitor_id, status_code, response_time_ms, is_up)
    }

    fn prune_checks(&self, older_than: DateTime<Utc>) -> StateResult<u64> {
        StateStore::prune_checks(self, older_than)
    }
}
