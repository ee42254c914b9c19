//! StateStore — redb-backed persistence for monitors and checks.
//!
//! Provides typed operations over monitor definitions, their debounced
//! state, and the check log. All values are JSON-serialized into redb's
//! `&[u8]` value columns. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, WriteTransaction};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(MONITORS).map_err(map_err!(Storage))?;
        txn.open_table(CHECKS).map_err(map_err!(Storage))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Storage))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Monitors ───────────────────────────────────────────────────

    /// Insert a new monitor in state `unknown` with zero failures.
    pub fn create_monitor(&self, new: &NewMonitor) -> StateResult<Monitor> {
        validate(&new.name, &new.url, new.interval_seconds, new.timeout_seconds)?;

        let now = Utc::now();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let monitor = Monitor {
            id: next_id(&txn, MONITOR_SEQUENCE)?,
            name: new.name.clone(),
            url: new.url.clone(),
            interval_seconds: new.interval_seconds,
            timeout_seconds: new.timeout_seconds,
            state: MonitorState::Unknown,
            consecutive_failures: 0,
            created_at: now,
            updated_at: now,
        };
        put_monitor(&txn, &monitor)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(monitor_id = monitor.id, name = %monitor.name, "monitor created");
        Ok(monitor)
    }

    /// Get a monitor by id.
    pub fn get_monitor(&self, id: MonitorId) -> StateResult<Option<Monitor>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(MONITORS).map_err(map_err!(Storage))?;
        match table.get(id).map_err(map_err!(Storage))? {
            Some(guard) => {
                let monitor: Monitor =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Codec))?;
                Ok(Some(monitor))
            }
            None => Ok(None),
        }
    }

    /// List all monitors ordered by id.
    pub fn list_monitors(&self) -> StateResult<Vec<Monitor>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(MONITORS).map_err(map_err!(Storage))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Storage))? {
            let (_, value) = entry.map_err(map_err!(Storage))?;
            let monitor: Monitor =
                serde_json::from_slice(value.value()).map_err(map_err!(Codec))?;
            results.push(monitor);
        }
        Ok(results)
    }

    /// Apply a configuration edit. State and failure count are untouched.
    ///
    /// Returns `None` if the monitor does not exist.
    pub fn update_monitor(
        &self,
        id: MonitorId,
        update: &MonitorUpdate,
    ) -> StateResult<Option<Monitor>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let Some(mut monitor) = read_monitor(&txn, id)? else {
            return Ok(None);
        };

        if let Some(name) = &update.name {
            monitor.name = name.clone();
        }
        if let Some(url) = &update.url {
            monitor.url = url.clone();
        }
        if let Some(interval) = update.interval_seconds {
            monitor.interval_seconds = interval;
        }
        if let Some(timeout) = update.timeout_seconds {
            monitor.timeout_seconds = timeout;
        }
        validate(
            &monitor.name,
            &monitor.url,
            monitor.interval_seconds,
            monitor.timeout_seconds,
        )?;
        monitor.updated_at = Utc::now();

        put_monitor(&txn, &monitor)?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(monitor_id = id, "monitor updated");
        Ok(Some(monitor))
    }

    /// Write state and failure count together in one transaction.
    pub fn update_state(
        &self,
        id: MonitorId,
        state: MonitorState,
        consecutive_failures: u32,
    ) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut monitor = read_monitor(&txn, id)?.ok_or(StateError::NotFound(id))?;
        monitor.state = state;
        monitor.consecutive_failures = consecutive_failures;
        monitor.updated_at = Utc::now();
        put_monitor(&txn, &monitor)?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Delete a monitor and all of its checks. Returns true if it existed.
    pub fn delete_monitor(&self, id: MonitorId) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        let removed_checks;
        {
            let mut monitors = txn.open_table(MONITORS).map_err(map_err!(Storage))?;
            existed = monitors.remove(id).map_err(map_err!(Storage))?.is_some();

            let mut checks = txn.open_table(CHECKS).map_err(map_err!(Storage))?;
            let keys: Vec<(u64, u64)> = checks
                .range((id, 0)..=(id, u64::MAX))
                .map_err(map_err!(Storage))?
                .map(|entry| entry.map(|(key, _)| key.value()))
                .collect::<Result<_, _>>()
                .map_err(map_err!(Storage))?;
            for key in &keys {
                checks.remove(key).map_err(map_err!(Storage))?;
            }
            removed_checks = keys.len();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(monitor_id = id, existed, removed_checks, "monitor deleted");
        Ok(existed)
    }

    // ── Checks ─────────────────────────────────────────────────────

    /// Append a probe result for a monitor.
    ///
    /// Fails with [`StateError::NotFound`] if the monitor has been deleted,
    /// so a late write cannot leave checks behind without an owner.
    pub fn record_check(
        &self,
        monitor_id: MonitorId,
        status_code: Option<u16>,
        response_time_ms: u64,
        is_up: bool,
    ) -> StateResult<Check> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let monitors = txn.open_table(MONITORS).map_err(map_err!(Storage))?;
            if monitors.get(monitor_id).map_err(map_err!(Storage))?.is_none() {
                return Err(StateError::NotFound(monitor_id));
            }
        }
        let check = Check {
            id: next_id(&txn, CHECK_SEQUENCE)?,
            monitor_id,
            checked_at: Utc::now(),
            status_code,
            response_time_ms,
            is_up,
        };
        let value = serde_json::to_vec(&check).map_err(map_err!(Codec))?;
        {
            let mut table = txn.open_table(CHECKS).map_err(map_err!(Storage))?;
            table
                .insert((monitor_id, check.id), value.as_slice())
                .map_err(map_err!(Storage))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(check)
    }

    /// The most recent `limit` checks for a monitor, newest first.
    pub fn recent_checks(&self, monitor_id: MonitorId, limit: usize) -> StateResult<Vec<Check>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CHECKS).map_err(map_err!(Storage))?;
        let mut results = Vec::new();
        for entry in table
            .range((monitor_id, 0)..=(monitor_id, u64::MAX))
            .map_err(map_err!(Storage))?
            .rev()
            .take(limit)
        {
            let (_, value) = entry.map_err(map_err!(Storage))?;
            let check: Check =
                serde_json::from_slice(value.value()).map_err(map_err!(Codec))?;
            results.push(check);
        }
        Ok(results)
    }

    /// Delete every check recorded before `older_than`. Returns number deleted.
    pub fn prune_checks(&self, older_than: DateTime<Utc>) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let count;
        {
            let mut table = txn.open_table(CHECKS).map_err(map_err!(Storage))?;
            let mut expired = Vec::new();
            for entry in table.iter().map_err(map_err!(Storage))? {
                let (key, value) = entry.map_err(map_err!(Storage))?;
                let check: Check =
                    serde_json::from_slice(value.value()).map_err(map_err!(Codec))?;
                if check.checked_at < older_than {
                    expired.push(key.value());
                }
            }
            for key in &expired {
                table.remove(key).map_err(map_err!(Storage))?;
            }
            count = expired.len() as u64;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(count, cutoff = %older_than, "checks pruned");
        Ok(count)
    }
}

/// Bump and return the named sequence inside an open write transaction.
fn next_id(txn: &WriteTransaction, sequence: &str) -> StateResult<u64> {
    let mut table = txn.open_table(SEQUENCES).map_err(map_err!(Storage))?;
    let current = table
        .get(sequence)
        .map_err(map_err!(Storage))?
        .map(|guard| guard.value())
        .unwrap_or(0);
    let next = current + 1;
    table.insert(sequence, next).map_err(map_err!(Storage))?;
    Ok(next)
}

fn read_monitor(txn: &WriteTransaction, id: MonitorId) -> StateResult<Option<Monitor>> {
    let table = txn.open_table(MONITORS).map_err(map_err!(Storage))?;
    let monitor = match table.get(id).map_err(map_err!(Storage))? {
        Some(guard) => Some(
            serde_json::from_slice::<Monitor>(guard.value()).map_err(map_err!(Codec))?,
        ),
        None => None,
    };
    Ok(monitor)
}

fn put_monitor(txn: &WriteTransaction, monitor: &Monitor) -> StateResult<()> {
    let value = serde_json::to_vec(monitor).map_err(map_err!(Codec))?;
    let mut table = txn.open_table(MONITORS).map_err(map_err!(Storage))?;
    table
        .insert(monitor.id, value.as_slice())
        .map_err(map_err!(Storage))?;
    Ok(())
}

fn validate(name: &str, url: &str, interval_seconds: u64, timeout_seconds: u64) -> StateResult<()> {
    if name.trim().is_empty() {
        return Err(StateError::Invalid("name must not be empty".to_string()));
    }
    if url.trim().is_empty() {
        return Err(StateError::Invalid("url must not be empty".to_string()));
    }
    if interval_seconds == 0 {
        return Err(StateError::Invalid("interval_seconds must be > 0".to_string()));
    }
    if timeout_seconds == 0 {
        return Err(StateError::Invalid("timeout_seconds must be > 0".to_string()));
    }
    Ok(())
}
