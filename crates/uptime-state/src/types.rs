//! Domain types for the monitor store.
//!
//! These types represent configured monitors and the checks recorded
//! against them. All types are serializable to/from JSON for storage in
//! redb tables.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a monitor, assigned by the store.
pub type MonitorId = u64;

/// Unique identifier for a check, assigned by the store.
pub type CheckId = u64;

// ── Monitor ───────────────────────────────────────────────────────

/// Debounced availability of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    /// No probe has completed yet, or only sub-threshold failures have.
    #[default]
    Unknown,
    Up,
    Down,
}

impl MonitorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorState::Unknown => "unknown",
            MonitorState::Up => "up",
            MonitorState::Down => "down",
        }
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured HTTP target under continuous observation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Monitor {
    pub id: MonitorId,
    /// Display name.
    pub name: String,
    /// Target URL probed with GET.
    pub url: String,
    /// Seconds between probes.
    pub interval_seconds: u64,
    /// Per-probe timeout in seconds.
    pub timeout_seconds: u64,
    pub state: MonitorState,
    /// Back-to-back failing probes since the last success.
    pub consecutive_failures: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Monitor {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Fields supplied when creating a monitor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewMonitor {
    pub name: String,
    pub url: String,
    pub interval_seconds: u64,
    pub timeout_seconds: u64,
}

/// Partial edit of a monitor's configuration. `None` leaves a field alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitorUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub interval_seconds: Option<u64>,
    pub timeout_seconds: Option<u64>,
}

impl MonitorUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.url.is_none()
            && self.interval_seconds.is_none()
            && self.timeout_seconds.is_none()
    }
}

// ── Check ─────────────────────────────────────────────────────────

/// One recorded probe result. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Check {
    pub id: CheckId,
    pub monitor_id: MonitorId,
    pub checked_at: DateTime<Utc>,
    /// HTTP status of the final response; absent on transport failure.
    pub status_code: Option<u16>,
    /// Wall time of the attempt, including failed ones.
    pub response_time_ms: u64,
    pub is_up: bool,
}
