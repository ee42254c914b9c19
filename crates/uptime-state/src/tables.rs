//! redb table definitions for the monitor store.
//!
//! Monitor and check values are JSON-serialized domain types. Sequence
//! values are the last id handed out for the named table.

use redb::TableDefinition;

/// Monitor definitions and state keyed by monitor id.
pub const MONITORS: TableDefinition<u64, &[u8]> = TableDefinition::new("monitors");

/// Probe results keyed by `(monitor_id, check_id)`.
pub const CHECKS: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("checks");

/// Id sequences keyed by table name.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

pub(crate) const MONITOR_SEQUENCE: &str = "monitors";
pub(crate) const CHECK_SEQUENCE: &str = "checks";
