//! uptime-state — embedded store for monitors and their probe history.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for monitor definitions, their debounced up/down state, and the
//! append-only log of individual checks.
//!
//! # Architecture
//!
//! Monitors are JSON-serialized into `&[u8]` values keyed by their numeric
//! id. Checks are keyed by `(monitor_id, check_id)` so that one monitor's
//! history is a contiguous range, ordered by insertion. Ids come from a
//! per-table sequence bumped inside the same write transaction as the insert.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks. redb serializes write transactions,
//! so concurrent writers queue behind each other instead of interleaving.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
