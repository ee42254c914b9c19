//! uptime-checker — continuous availability monitoring of HTTP targets.
//!
//! Provides bounded HTTP probes, failure-threshold hysteresis, down-edge
//! webhook alerts, and the supervisor that keeps exactly one polling loop
//! running per monitor.
//!
//! # Architecture
//!
//! ```text
//! WorkerSupervisor
//!   ├── Per-monitor MonitorWorker task
//!   │   ├── Prober::probe() → ProbeOutcome
//!   │   ├── CheckStore::record_check()
//!   │   ├── next_state() (consecutive failures, threshold 3)
//!   │   ├── CheckStore::update_state()
//!   │   └── Alerter::notify() on the transition into `down`
//!   └── RetentionSweeper task (prunes checks older than 7 days)
//! ```
//!
//! # Hysteresis
//!
//! A monitor only flips to `down` once three probes in a row have failed.
//! One or two failures leave the previous state in place, including the
//! initial `unknown`. A single success resets the count and marks it `up`.
//! Only the edge into `down` produces an alert; recovery is silent.

pub mod alerter;
pub mod prober;
pub mod storage;
pub mod supervisor;
pub mod sweeper;
pub mod tracker;

pub use alerter::{AlertError, AlertPayload, Alerter, Delivery};
pub use prober::{ProbeError, ProbeOutcome, Prober};
pub use storage::{CheckStore, SharedStore};
pub use supervisor::{MonitorWorker, SupervisorError, SupervisorResult, TickOutcome, WorkerSupervisor};
pub use sweeper::RetentionSweeper;
pub use tracker::{FAILURE_THRESHOLD, Transition, next_state};
