//! Error types for the monitor store.

use thiserror::Error;

use crate::types::MonitorId;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    /// Table open, read, or write failure inside a transaction.
    #[error("storage error: {0}")]
    Storage(String),

    /// A stored value could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid monitor: {0}")]
    Invalid(String),

    #[error("monitor not found: {0}")]
    NotFound(MonitorId),
}
