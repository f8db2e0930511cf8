//! Error taxonomy for the monitor worker.
//!
//! Configuration errors are fatal before the store connection is ever
//! opened. Store errors carry their own transient/fatal classification —
//! both are treated identically by the worker's run loop: log and exit,
//! leaving restart policy to the process supervisor.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("fatal error: {0}")]
    Fatal(String),
}

/// An error surfaced by a [`crate::store::Store`] implementation.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct StoreError {
    pub message: String,
    /// True when the worker may reasonably retry; false for integrity
    /// violations that should not be retried without operator attention.
    /// Either way the worker's current policy is to log and exit — the
    /// distinction is preserved for supervisors that want to back off
    /// differently on the two cases.
    pub transient: bool,
}

impl StoreError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::transient(e.to_string())
    }
}
