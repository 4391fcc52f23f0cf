//! # State Store Errors

use thiserror::Error;

/// Errors from state-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing medium failed.
    #[error("state store I/O failure: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted record or the snapshot container failed to deserialize.
    #[error("state store corrupt: {0}")]
    Corrupt(String),

    /// `commit` or `rollback` was called without a prior `begin`.
    #[error("not in a transaction")]
    NotInTransaction,

    /// `begin` was called while a transaction was already open.
    #[error("transaction already open")]
    AlreadyInTransaction,
}

impl StoreError {
    /// Short machine-readable tag for surfacing in execution results.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Io(_) => "StoreIoError",
            Self::Corrupt(_) => "Corrupt",
            Self::NotInTransaction => "NotInTransaction",
            Self::AlreadyInTransaction => "AlreadyInTransaction",
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
