//! Error types for the Seedling state store.

use thiserror::Error;

use crate::types::InstallationStatus;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    Conflict(String),

    #[error("{key} is {current}, expected one of {expected:?}")]
    StatusMismatch {
        key: String,
        current: InstallationStatus,
        expected: Vec<InstallationStatus>,
    },
}

impl StateError {
    /// True for errors describing the data (missing, duplicate, wrong state)
    /// rather than a storage failure.
    pub fn is_logical(&self) -> bool {
        matches!(
            self,
            StateError::NotFound(_) | StateError::Conflict(_) | StateError::StatusMismatch { .. }
        )
    }
}
