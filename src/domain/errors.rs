//! Domain errors for the trial monitor.

use thiserror::Error;

/// Domain-level errors that can occur while monitoring a study.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Study not found: {0}")]
    StudyNotFound(String),

    #[error("Trial not found: #{number} in study {study_id}")]
    TrialNotFound { study_id: i64, number: i64 },

    #[error("Invalid trial state: {0}")]
    InvalidTrialState(String),

    #[error("Invalid {name} pattern '{pattern}': {reason}")]
    InvalidPattern {
        name: &'static str,
        pattern: String,
        reason: String,
    },

    #[error("Operation not supported by this store: {0}")]
    Unsupported(&'static str),

    #[error("Study store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::DatabaseError(_))
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
