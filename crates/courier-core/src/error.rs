//! Error types for storage and queue operations.
//!
//! Every adapter in this crate reports failures through `CoreError`. Callers
//! in the dispatch and API layers treat all of these as infrastructure
//! failures except `NotFound` and `ConstraintViolation`.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for internal operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Queue transport failed.
    #[error("Queue error: {0}")]
    Queue(String),

    /// Entity not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Constraint violation.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// A stored or queued document could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    /// Returns true for transport or database failures the caller should
    /// back off from and retry later.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Queue(_))
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("requested job not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::ConstraintViolation(format!("unique constraint violation: {}", db_err))
            },
            sqlx::Error::Database(db_err) if db_err.is_check_violation() => {
                Self::ConstraintViolation(format!("check constraint violation: {}", db_err))
            },
            _ => Self::Database(err.to_string()),
        }
    }
}

impl From<redis::RedisError> for CoreError {
    fn from(err: redis::RedisError) -> Self {
        Self::Queue(err.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
