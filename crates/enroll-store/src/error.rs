//! Error types for enrollment storage.

use enroll_core::EnrollError;

use crate::schema::constraint;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(String),

    /// A stored value could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Row to update does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity name.
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// A unique constraint rejected the write.
    #[error("unique constraint violated: {constraint}")]
    UniqueViolation {
        /// Name of the violated constraint.
        constraint: String,
    },

    /// A check constraint rejected the write.
    #[error("check constraint violated: {constraint}")]
    CheckViolation {
        /// Name of the violated constraint.
        constraint: String,
    },

    /// Waiting for a row lock exceeded the configured timeout.
    #[error("lock wait timed out on {row}")]
    LockTimeout {
        /// Description of the contended row.
        row: String,
    },

    /// The store aborted the transaction to break a deadlock.
    #[error("deadlock detected")]
    Deadlock,
}

impl StoreError {
    /// Whether retrying the whole transaction may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::Deadlock)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            let name = db_err.constraint().unwrap_or("unknown").to_string();
            match db_err.code().as_deref() {
                Some("23505") => return Self::UniqueViolation { constraint: name },
                Some("23514") => return Self::CheckViolation { constraint: name },
                Some("55P03") => {
                    return Self::LockTimeout {
                        row: db_err.message().to_string(),
                    }
                }
                Some("40P01" | "40001") => return Self::Deadlock,
                _ => {}
            }
        }
        Self::Database(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<StoreError> for EnrollError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound { entity, id },
            StoreError::UniqueViolation { constraint } => {
                Self::Conflict(constraint::describe(&constraint).to_string())
            }
            StoreError::CheckViolation { constraint } => {
                Self::InvalidState(constraint::describe(&constraint).to_string())
            }
            err @ (StoreError::LockTimeout { .. } | StoreError::Deadlock) => {
                Self::Busy(err.to_string())
            }
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}
