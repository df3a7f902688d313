//! Error types for enrollment.

use crate::ids::IdError;

/// Result type for enrollment operations.
pub type Result<T> = std::result::Result<T, EnrollError>;

/// Stable, machine-checkable classification of an [`EnrollError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Entity absent or soft-deleted.
    NotFound,
    /// Uniqueness or duplicate-application violation.
    Conflict,
    /// Date window, amount, status transition, or range violation.
    InvalidState,
    /// Ownership mismatch.
    Forbidden,
    /// Bad, missing, or expired credential.
    Unauthorized,
    /// Unexpected failure, including lock timeouts and deadlocks.
    Internal,
}

impl ErrorKind {
    /// Snake-case name used in API error bodies.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::InvalidState => "invalid_state",
            Self::Forbidden => "forbidden",
            Self::Unauthorized => "unauthorized",
            Self::Internal => "internal_error",
        }
    }
}

/// Errors that can occur in enrollment operations.
#[derive(Debug, thiserror::Error)]
pub enum EnrollError {
    /// Entity not found (or soft-deleted).
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity name ("course", "payment", ...).
        entity: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// Uniqueness violation.
    #[error("{0}")]
    Conflict(String),

    /// Invalid state or input.
    #[error("{0}")]
    InvalidState(String),

    /// Paid amount is below the offering's cost.
    #[error("insufficient amount: amount={amount}, cost={cost}")]
    InsufficientAmount {
        /// Amount offered, in minor currency units.
        amount: i64,
        /// Required cost, in minor currency units.
        cost: i64,
    },

    /// Caller does not own the resource.
    #[error("{0}")]
    Forbidden(String),

    /// Missing or invalid credential.
    #[error("unauthorized")]
    Unauthorized,

    /// Lock wait timed out or a deadlock was detected; safe to retry.
    #[error("resource busy: {0}")]
    Busy(String),

    /// Unexpected failure.
    #[error("internal error: {0}")]
    Internal(String),

    /// Invalid identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] IdError),
}

impl EnrollError {
    /// Shorthand for [`EnrollError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// The taxonomy bucket this error belongs to.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::InvalidState(_) | Self::InsufficientAmount { .. } | Self::InvalidId(_) => {
                ErrorKind::InvalidState
            }
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::Busy(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the caller may retry the whole operation unchanged.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy(_))
    }
}
