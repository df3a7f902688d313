//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use enroll_core::{EnrollError, IdError};
use enroll_store::StoreError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden - valid credentials but the caller does not own the resource.
    #[error("{0}")]
    Forbidden(String),

    /// Resource not found (or soft-deleted).
    #[error("{0}")]
    NotFound(String),

    /// Invalid input or state transition.
    #[error("{0}")]
    InvalidState(String),

    /// Paid amount is below the offering's cost.
    #[error("insufficient amount: amount={amount}, cost={cost}")]
    InsufficientAmount {
        /// Amount offered.
        amount: i64,
        /// Required cost.
        cost: i64,
    },

    /// Duplicate title or duplicate application.
    #[error("{0}")]
    Conflict(String),

    /// Row lock contention; the request may be retried unchanged.
    #[error("{0}")]
    Busy(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::InvalidState(_) | Self::InsufficientAmount { .. } => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (code, message, details) = match &self {
            Self::Unauthorized => ("unauthorized", self.to_string(), None),
            Self::Forbidden(msg) => ("forbidden", msg.clone(), None),
            Self::NotFound(msg) => ("not_found", msg.clone(), None),
            Self::InvalidState(msg) => ("invalid_state", msg.clone(), None),
            Self::InsufficientAmount { amount, cost } => (
                "insufficient_amount",
                self.to_string(),
                Some(serde_json::json!({
                    "amount": amount,
                    "cost": cost
                })),
            ),
            Self::Conflict(msg) => ("conflict", msg.clone(), None),
            Self::Busy(msg) => {
                tracing::warn!(error = %msg, "Request aborted by lock contention");
                (
                    "busy",
                    "The resource is busy, retry the request".to_string(),
                    Some(serde_json::json!({ "retryable": true })),
                )
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<EnrollError> for ApiError {
    fn from(err: EnrollError) -> Self {
        match err {
            err @ EnrollError::NotFound { .. } => Self::NotFound(err.to_string()),
            EnrollError::Conflict(msg) => Self::Conflict(msg),
            EnrollError::InvalidState(msg) => Self::InvalidState(msg),
            err @ EnrollError::InvalidId(_) => Self::InvalidState(err.to_string()),
            EnrollError::InsufficientAmount { amount, cost } => {
                Self::InsufficientAmount { amount, cost }
            }
            EnrollError::Forbidden(msg) => Self::Forbidden(msg),
            EnrollError::Unauthorized => Self::Unauthorized,
            EnrollError::Busy(msg) => Self::Busy(msg),
            EnrollError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        EnrollError::from(err).into()
    }
}

impl From<IdError> for ApiError {
    fn from(err: IdError) -> Self {
        EnrollError::from(err).into()
    }
}
