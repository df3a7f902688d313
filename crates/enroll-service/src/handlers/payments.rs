//! Payment handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;

use enroll_core::{
    Payment, PaymentId, PaymentPatch, PaymentQuery, PaymentSort, PaymentStatus,
    DEFAULT_PAGE_LIMIT,
};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

/// Query parameters for the caller's payments.
#[derive(Debug, Deserialize)]
pub struct MyPaymentsQuery {
    /// Status filter.
    #[serde(default)]
    pub status: Option<PaymentStatus>,
    /// Earliest paid day, inclusive.
    #[serde(default)]
    pub from: Option<NaiveDate>,
    /// Latest paid day, inclusive.
    #[serde(default)]
    pub to: Option<NaiveDate>,
    /// `created` (default) or `amount`.
    #[serde(default)]
    pub sort: PaymentSort,
    /// Rows to skip.
    #[serde(default)]
    pub skip: usize,
    /// Maximum rows (default and cap: 100).
    #[serde(default)]
    pub limit: Option<usize>,
}

/// List the caller's payments.
pub async fn list_mine(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<MyPaymentsQuery>,
) -> Result<Json<Vec<Payment>>, ApiError> {
    let query = PaymentQuery {
        user_id: Some(auth.user_id),
        status: query.status,
        paid_from: query.from,
        paid_to: query.to,
        sort: query.sort,
        skip: query.skip,
        limit: query.limit.unwrap_or(DEFAULT_PAGE_LIMIT).min(DEFAULT_PAGE_LIMIT),
    };
    Ok(Json(state.payments.find(&query).await?))
}

/// Update method or validity range of the caller's payment.
pub async fn update(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(patch): Json<PaymentPatch>,
) -> Result<Json<Payment>, ApiError> {
    let id: PaymentId = id.parse()?;
    Ok(Json(state.payments.update(id, &patch, auth.user_id).await?))
}

/// Cancel the caller's payment and release its seat.
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Payment>, ApiError> {
    let id: PaymentId = id.parse()?;
    Ok(Json(state.payments.cancel(id, auth.user_id).await?))
}
