//! Course and test handlers.
//!
//! The same handlers serve `/v1/courses` and `/v1/tests`; the router attaches
//! the [`OfferingKind`] as a request extension.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;

use enroll_core::{
    NewOffering, Offering, OfferingId, OfferingKind, OfferingPatch, OfferingQuery, OfferingSort,
    OfferingStatus, Payment, DEFAULT_PAGE_LIMIT,
};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::services::ApplyRequest;
use crate::state::AppState;

/// Listing query parameters.
#[derive(Debug, Deserialize)]
pub struct ListOfferingsQuery {
    /// Status filter (default: `AVAILABLE`).
    #[serde(default)]
    pub status: Option<OfferingStatus>,
    /// `created` (default) or `popular`.
    #[serde(default)]
    pub sort: OfferingSort,
    /// Rows to skip.
    #[serde(default)]
    pub skip: usize,
    /// Maximum rows (default and cap: 100).
    #[serde(default)]
    pub limit: Option<usize>,
}

impl From<ListOfferingsQuery> for OfferingQuery {
    fn from(query: ListOfferingsQuery) -> Self {
        Self {
            status: Some(query.status.unwrap_or(OfferingStatus::Available)),
            sort: query.sort,
            skip: query.skip,
            limit: query.limit.unwrap_or(DEFAULT_PAGE_LIMIT).min(DEFAULT_PAGE_LIMIT),
        }
    }
}

/// One entry of a bulk update.
#[derive(Debug, Deserialize)]
pub struct BulkPatch {
    /// Offering to patch.
    pub id: String,
    /// Fields to change.
    #[serde(flatten)]
    pub patch: OfferingPatch,
}

/// List offerings.
pub async fn list(
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<OfferingKind>,
    Query(query): Query<ListOfferingsQuery>,
) -> Result<Json<Vec<Offering>>, ApiError> {
    let offerings = state.offerings(kind).find(&query.into()).await?;
    Ok(Json(offerings))
}

/// Create an offering owned by the caller.
pub async fn create(
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<OfferingKind>,
    auth: AuthUser,
    Json(body): Json<NewOffering>,
) -> Result<(StatusCode, Json<Offering>), ApiError> {
    let offering = state.offerings(kind).create(body, auth.user_id).await?;
    Ok((StatusCode::CREATED, Json(offering)))
}

/// Get one offering.
pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<OfferingKind>,
    Path(id): Path<String>,
) -> Result<Json<Offering>, ApiError> {
    let id: OfferingId = id.parse()?;
    Ok(Json(state.offerings(kind).get(id).await?))
}

/// Patch one offering.
pub async fn update(
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<OfferingKind>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(patch): Json<OfferingPatch>,
) -> Result<Json<Offering>, ApiError> {
    let id: OfferingId = id.parse()?;
    let offering = state
        .offerings(kind)
        .update(id, &patch, auth.user_id)
        .await?;
    Ok(Json(offering))
}

/// Patch several offerings atomically.
pub async fn bulk_update(
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<OfferingKind>,
    auth: AuthUser,
    Json(body): Json<Vec<BulkPatch>>,
) -> Result<Json<Vec<Offering>>, ApiError> {
    let patches = body
        .into_iter()
        .map(|item| -> Result<_, ApiError> { Ok((item.id.parse::<OfferingId>()?, item.patch)) })
        .collect::<Result<Vec<_>, _>>()?;

    let offerings = state
        .offerings(kind)
        .bulk_update(&patches, auth.user_id)
        .await?;
    Ok(Json(offerings))
}

/// Soft-delete an offering.
pub async fn destroy(
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<OfferingKind>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id: OfferingId = id.parse()?;
    state.offerings(kind).destroy(id, auth.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Pay for and enroll in an offering.
pub async fn apply(
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<OfferingKind>,
    auth: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<ApplyRequest>,
) -> Result<(StatusCode, Json<Payment>), ApiError> {
    let id: OfferingId = id.parse()?;
    let payment = state.offerings(kind).apply(id, &body, auth.user_id).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

/// Cancel the caller's enrollment.
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<OfferingKind>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Payment>, ApiError> {
    let id: OfferingId = id.parse()?;
    Ok(Json(state.offerings(kind).cancel(id, auth.user_id).await?))
}

/// Mark the caller's enrollment completed.
pub async fn complete(
    State(state): State<Arc<AppState>>,
    Extension(kind): Extension<OfferingKind>,
    auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<Offering>, ApiError> {
    let id: OfferingId = id.parse()?;
    Ok(Json(state.offerings(kind).complete(id, auth.user_id).await?))
}
