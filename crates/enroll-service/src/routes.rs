//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, patch, post};
use axum::{Extension, Router};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use enroll_core::OfferingKind;

use crate::handlers::{health, offerings, payments};
use crate::state::AppState;

/// Maximum concurrent requests for API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
/// - `GET /v1/{courses|tests}` - List offerings
/// - `GET /v1/{courses|tests}/{id}` - Get one offering
///
/// ## Offerings (JWT auth)
/// - `POST /v1/{courses|tests}` - Create
/// - `PATCH /v1/{courses|tests}` - Bulk update (owner only)
/// - `PATCH /v1/{courses|tests}/{id}` - Update (owner only)
/// - `DELETE /v1/{courses|tests}/{id}` - Soft-delete (owner only)
/// - `POST /v1/{courses|tests}/{id}/apply` - Pay and enroll
/// - `POST /v1/{courses|tests}/{id}/cancel` - Cancel enrollment
/// - `POST /v1/{courses|tests}/{id}/complete` - Complete enrollment
///
/// ## Payments (JWT auth)
/// - `GET /v1/payments/me` - Caller's payments
/// - `PATCH /v1/payments/{id}` - Update method or validity
/// - `POST /v1/payments/{id}/cancel` - Cancel and release the seat
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let payment_routes = Router::new()
        .route("/me", get(payments::list_mine))
        .route("/:id", patch(payments::update))
        .route("/:id/cancel", post(payments::cancel));

    let api_routes = Router::new()
        .nest("/courses", offering_routes(OfferingKind::Course))
        .nest("/tests", offering_routes(OfferingKind::Test))
        .nest("/payments", payment_routes)
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Routes shared by courses and tests.
fn offering_routes(kind: OfferingKind) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/",
            get(offerings::list)
                .post(offerings::create)
                .patch(offerings::bulk_update),
        )
        .route(
            "/:id",
            get(offerings::get_one)
                .patch(offerings::update)
                .delete(offerings::destroy),
        )
        .route("/:id/apply", post(offerings::apply))
        .route("/:id/cancel", post(offerings::cancel))
        .route("/:id/complete", post(offerings::complete))
        .layer(Extension(kind))
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
