//! Enrollment HTTP API service.
//!
//! This crate provides the HTTP API for course and test enrollment:
//!
//! - Offering management (create, list, update, bulk update, soft-delete)
//! - Apply / cancel / complete, binding a payment, a registration and a seat
//! - The caller's payment history, updates and standalone cancellation
//!
//! # Authentication
//!
//! Mutating endpoints require an HS256 bearer token whose `sub` claim is the
//! caller's user id.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod services;
pub mod state;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use routes::create_router;
pub use services::{OfferingService, PaymentService};
pub use state::AppState;
