//! Core types and utilities for course and test enrollment.
//!
//! This crate provides the foundational types used throughout the service:
//!
//! - **Identifiers**: `UserId`, `OfferingId`, `PaymentId`, `RegistrationId`
//! - **Offerings**: `Offering`, `OfferingKind`, `OfferingPatch`
//! - **Payments**: `Payment`, `PaymentStatus`, `PaymentMethod`
//! - **Registrations**: `Registration`, `RegistrationStatus`
//! - **Errors**: `EnrollError` and its `ErrorKind` taxonomy
//!
//! # Money
//!
//! Amounts and costs are `i64` in the minor currency unit; there is no
//! floating point anywhere in the payment path.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod ids;
pub mod offering;
pub mod payment;
pub mod registration;

pub use error::{EnrollError, ErrorKind, Result};
pub use ids::{IdError, OfferingId, PaymentId, RegistrationId, UserId};
pub use offering::{
    validate_window, NewOffering, Offering, OfferingKind, OfferingPatch, OfferingQuery,
    OfferingSort, OfferingStatus, DEFAULT_PAGE_LIMIT,
};
pub use payment::{
    NewPayment, Payment, PaymentMethod, PaymentPatch, PaymentQuery, PaymentSort, PaymentStatus,
};
pub use registration::{ensure_completable, Registration, RegistrationPatch, RegistrationStatus};
