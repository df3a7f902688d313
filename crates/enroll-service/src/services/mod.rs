//! Enrollment orchestration.
//!
//! Three layers, called top-down inside one store transaction:
//!
//! - [`offering`]: user-facing apply / cancel / complete flows plus offering
//!   CRUD, generic over [`OfferingKind`](enroll_core::OfferingKind).
//! - [`payment`]: payment creation and cancellation, bound to registrations.
//! - [`registration`]: per-kind registration rows, selected through a static
//!   lookup table.
//!
//! Row locks are always taken in the order offering, payment, registration.

pub mod offering;
pub mod payment;
pub mod registration;

pub use offering::{ApplyRequest, OfferingService};
pub use payment::PaymentService;
pub use registration::{handler_for, RegistrationHandler};
