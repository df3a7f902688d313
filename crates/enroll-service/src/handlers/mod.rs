//! API handlers.

pub mod health;
pub mod offerings;
pub mod payments;
