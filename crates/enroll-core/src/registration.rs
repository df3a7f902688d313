//! Registration types.
//!
//! A registration is a user's enrollment in one offering, bound 1:1 to the
//! payment that funded it. It is created with its payment, completed only
//! while that payment is paid, and soft-deleted when the payment is cancelled.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EnrollError, Result};
use crate::ids::{OfferingId, PaymentId, RegistrationId, UserId};
use crate::offering::OfferingKind;
use crate::payment::PaymentStatus;

/// Completion state of a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegistrationStatus {
    /// Enrolled, not yet completed.
    Pending,
    /// Completed; the funding payment can no longer be cancelled.
    Completed,
}

impl RegistrationStatus {
    /// Upper-case wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
        }
    }
}

impl FromStr for RegistrationStatus {
    type Err = EnrollError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "COMPLETED" => Ok(Self::Completed),
            other => Err(EnrollError::InvalidState(format!(
                "unknown registration status: {other}"
            ))),
        }
    }
}

/// A user's enrollment in a course or test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registration {
    /// Identifier.
    pub id: RegistrationId,

    /// Course or test registration.
    pub kind: OfferingKind,

    /// The enrolled user.
    pub user_id: UserId,

    /// The offering enrolled in.
    pub offering_id: OfferingId,

    /// The payment that created this registration.
    pub payment_id: PaymentId,

    /// Completion state.
    pub status: RegistrationStatus,

    /// Soft-delete flag.
    pub is_destroyed: bool,

    /// When the registration was created.
    pub registered_at: DateTime<Utc>,

    /// When the registration was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Registration {
    /// Build a pending registration bound to `payment_id`.
    #[must_use]
    pub fn new(
        kind: OfferingKind,
        user_id: UserId,
        offering_id: OfferingId,
        payment_id: PaymentId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RegistrationId::generate(),
            kind,
            user_id,
            offering_id,
            payment_id,
            status: RegistrationStatus::Pending,
            is_destroyed: false,
            registered_at: now,
            updated_at: now,
        }
    }

    /// Fail unless the registration may be soft-deleted with its payment.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` for a completed registration.
    pub fn ensure_cancellable(&self) -> Result<()> {
        if self.status == RegistrationStatus::Completed {
            return Err(EnrollError::InvalidState(format!(
                "cannot cancel a completed {} registration",
                self.kind.label()
            )));
        }
        Ok(())
    }

    /// Merge a partial update, stamping `updated_at`.
    pub fn apply_patch(&mut self, patch: &RegistrationPatch) {
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(destroyed) = patch.is_destroyed {
            self.is_destroyed = destroyed;
        }
        self.updated_at = Utc::now();
    }
}

/// Partial update of a registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistrationPatch {
    /// New status.
    pub status: Option<RegistrationStatus>,
    /// Soft-delete flag.
    pub is_destroyed: Option<bool>,
}

impl RegistrationPatch {
    /// Mark the registration completed.
    #[must_use]
    pub const fn complete() -> Self {
        Self {
            status: Some(RegistrationStatus::Completed),
            is_destroyed: None,
        }
    }

    /// Soft-delete the registration.
    #[must_use]
    pub const fn destroy() -> Self {
        Self {
            status: None,
            is_destroyed: Some(true),
        }
    }
}

/// Check that a registration may be completed given its payment's status.
///
/// # Errors
///
/// Returns `Conflict` unless the payment is `PAID`.
pub fn ensure_completable(kind: OfferingKind, payment_status: PaymentStatus) -> Result<()> {
    if payment_status != PaymentStatus::Paid {
        return Err(EnrollError::Conflict(format!(
            "cannot complete a {} that is not paid",
            kind.label()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending() -> Registration {
        Registration::new(
            OfferingKind::Test,
            UserId::generate(),
            OfferingId::generate(),
            PaymentId::generate(),
        )
    }

    #[test]
    fn new_registration_is_pending() {
        let registration = pending();
        assert_eq!(registration.status, RegistrationStatus::Pending);
        assert!(registration.ensure_cancellable().is_ok());
    }

    #[test]
    fn completed_registration_blocks_cancel() {
        let mut registration = pending();
        registration.apply_patch(&RegistrationPatch::complete());
        let err = registration.ensure_cancellable().unwrap_err();
        assert_eq!(err.to_string(), "cannot cancel a completed test registration");
    }

    #[test]
    fn completion_requires_paid_payment() {
        assert!(ensure_completable(OfferingKind::Course, PaymentStatus::Paid).is_ok());
        assert!(matches!(
            ensure_completable(OfferingKind::Course, PaymentStatus::Pending),
            Err(EnrollError::Conflict(_))
        ));
    }

    #[test]
    fn destroy_patch_only_sets_flag() {
        let mut registration = pending();
        registration.apply_patch(&RegistrationPatch::destroy());
        assert!(registration.is_destroyed);
        assert_eq!(registration.status, RegistrationStatus::Pending);
    }
}
