//! Registration rows for courses and tests.

use async_trait::async_trait;

use enroll_core::{
    EnrollError, OfferingId, OfferingKind, PaymentId, Registration, RegistrationId,
    RegistrationPatch, Result, UserId,
};
use enroll_store::{Lock, StoreTx};

/// Registration operations for one offering kind.
///
/// Every method runs inside the caller's transaction.
#[async_trait]
pub trait RegistrationHandler: Send + Sync {
    /// The offering kind these registrations belong to.
    fn kind(&self) -> OfferingKind;

    /// Insert a pending registration bound to `payment_id`.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if a live registration already exists for the same
    /// user, offering and payment.
    async fn create(
        &self,
        tx: &mut dyn StoreTx,
        user_id: UserId,
        offering_id: OfferingId,
        payment_id: PaymentId,
    ) -> Result<Registration>;

    /// Load the live registration bound to `payment_id`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if there is none.
    async fn find_by_target_and_payment(
        &self,
        tx: &mut dyn StoreTx,
        offering_id: OfferingId,
        payment_id: PaymentId,
        lock: Lock,
    ) -> Result<Registration>;

    /// Apply a partial update under a row lock.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the registration is absent or soft-deleted.
    async fn update(
        &self,
        tx: &mut dyn StoreTx,
        id: RegistrationId,
        patch: &RegistrationPatch,
    ) -> Result<Registration>;

    /// Soft-delete a registration.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the registration is absent or already deleted.
    async fn soft_delete(&self, tx: &mut dyn StoreTx, id: RegistrationId) -> Result<Registration> {
        self.update(tx, id, &RegistrationPatch::destroy()).await
    }
}

/// Registrations stored in the table for one [`OfferingKind`].
#[derive(Debug, Clone, Copy)]
struct KindRegistrations {
    kind: OfferingKind,
}

static COURSE_REGISTRATIONS: KindRegistrations = KindRegistrations {
    kind: OfferingKind::Course,
};

static TEST_REGISTRATIONS: KindRegistrations = KindRegistrations {
    kind: OfferingKind::Test,
};

/// The registration handler for `kind`.
#[must_use]
pub fn handler_for(kind: OfferingKind) -> &'static dyn RegistrationHandler {
    match kind {
        OfferingKind::Course => &COURSE_REGISTRATIONS,
        OfferingKind::Test => &TEST_REGISTRATIONS,
    }
}

#[async_trait]
impl RegistrationHandler for KindRegistrations {
    fn kind(&self) -> OfferingKind {
        self.kind
    }

    async fn create(
        &self,
        tx: &mut dyn StoreTx,
        user_id: UserId,
        offering_id: OfferingId,
        payment_id: PaymentId,
    ) -> Result<Registration> {
        let existing = tx
            .find_registration_for(self.kind, user_id, offering_id, payment_id)
            .await?;
        if existing.is_some() {
            return Err(EnrollError::Conflict(format!(
                "{} already exists",
                self.kind.registration_label()
            )));
        }

        let registration = Registration::new(self.kind, user_id, offering_id, payment_id);
        tx.insert_registration(&registration).await?;

        tracing::debug!(
            registration_id = %registration.id,
            offering_id = %offering_id,
            payment_id = %payment_id,
            kind = %self.kind,
            "Registration created"
        );

        Ok(registration)
    }

    async fn find_by_target_and_payment(
        &self,
        tx: &mut dyn StoreTx,
        offering_id: OfferingId,
        payment_id: PaymentId,
        lock: Lock,
    ) -> Result<Registration> {
        tx.find_registration(self.kind, offering_id, payment_id, lock)
            .await?
            .ok_or_else(|| {
                EnrollError::not_found(self.kind.registration_label(), format!("payment {payment_id}"))
            })
    }

    async fn update(
        &self,
        tx: &mut dyn StoreTx,
        id: RegistrationId,
        patch: &RegistrationPatch,
    ) -> Result<Registration> {
        let mut registration = tx
            .get_registration(self.kind, id, Lock::ForUpdate)
            .await?
            .ok_or_else(|| EnrollError::not_found(self.kind.registration_label(), id))?;

        registration.apply_patch(patch);
        tx.update_registration(&registration).await?;

        tracing::debug!(
            registration_id = %id,
            status = registration.status.as_str(),
            is_destroyed = registration.is_destroyed,
            "Registration updated"
        );

        Ok(registration)
    }
}
