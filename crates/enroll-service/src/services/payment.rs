//! Payment creation, cancellation and queries.
//!
//! The free functions run inside a caller-supplied transaction and are the
//! building blocks of the offering flows; [`PaymentService`] wraps the
//! payment-only operations in their own transactions.

use std::sync::Arc;

use enroll_core::{
    EnrollError, NewPayment, Payment, PaymentId, PaymentPatch, PaymentQuery, Result, UserId,
};
use enroll_store::{Lock, Store, StoreTx};

use crate::services::offering::adjust_capacity;
use crate::services::registration::handler_for;

/// Create a payment together with its registration.
///
/// # Errors
///
/// Returns `InvalidState` for an inverted validity range and `Conflict` if
/// the user already holds an open payment for the same offering.
pub async fn apply_payment(
    tx: &mut dyn StoreTx,
    input: NewPayment,
    user_id: UserId,
) -> Result<Payment> {
    let payment = Payment::new(input, user_id)?;

    let existing = tx
        .find_open_payment(user_id, payment.target_type, payment.target_id, Lock::ForUpdate)
        .await?;
    if existing.is_some() {
        return Err(EnrollError::Conflict(
            "payment already exists for this offering".into(),
        ));
    }

    tx.insert_payment(&payment).await?;
    let registration = handler_for(payment.target_type)
        .create(tx, user_id, payment.target_id, payment.id)
        .await?;

    tracing::info!(
        payment_id = %payment.id,
        registration_id = %registration.id,
        user_id = %user_id,
        target_type = %payment.target_type,
        target_id = %payment.target_id,
        amount = payment.amount,
        "Payment applied"
    );

    Ok(payment)
}

/// Cancel a payment already locked by the caller and soft-delete its
/// registration. Capacity is left to the caller.
///
/// # Errors
///
/// Returns `InvalidState` if the payment is not `PAID` or its registration
/// is completed, and `NotFound` if the registration is missing.
pub async fn cancel_locked_payment(tx: &mut dyn StoreTx, mut payment: Payment) -> Result<Payment> {
    payment.cancel()?;

    let handler = handler_for(payment.target_type);
    let registration = handler
        .find_by_target_and_payment(tx, payment.target_id, payment.id, Lock::ForUpdate)
        .await?;
    registration.ensure_cancellable()?;

    tx.update_payment(&payment).await?;
    handler.soft_delete(tx, registration.id).await?;

    tracing::info!(
        payment_id = %payment.id,
        registration_id = %registration.id,
        user_id = %payment.user_id,
        target_type = %payment.target_type,
        target_id = %payment.target_id,
        "Payment cancelled"
    );

    Ok(payment)
}

/// Cancel the caller's payment by id, including the capacity decrement.
///
/// The payment's offering is locked before the payment itself so that this
/// path takes locks in the same order as the offering flows.
///
/// # Errors
///
/// Returns `NotFound` if the payment does not exist or belongs to someone
/// else, and the errors of [`cancel_locked_payment`].
pub async fn cancel_payment(
    tx: &mut dyn StoreTx,
    payment_id: PaymentId,
    user_id: UserId,
) -> Result<Payment> {
    let not_found = || EnrollError::not_found("payment", payment_id);

    let target = tx
        .get_payment(payment_id, Lock::None)
        .await?
        .filter(|payment| payment.user_id == user_id)
        .ok_or_else(not_found)?;

    let offering = tx
        .get_offering(target.target_type, target.target_id, Lock::ForUpdate)
        .await?;

    let payment = tx
        .get_payment(payment_id, Lock::ForUpdate)
        .await?
        .filter(|payment| payment.user_id == user_id)
        .ok_or_else(not_found)?;

    let payment = cancel_locked_payment(tx, payment).await?;

    match offering {
        Some(mut offering) => adjust_capacity(tx, &mut offering, -1).await?,
        None => tracing::warn!(
            payment_id = %payment_id,
            target_id = %payment.target_id,
            "Payment cancelled for a deleted offering, capacity left untouched"
        ),
    }

    Ok(payment)
}

/// Payment operations that run in their own transaction.
#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn Store>,
}

impl PaymentService {
    /// Create a payment service over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// List non-destroyed payments matching `query`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn find(&self, query: &PaymentQuery) -> Result<Vec<Payment>> {
        let mut tx = self.store.begin().await?;
        let payments = tx.list_payments(query).await?;
        tx.commit().await?;
        Ok(payments)
    }

    /// Update method or validity range of the caller's payment.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the payment does not exist, `Forbidden` if the
    /// caller does not own it, and `InvalidState` for an inverted range.
    pub async fn update(
        &self,
        payment_id: PaymentId,
        patch: &PaymentPatch,
        user_id: UserId,
    ) -> Result<Payment> {
        let mut tx = self.store.begin().await?;

        let mut payment = tx
            .get_payment(payment_id, Lock::ForUpdate)
            .await?
            .ok_or_else(|| EnrollError::not_found("payment", payment_id))?;
        if payment.user_id != user_id {
            return Err(EnrollError::Forbidden(
                "only the payer may update this payment".into(),
            ));
        }

        payment.apply_patch(patch)?;
        tx.update_payment(&payment).await?;
        tx.commit().await?;

        tracing::info!(payment_id = %payment_id, user_id = %user_id, "Payment updated");
        Ok(payment)
    }

    /// Cancel the caller's payment, soft-delete its registration and release
    /// its seat.
    ///
    /// # Errors
    ///
    /// See [`cancel_payment`].
    pub async fn cancel(&self, payment_id: PaymentId, user_id: UserId) -> Result<Payment> {
        let mut tx = self.store.begin().await?;
        let payment = cancel_payment(&mut *tx, payment_id, user_id).await?;
        tx.commit().await?;
        Ok(payment)
    }
}
