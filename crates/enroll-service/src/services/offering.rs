//! Offering flows: CRUD plus apply, cancel and complete.
//!
//! One [`OfferingService`] serves both courses and tests; the kind selects the
//! table, the capacity column and the registration handler. Every public
//! method is a single store transaction. The capacity counter is only written
//! while its offering row is locked, and always as the last write.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Deserialize;

use enroll_core::{
    ensure_completable, EnrollError, NewOffering, NewPayment, Offering, OfferingId, OfferingKind,
    OfferingPatch, OfferingQuery, Payment, PaymentMethod, PaymentStatus, RegistrationPatch,
    Result, UserId,
};
use enroll_store::{Lock, Store, StoreTx};

use crate::services::payment::{apply_payment, cancel_locked_payment};
use crate::services::registration::handler_for;

/// Body of an apply request.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplyRequest {
    /// Amount paid, in minor currency units.
    pub amount: i64,
    /// Payment channel.
    #[serde(default)]
    pub method: Option<PaymentMethod>,
}

/// Write a new capacity counter through the offering update path.
///
/// The caller must hold the offering's row lock. Decrements are floored at 0.
pub(crate) async fn adjust_capacity(
    tx: &mut dyn StoreTx,
    offering: &mut Offering,
    delta: i64,
) -> Result<()> {
    let before = offering.capacity_count;
    let after = before.saturating_add(delta).max(0);
    write_patch(tx, offering, &OfferingPatch::capacity(after)).await?;

    tracing::info!(
        offering_id = %offering.id,
        kind = %offering.kind,
        before,
        after,
        "Capacity changed"
    );
    Ok(())
}

/// Merge `patch` into a locked offering and persist it.
async fn write_patch(
    tx: &mut dyn StoreTx,
    offering: &mut Offering,
    patch: &OfferingPatch,
) -> Result<()> {
    let mut updated = offering.clone();
    updated.apply_patch(patch)?;
    tx.update_offering(&updated).await?;
    *offering = updated;
    Ok(())
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Log unexpected failures at the orchestration boundary.
fn surface(op: &'static str, kind: OfferingKind, err: EnrollError) -> EnrollError {
    match &err {
        EnrollError::Internal(msg) => {
            tracing::error!(op, kind = %kind, error = %msg, "Enrollment operation failed");
        }
        EnrollError::Busy(msg) => {
            tracing::warn!(op, kind = %kind, error = %msg, "Enrollment operation hit lock contention");
        }
        other => tracing::debug!(op, kind = %kind, error = %other, "Enrollment operation rejected"),
    }
    err
}

/// Enrollment flows for one [`OfferingKind`].
#[derive(Clone)]
pub struct OfferingService {
    store: Arc<dyn Store>,
    kind: OfferingKind,
}

impl OfferingService {
    /// Create a service for offerings of `kind`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, kind: OfferingKind) -> Self {
        Self { store, kind }
    }

    /// The kind this service manages.
    #[must_use]
    pub const fn kind(&self) -> OfferingKind {
        self.kind
    }

    async fn lock_live(&self, tx: &mut dyn StoreTx, id: OfferingId) -> Result<Offering> {
        tx.get_offering(self.kind, id, Lock::ForUpdate)
            .await?
            .ok_or_else(|| EnrollError::not_found(self.kind.label(), id))
    }

    fn ensure_owner(&self, offering: &Offering, actor: UserId) -> Result<()> {
        if offering.owner_id != actor {
            return Err(EnrollError::Forbidden(format!(
                "only the owner may modify this {}",
                self.kind.label()
            )));
        }
        Ok(())
    }

    fn ensure_open(&self, offering: &Offering) -> Result<NaiveDate> {
        let today = today();
        if !offering.is_open_on(today) {
            return Err(EnrollError::InvalidState(format!(
                "{} is not open on {today} (window {} to {})",
                self.kind.label(),
                offering.start_at,
                offering.end_at
            )));
        }
        Ok(today)
    }

    // =========================================================================
    // CRUD
    // =========================================================================

    /// Create an offering owned by `owner_id`.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` on a duplicate live title and `InvalidState` for an
    /// inverted window or negative amounts.
    pub async fn create(&self, input: NewOffering, owner_id: UserId) -> Result<Offering> {
        let mut tx = self.store.begin().await?;

        if tx
            .find_offering_by_title(self.kind, &input.title)
            .await?
            .is_some()
        {
            return Err(EnrollError::Conflict(format!(
                "{} already registered",
                self.kind.label()
            )));
        }

        let offering = Offering::new(self.kind, input, owner_id)?;
        tx.insert_offering(&offering).await?;
        tx.commit().await?;

        tracing::info!(
            offering_id = %offering.id,
            kind = %self.kind,
            owner_id = %owner_id,
            title = %offering.title,
            "Offering created"
        );
        Ok(offering)
    }

    /// Get a live offering.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if it is absent or soft-deleted.
    pub async fn get(&self, id: OfferingId) -> Result<Offering> {
        let mut tx = self.store.begin().await?;
        let offering = tx
            .get_offering(self.kind, id, Lock::None)
            .await?
            .ok_or_else(|| EnrollError::not_found(self.kind.label(), id))?;
        tx.commit().await?;
        Ok(offering)
    }

    /// List live offerings.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn find(&self, query: &OfferingQuery) -> Result<Vec<Offering>> {
        let mut tx = self.store.begin().await?;
        let offerings = tx.list_offerings(self.kind, query).await?;
        tx.commit().await?;
        Ok(offerings)
    }

    /// Apply a partial update to an offering owned by `actor`.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `Forbidden` for a non-owner, `InvalidState` if the
    /// merged window is inverted, and `Conflict` for a duplicate title.
    pub async fn update(
        &self,
        id: OfferingId,
        patch: &OfferingPatch,
        actor: UserId,
    ) -> Result<Offering> {
        let mut tx = self.store.begin().await?;
        let mut offering = self.lock_live(&mut *tx, id).await?;
        self.ensure_owner(&offering, actor)?;
        write_patch(&mut *tx, &mut offering, patch).await?;
        tx.commit().await?;

        tracing::info!(offering_id = %id, kind = %self.kind, "Offering updated");
        Ok(offering)
    }

    /// Apply several patches in one transaction.
    ///
    /// Rows are locked in ascending id order; results come back in input
    /// order. Any failure discards every patch.
    ///
    /// # Errors
    ///
    /// Returns the first error any patch produces.
    pub async fn bulk_update(
        &self,
        patches: &[(OfferingId, OfferingPatch)],
        actor: UserId,
    ) -> Result<Vec<Offering>> {
        let mut tx = self.store.begin().await?;

        let ids: BTreeSet<OfferingId> = patches.iter().map(|(id, _)| *id).collect();
        let mut locked = HashMap::with_capacity(ids.len());
        for id in ids {
            let offering = self.lock_live(&mut *tx, id).await?;
            self.ensure_owner(&offering, actor)?;
            locked.insert(id, offering);
        }

        let mut results = Vec::with_capacity(patches.len());
        for (id, patch) in patches {
            let offering = locked
                .get_mut(id)
                .ok_or_else(|| EnrollError::Internal(format!("offering {id} was not locked")))?;
            write_patch(&mut *tx, offering, patch).await?;
            results.push(offering.clone());
        }

        tx.commit()
            .await
            .map_err(|err| surface("bulk_update", self.kind, err.into()))?;

        tracing::info!(kind = %self.kind, count = results.len(), "Offerings bulk updated");
        Ok(results)
    }

    /// Soft-delete an offering owned by `actor`. Its title becomes reusable.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` or `Forbidden`.
    pub async fn destroy(&self, id: OfferingId, actor: UserId) -> Result<Offering> {
        let mut tx = self.store.begin().await?;
        let mut offering = self.lock_live(&mut *tx, id).await?;
        self.ensure_owner(&offering, actor)?;

        let patch = OfferingPatch {
            is_destroyed: Some(true),
            ..OfferingPatch::default()
        };
        write_patch(&mut *tx, &mut offering, &patch).await?;
        tx.commit().await?;

        tracing::info!(offering_id = %id, kind = %self.kind, "Offering deleted");
        Ok(offering)
    }

    // =========================================================================
    // Enrollment
    // =========================================================================

    /// Pay for and register `user_id` in an offering, taking one seat.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for a missing offering, `InvalidState` outside the
    /// window, `InsufficientAmount` below cost, and `Conflict` if the user
    /// already applied or the offering is full.
    pub async fn apply(
        &self,
        id: OfferingId,
        request: &ApplyRequest,
        user_id: UserId,
    ) -> Result<Payment> {
        let mut tx = self.store.begin().await?;
        let payment = self
            .apply_in(&mut *tx, id, request, user_id)
            .await
            .map_err(|err| surface("apply", self.kind, err))?;
        tx.commit()
            .await
            .map_err(|err| surface("apply", self.kind, err.into()))?;
        Ok(payment)
    }

    async fn apply_in(
        &self,
        tx: &mut dyn StoreTx,
        id: OfferingId,
        request: &ApplyRequest,
        user_id: UserId,
    ) -> Result<Payment> {
        let mut offering = self.lock_live(tx, id).await?;
        let today = self.ensure_open(&offering)?;

        if request.amount < offering.cost {
            return Err(EnrollError::InsufficientAmount {
                amount: request.amount,
                cost: offering.cost,
            });
        }

        if tx
            .find_open_payment(user_id, self.kind, id, Lock::ForUpdate)
            .await?
            .is_some()
        {
            return Err(EnrollError::Conflict(format!(
                "{} already applied",
                self.kind.label()
            )));
        }

        if offering.is_full() {
            return Err(EnrollError::Conflict(format!(
                "{} is full",
                self.kind.label()
            )));
        }

        // The last day of a window still needs a non-empty validity range.
        let valid_to = if offering.end_at > today {
            offering.end_at
        } else {
            offering
                .end_at
                .succ_opt()
                .ok_or_else(|| EnrollError::InvalidState("end_at out of range".into()))?
        };

        let payment = apply_payment(
            tx,
            NewPayment {
                amount: request.amount,
                method: request.method,
                status: PaymentStatus::Paid,
                target_type: self.kind,
                target_id: id,
                title: offering.title.clone(),
                paid_at: Some(Utc::now()),
                valid_from: today,
                valid_to,
            },
            user_id,
        )
        .await?;

        adjust_capacity(tx, &mut offering, 1).await?;
        Ok(payment)
    }

    /// Cancel `user_id`'s payment for an offering and release the seat.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the offering or an open payment is missing and
    /// `InvalidState` outside the window, for an unpaid payment, or when the
    /// registration is already completed.
    pub async fn cancel(&self, id: OfferingId, user_id: UserId) -> Result<Payment> {
        let mut tx = self.store.begin().await?;
        let payment = self
            .cancel_in(&mut *tx, id, user_id)
            .await
            .map_err(|err| surface("cancel", self.kind, err))?;
        tx.commit()
            .await
            .map_err(|err| surface("cancel", self.kind, err.into()))?;
        Ok(payment)
    }

    async fn cancel_in(
        &self,
        tx: &mut dyn StoreTx,
        id: OfferingId,
        user_id: UserId,
    ) -> Result<Payment> {
        let mut offering = self.lock_live(tx, id).await?;
        self.ensure_open(&offering)?;

        let payment = tx
            .find_open_payment(user_id, self.kind, id, Lock::ForUpdate)
            .await?
            .ok_or_else(|| {
                EnrollError::not_found("payment", format!("{} {id}", self.kind.label()))
            })?;
        if payment.status != PaymentStatus::Paid {
            return Err(EnrollError::InvalidState("payment not paid".into()));
        }

        let payment = cancel_locked_payment(tx, payment).await?;
        adjust_capacity(tx, &mut offering, -1).await?;
        Ok(payment)
    }

    /// Mark `user_id`'s registration in an offering completed.
    ///
    /// Capacity is unchanged; the offering is returned as loaded.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the offering, payment or registration is missing
    /// and `Conflict` if the latest payment is not `PAID`, cancelled included.
    pub async fn complete(&self, id: OfferingId, user_id: UserId) -> Result<Offering> {
        let mut tx = self.store.begin().await?;
        let offering = self
            .complete_in(&mut *tx, id, user_id)
            .await
            .map_err(|err| surface("complete", self.kind, err))?;
        tx.commit()
            .await
            .map_err(|err| surface("complete", self.kind, err.into()))?;
        Ok(offering)
    }

    async fn complete_in(
        &self,
        tx: &mut dyn StoreTx,
        id: OfferingId,
        user_id: UserId,
    ) -> Result<Offering> {
        let offering = self.lock_live(tx, id).await?;

        // A cancelled payment is still the user's payment; it fails below.
        let payment = tx
            .find_latest_payment(user_id, self.kind, id, Lock::ForUpdate)
            .await?
            .ok_or_else(|| {
                EnrollError::not_found("payment", format!("{} {id}", self.kind.label()))
            })?;
        ensure_completable(self.kind, payment.status)?;

        let handler = handler_for(self.kind);
        let registration = handler
            .find_by_target_and_payment(tx, id, payment.id, Lock::ForUpdate)
            .await?;
        handler
            .update(tx, registration.id, &RegistrationPatch::complete())
            .await?;

        tracing::info!(
            offering_id = %id,
            registration_id = %registration.id,
            user_id = %user_id,
            kind = %self.kind,
            "Registration completed"
        );
        Ok(offering)
    }
}
