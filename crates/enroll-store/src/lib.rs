//! Transactional storage layer for enrollment.
//!
//! Every read and write goes through a [`StoreTx`], an explicit unit of work
//! obtained from [`Store::begin`]. A transaction either commits as a whole or
//! leaves no trace: dropping it without calling [`StoreTx::commit`] rolls it
//! back, so early returns on error paths never leave partial state.
//!
//! Lookups take a [`Lock`] argument. With [`Lock::ForUpdate`] the matching
//! row is locked exclusively until the transaction ends (`SELECT ... FOR
//! UPDATE` semantics). Waiting for a lock is ordinary latency; a wait that
//! exceeds the configured bound fails with [`StoreError::LockTimeout`], which
//! callers should treat as retryable.
//!
//! Soft-deleted rows are invisible to every lookup.
//!
//! # Backends
//!
//! - [`PgStore`]: PostgreSQL via `sqlx`.
//! - [`MemoryStore`]: in-process tables with per-row async locks and the same
//!   constraints; used for tests and single-node deployments.
//!
//! # Example
//!
//! ```no_run
//! use enroll_core::{OfferingId, OfferingKind};
//! use enroll_store::{Lock, MemoryStore, Store};
//!
//! # async fn example() -> enroll_store::Result<()> {
//! let store = MemoryStore::new();
//! let mut tx = store.begin().await?;
//! let course = tx
//!     .get_offering(OfferingKind::Course, OfferingId::generate(), Lock::ForUpdate)
//!     .await?;
//! assert!(course.is_none());
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod memory;
pub mod postgres;
pub mod schema;

pub use error::{Result, StoreError};
pub use memory::{MemoryStore, Snapshot};
pub use postgres::PgStore;

use async_trait::async_trait;
use enroll_core::{
    Offering, OfferingId, OfferingKind, OfferingQuery, Payment, PaymentId, PaymentQuery,
    Registration, RegistrationId, UserId,
};

/// Whether a lookup locks the rows it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lock {
    /// Plain read.
    None,
    /// Exclusive row lock held until the transaction ends.
    ForUpdate,
}

impl Lock {
    /// `ForUpdate` when `for_update` is set.
    #[must_use]
    pub const fn from_flag(for_update: bool) -> Self {
        if for_update {
            Self::ForUpdate
        } else {
            Self::None
        }
    }
}

/// A source of transactions.
#[async_trait]
pub trait Store: Send + Sync {
    /// Begin a new transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot start a transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTx>>;
}

/// One unit of work against the store.
///
/// All methods may block while waiting for a row lock held by another
/// transaction.
#[async_trait]
pub trait StoreTx: Send {
    // =========================================================================
    // Offerings
    // =========================================================================

    /// Get a non-destroyed offering of `kind` by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or the lock wait times out.
    async fn get_offering(
        &mut self,
        kind: OfferingKind,
        id: OfferingId,
        lock: Lock,
    ) -> Result<Option<Offering>>;

    /// Find a non-destroyed offering of `kind` by exact title.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_offering_by_title(
        &mut self,
        kind: OfferingKind,
        title: &str,
    ) -> Result<Option<Offering>>;

    /// Insert a new offering.
    ///
    /// # Errors
    ///
    /// Returns `UniqueViolation` on a duplicate live title and
    /// `CheckViolation` if the row breaks a check constraint.
    async fn insert_offering(&mut self, offering: &Offering) -> Result<()>;

    /// Overwrite an existing offering row, locking it if not already locked.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the row does not exist, or a constraint error.
    async fn update_offering(&mut self, offering: &Offering) -> Result<()>;

    /// List non-destroyed offerings of `kind`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_offerings(
        &mut self,
        kind: OfferingKind,
        query: &OfferingQuery,
    ) -> Result<Vec<Offering>>;

    // =========================================================================
    // Payments
    // =========================================================================

    /// Get a non-destroyed payment by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or the lock wait times out.
    async fn get_payment(&mut self, id: PaymentId, lock: Lock) -> Result<Option<Payment>>;

    /// Find the user's non-cancelled, non-destroyed payment for an offering.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or the lock wait times out.
    async fn find_open_payment(
        &mut self,
        user_id: UserId,
        target_type: OfferingKind,
        target_id: OfferingId,
        lock: Lock,
    ) -> Result<Option<Payment>>;

    /// Find the user's most recent non-destroyed payment for an offering,
    /// whatever its status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or the lock wait times out.
    async fn find_latest_payment(
        &mut self,
        user_id: UserId,
        target_type: OfferingKind,
        target_id: OfferingId,
        lock: Lock,
    ) -> Result<Option<Payment>>;

    /// Insert a new payment.
    ///
    /// # Errors
    ///
    /// Returns `UniqueViolation` if the user already has an open payment for
    /// the same target, or `CheckViolation` for an inverted validity range.
    async fn insert_payment(&mut self, payment: &Payment) -> Result<()>;

    /// Overwrite an existing payment row, locking it if not already locked.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the row does not exist, or a constraint error.
    async fn update_payment(&mut self, payment: &Payment) -> Result<()>;

    /// List non-destroyed payments matching `query`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn list_payments(&mut self, query: &PaymentQuery) -> Result<Vec<Payment>>;

    // =========================================================================
    // Registrations
    // =========================================================================

    /// Get a non-destroyed registration of `kind` by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or the lock wait times out.
    async fn get_registration(
        &mut self,
        kind: OfferingKind,
        id: RegistrationId,
        lock: Lock,
    ) -> Result<Option<Registration>>;

    /// Find the non-destroyed registration bound to `payment_id` for an offering.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or the lock wait times out.
    async fn find_registration(
        &mut self,
        kind: OfferingKind,
        offering_id: OfferingId,
        payment_id: PaymentId,
        lock: Lock,
    ) -> Result<Option<Registration>>;

    /// Find a non-destroyed registration for the exact
    /// `(user_id, offering_id, payment_id)` triple.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn find_registration_for(
        &mut self,
        kind: OfferingKind,
        user_id: UserId,
        offering_id: OfferingId,
        payment_id: PaymentId,
    ) -> Result<Option<Registration>>;

    /// Insert a new registration.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    async fn insert_registration(&mut self, registration: &Registration) -> Result<()>;

    /// Overwrite an existing registration row, locking it if not already locked.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the row does not exist.
    async fn update_registration(&mut self, registration: &Registration) -> Result<()>;

    // =========================================================================
    // Completion
    // =========================================================================

    /// Make every write in this transaction durable and release its locks.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; nothing is applied in that case.
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every write in this transaction and release its locks.
    ///
    /// Dropping the transaction has the same effect.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend reports a rollback failure.
    async fn rollback(self: Box<Self>) -> Result<()>;
}
