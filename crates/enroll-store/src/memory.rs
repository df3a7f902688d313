//! In-memory storage implementation.
//!
//! Committed rows live in plain hash maps behind a mutex. A [`MemoryTx`]
//! buffers its writes privately and publishes them in one step on commit, so
//! other transactions never observe partial work. Row locks are per-row
//! `tokio` mutexes held by the transaction until it ends; re-locking a row the
//! transaction already holds is a no-op. The check and unique constraints of
//! the PostgreSQL schema are enforced on write and again on commit.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex as RowMutex, OwnedMutexGuard};

use enroll_core::{
    Offering, OfferingId, OfferingKind, OfferingQuery, OfferingSort, Payment, PaymentId,
    PaymentQuery, PaymentSort, Registration, RegistrationId, UserId,
};

use crate::error::{Result, StoreError};
use crate::schema::{constraint, title_constraint};
use crate::{Lock, Store, StoreTx};

/// Default bound on how long a transaction waits for a row lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum RowKey {
    Offering(OfferingId),
    Payment(PaymentId),
    Registration(RegistrationId),
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offering(id) => write!(f, "offering {id}"),
            Self::Payment(id) => write!(f, "payment {id}"),
            Self::Registration(id) => write!(f, "registration {id}"),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct Tables {
    offerings: HashMap<OfferingId, Offering>,
    payments: HashMap<PaymentId, Payment>,
    registrations: HashMap<RegistrationId, Registration>,
}

impl Tables {
    fn overlay(&mut self, writes: &Tables) {
        self.offerings
            .extend(writes.offerings.iter().map(|(id, row)| (*id, row.clone())));
        self.payments
            .extend(writes.payments.iter().map(|(id, row)| (*id, row.clone())));
        self.registrations
            .extend(writes.registrations.iter().map(|(id, row)| (*id, row.clone())));
    }

    fn title_taken(&self, offering: &Offering) -> bool {
        !offering.is_destroyed
            && self.offerings.values().any(|other| {
                other.id != offering.id
                    && other.kind == offering.kind
                    && !other.is_destroyed
                    && other.title == offering.title
            })
    }

    fn open_payment_taken(&self, payment: &Payment) -> bool {
        payment.is_open()
            && self.payments.values().any(|other| {
                other.id != payment.id
                    && other.is_open()
                    && other.user_id == payment.user_id
                    && other.target_type == payment.target_type
                    && other.target_id == payment.target_id
            })
    }

    /// Re-check the unique constraints for every row in `writes`.
    fn check_unique(&self, writes: &Tables) -> Result<()> {
        for offering in writes.offerings.values() {
            if self.title_taken(offering) {
                return Err(StoreError::UniqueViolation {
                    constraint: title_constraint(offering.kind).into(),
                });
            }
        }
        for payment in writes.payments.values() {
            if self.open_payment_taken(payment) {
                return Err(StoreError::UniqueViolation {
                    constraint: constraint::PAYMENTS_OPEN_TARGET.into(),
                });
            }
        }
        Ok(())
    }
}

fn check_offering(offering: &Offering) -> Result<()> {
    if offering.start_at >= offering.end_at {
        return Err(StoreError::CheckViolation {
            constraint: constraint::OFFERING_WINDOW.into(),
        });
    }
    if offering.capacity_count < 0 {
        return Err(StoreError::CheckViolation {
            constraint: constraint::CAPACITY_NON_NEGATIVE.into(),
        });
    }
    Ok(())
}

fn check_payment(payment: &Payment) -> Result<()> {
    if payment.valid_from >= payment.valid_to {
        return Err(StoreError::CheckViolation {
            constraint: constraint::PAYMENT_VALIDITY.into(),
        });
    }
    Ok(())
}

fn guard<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| StoreError::Database("in-memory store lock poisoned".into()))
}

fn page<T>(rows: Vec<T>, skip: usize, limit: usize) -> Vec<T> {
    rows.into_iter().skip(skip).take(limit).collect()
}

struct Shared {
    tables: Mutex<Tables>,
    locks: Mutex<HashMap<RowKey, Arc<RowMutex<()>>>>,
    lock_timeout: Duration,
}

/// In-memory [`Store`] with row-level locking.
///
/// Cloning is cheap and clones share the same data.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    /// Create an empty store with [`DEFAULT_LOCK_TIMEOUT`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Create an empty store whose lock waits give up after `lock_timeout`.
    #[must_use]
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                locks: Mutex::new(HashMap::new()),
                lock_timeout,
            }),
        }
    }

    /// Copy of every committed row, destroyed ones included, sorted by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store's internal lock is poisoned.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let tables = guard(&self.shared.tables)?;

        let mut offerings: Vec<_> = tables.offerings.values().cloned().collect();
        offerings.sort_by_key(|row| row.id);
        let mut payments: Vec<_> = tables.payments.values().cloned().collect();
        payments.sort_by_key(|row| row.id);
        let mut registrations: Vec<_> = tables.registrations.values().cloned().collect();
        registrations.sort_by_key(|row| row.id);

        Ok(Snapshot {
            offerings,
            payments,
            registrations,
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("lock_timeout", &self.shared.lock_timeout)
            .finish_non_exhaustive()
    }
}

/// Committed contents of a [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Every offering row.
    pub offerings: Vec<Offering>,
    /// Every payment row.
    pub payments: Vec<Payment>,
    /// Every registration row.
    pub registrations: Vec<Registration>,
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        Ok(Box::new(MemoryTx {
            shared: Arc::clone(&self.shared),
            held: HashMap::new(),
            writes: Tables::default(),
        }))
    }
}

/// A transaction against a [`MemoryStore`].
pub struct MemoryTx {
    shared: Arc<Shared>,
    held: HashMap<RowKey, OwnedMutexGuard<()>>,
    writes: Tables,
}

impl MemoryTx {
    async fn lock_row(&mut self, key: RowKey) -> Result<()> {
        if self.held.contains_key(&key) {
            return Ok(());
        }

        let row = {
            let mut locks = guard(&self.shared.locks)?;
            Arc::clone(locks.entry(key).or_default())
        };

        let held = tokio::time::timeout(self.shared.lock_timeout, row.lock_owned())
            .await
            .map_err(|_| {
                tracing::warn!(row = %key, "Row lock wait timed out");
                StoreError::LockTimeout {
                    row: key.to_string(),
                }
            })?;

        self.held.insert(key, held);
        Ok(())
    }

    /// Committed rows with this transaction's writes laid over them.
    fn view(&self) -> Result<Tables> {
        let mut tables = guard(&self.shared.tables)?.clone();
        tables.overlay(&self.writes);
        Ok(tables)
    }

    fn offering_row(&self, id: OfferingId) -> Result<Option<Offering>> {
        if let Some(row) = self.writes.offerings.get(&id) {
            return Ok(Some(row.clone()));
        }
        Ok(guard(&self.shared.tables)?.offerings.get(&id).cloned())
    }

    fn payment_row(&self, id: PaymentId) -> Result<Option<Payment>> {
        if let Some(row) = self.writes.payments.get(&id) {
            return Ok(Some(row.clone()));
        }
        Ok(guard(&self.shared.tables)?.payments.get(&id).cloned())
    }

    fn registration_row(&self, id: RegistrationId) -> Result<Option<Registration>> {
        if let Some(row) = self.writes.registrations.get(&id) {
            return Ok(Some(row.clone()));
        }
        Ok(guard(&self.shared.tables)?.registrations.get(&id).cloned())
    }

    /// Find the lowest-id registration matching `pred`, locking it if asked.
    ///
    /// After the lock is granted the row is re-read and re-checked, since the
    /// previous holder may have changed it.
    async fn find_registration_where(
        &mut self,
        lock: Lock,
        pred: impl Fn(&Registration) -> bool + Send,
    ) -> Result<Option<Registration>> {
        let candidate = self
            .view()?
            .registrations
            .into_values()
            .filter(|row| !row.is_destroyed && pred(row))
            .min_by_key(|row| row.id);

        match (candidate, lock) {
            (Some(row), Lock::ForUpdate) => {
                self.lock_row(RowKey::Registration(row.id)).await?;
                Ok(self
                    .registration_row(row.id)?
                    .filter(|row| !row.is_destroyed && pred(row)))
            }
            (candidate, _) => Ok(candidate),
        }
    }

    fn release(&mut self) {
        if self.held.is_empty() {
            return;
        }
        let keys: Vec<RowKey> = self.held.keys().copied().collect();
        self.held.clear();

        // Forget lock entries nobody else is holding or waiting on.
        if let Ok(mut locks) = self.shared.locks.lock() {
            for key in keys {
                if locks
                    .get(&key)
                    .is_some_and(|row| Arc::strong_count(row) == 1)
                {
                    locks.remove(&key);
                }
            }
        }
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    // =========================================================================
    // Offerings
    // =========================================================================

    async fn get_offering(
        &mut self,
        kind: OfferingKind,
        id: OfferingId,
        lock: Lock,
    ) -> Result<Option<Offering>> {
        if lock == Lock::ForUpdate {
            self.lock_row(RowKey::Offering(id)).await?;
        }
        Ok(self
            .offering_row(id)?
            .filter(|row| row.kind == kind && !row.is_destroyed))
    }

    async fn find_offering_by_title(
        &mut self,
        kind: OfferingKind,
        title: &str,
    ) -> Result<Option<Offering>> {
        Ok(self
            .view()?
            .offerings
            .into_values()
            .filter(|row| row.kind == kind && !row.is_destroyed && row.title == title)
            .min_by_key(|row| row.id))
    }

    async fn insert_offering(&mut self, offering: &Offering) -> Result<()> {
        check_offering(offering)?;
        let view = self.view()?;
        if view.offerings.contains_key(&offering.id) {
            return Err(StoreError::Database(format!(
                "duplicate primary key: offering {}",
                offering.id
            )));
        }
        if view.title_taken(offering) {
            return Err(StoreError::UniqueViolation {
                constraint: title_constraint(offering.kind).into(),
            });
        }

        self.lock_row(RowKey::Offering(offering.id)).await?;
        self.writes.offerings.insert(offering.id, offering.clone());
        Ok(())
    }

    async fn update_offering(&mut self, offering: &Offering) -> Result<()> {
        self.lock_row(RowKey::Offering(offering.id)).await?;
        if self.offering_row(offering.id)?.is_none() {
            return Err(StoreError::NotFound {
                entity: offering.kind.label(),
                id: offering.id.to_string(),
            });
        }
        check_offering(offering)?;
        if self.view()?.title_taken(offering) {
            return Err(StoreError::UniqueViolation {
                constraint: title_constraint(offering.kind).into(),
            });
        }

        self.writes.offerings.insert(offering.id, offering.clone());
        Ok(())
    }

    async fn list_offerings(
        &mut self,
        kind: OfferingKind,
        query: &OfferingQuery,
    ) -> Result<Vec<Offering>> {
        let mut rows: Vec<Offering> = self
            .view()?
            .offerings
            .into_values()
            .filter(|row| row.kind == kind && !row.is_destroyed)
            .filter(|row| query.status.map_or(true, |status| row.status == status))
            .collect();

        match query.sort {
            OfferingSort::Created => rows.sort_by_key(|row| (row.created_at, row.id)),
            OfferingSort::Popular => rows.sort_by(|a, b| {
                b.capacity_count
                    .cmp(&a.capacity_count)
                    .then_with(|| a.id.cmp(&b.id))
            }),
        }

        Ok(page(rows, query.skip, query.limit))
    }

    // =========================================================================
    // Payments
    // =========================================================================

    async fn get_payment(&mut self, id: PaymentId, lock: Lock) -> Result<Option<Payment>> {
        if lock == Lock::ForUpdate {
            self.lock_row(RowKey::Payment(id)).await?;
        }
        Ok(self.payment_row(id)?.filter(|row| !row.is_destroyed))
    }

    async fn find_open_payment(
        &mut self,
        user_id: UserId,
        target_type: OfferingKind,
        target_id: OfferingId,
        lock: Lock,
    ) -> Result<Option<Payment>> {
        let matches = |row: &Payment| {
            row.is_open()
                && row.user_id == user_id
                && row.target_type == target_type
                && row.target_id == target_id
        };

        let candidate = self
            .view()?
            .payments
            .into_values()
            .filter(|row| matches(row))
            .min_by_key(|row| row.id);

        match (candidate, lock) {
            (Some(row), Lock::ForUpdate) => {
                self.lock_row(RowKey::Payment(row.id)).await?;
                Ok(self.payment_row(row.id)?.filter(|row| matches(row)))
            }
            (candidate, _) => Ok(candidate),
        }
    }

    async fn find_latest_payment(
        &mut self,
        user_id: UserId,
        target_type: OfferingKind,
        target_id: OfferingId,
        lock: Lock,
    ) -> Result<Option<Payment>> {
        let matches = |row: &Payment| {
            !row.is_destroyed
                && row.user_id == user_id
                && row.target_type == target_type
                && row.target_id == target_id
        };

        let candidate = self
            .view()?
            .payments
            .into_values()
            .filter(|row| matches(row))
            .max_by_key(|row| (row.created_at, row.id));

        match (candidate, lock) {
            (Some(row), Lock::ForUpdate) => {
                self.lock_row(RowKey::Payment(row.id)).await?;
                Ok(self.payment_row(row.id)?.filter(|row| matches(row)))
            }
            (candidate, _) => Ok(candidate),
        }
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<()> {
        check_payment(payment)?;
        let view = self.view()?;
        if view.payments.contains_key(&payment.id) {
            return Err(StoreError::Database(format!(
                "duplicate primary key: payment {}",
                payment.id
            )));
        }
        if view.open_payment_taken(payment) {
            return Err(StoreError::UniqueViolation {
                constraint: constraint::PAYMENTS_OPEN_TARGET.into(),
            });
        }

        self.lock_row(RowKey::Payment(payment.id)).await?;
        self.writes.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<()> {
        self.lock_row(RowKey::Payment(payment.id)).await?;
        if self.payment_row(payment.id)?.is_none() {
            return Err(StoreError::NotFound {
                entity: "payment",
                id: payment.id.to_string(),
            });
        }
        check_payment(payment)?;
        if self.view()?.open_payment_taken(payment) {
            return Err(StoreError::UniqueViolation {
                constraint: constraint::PAYMENTS_OPEN_TARGET.into(),
            });
        }

        self.writes.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn list_payments(&mut self, query: &PaymentQuery) -> Result<Vec<Payment>> {
        let mut rows: Vec<Payment> = self
            .view()?
            .payments
            .into_values()
            .filter(|row| query.matches(row))
            .collect();

        match query.sort {
            PaymentSort::Created => rows.sort_by_key(|row| (row.created_at, row.id)),
            PaymentSort::Amount => {
                rows.sort_by(|a, b| b.amount.cmp(&a.amount).then_with(|| a.id.cmp(&b.id)));
            }
        }

        Ok(page(rows, query.skip, query.limit))
    }

    // =========================================================================
    // Registrations
    // =========================================================================

    async fn get_registration(
        &mut self,
        kind: OfferingKind,
        id: RegistrationId,
        lock: Lock,
    ) -> Result<Option<Registration>> {
        if lock == Lock::ForUpdate {
            self.lock_row(RowKey::Registration(id)).await?;
        }
        Ok(self
            .registration_row(id)?
            .filter(|row| row.kind == kind && !row.is_destroyed))
    }

    async fn find_registration(
        &mut self,
        kind: OfferingKind,
        offering_id: OfferingId,
        payment_id: PaymentId,
        lock: Lock,
    ) -> Result<Option<Registration>> {
        self.find_registration_where(lock, move |row| {
            row.kind == kind && row.offering_id == offering_id && row.payment_id == payment_id
        })
        .await
    }

    async fn find_registration_for(
        &mut self,
        kind: OfferingKind,
        user_id: UserId,
        offering_id: OfferingId,
        payment_id: PaymentId,
    ) -> Result<Option<Registration>> {
        self.find_registration_where(Lock::None, move |row| {
            row.kind == kind
                && row.user_id == user_id
                && row.offering_id == offering_id
                && row.payment_id == payment_id
        })
        .await
    }

    async fn insert_registration(&mut self, registration: &Registration) -> Result<()> {
        if self.registration_row(registration.id)?.is_some() {
            return Err(StoreError::Database(format!(
                "duplicate primary key: registration {}",
                registration.id
            )));
        }
        self.lock_row(RowKey::Registration(registration.id)).await?;
        self.writes
            .registrations
            .insert(registration.id, registration.clone());
        Ok(())
    }

    async fn update_registration(&mut self, registration: &Registration) -> Result<()> {
        self.lock_row(RowKey::Registration(registration.id)).await?;
        if self.registration_row(registration.id)?.is_none() {
            return Err(StoreError::NotFound {
                entity: registration.kind.registration_label(),
                id: registration.id.to_string(),
            });
        }
        self.writes
            .registrations
            .insert(registration.id, registration.clone());
        Ok(())
    }

    // =========================================================================
    // Completion
    // =========================================================================

    async fn commit(mut self: Box<Self>) -> Result<()> {
        {
            let mut tables = guard(&self.shared.tables)?;
            let mut next = tables.clone();
            next.overlay(&self.writes);
            next.check_unique(&self.writes)?;
            *tables = next;
        }
        self.writes = Tables::default();
        self.release();
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.writes = Tables::default();
        self.release();
        Ok(())
    }
}
