//! PostgreSQL storage implementation.
//!
//! Row locks are `SELECT ... FOR UPDATE`. Every transaction sets a local
//! `lock_timeout` so a stuck lock wait surfaces as
//! [`StoreError::LockTimeout`] instead of hanging the request.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};

use enroll_core::{
    Offering, OfferingId, OfferingKind, OfferingQuery, OfferingSort, Payment, PaymentId,
    PaymentQuery, PaymentSort, Registration, RegistrationId, UserId,
};

use crate::error::{Result, StoreError};
use crate::schema::{
    capacity_column, offering_table, registration_table, registration_target_column,
};
use crate::{Lock, Store, StoreTx};

/// PostgreSQL-backed [`Store`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgStore {
    /// Connect a pool to `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be reached.
    pub async fn connect(url: &str, max_connections: u32, lock_timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self::new(pool, lock_timeout))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Apply pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

impl std::fmt::Debug for PgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStore")
            .field("lock_timeout", &self.lock_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let mut tx = self.pool.begin().await?;
        let millis = self.lock_timeout.as_millis();
        sqlx::query(&format!("SET LOCAL lock_timeout = '{millis}ms'"))
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgTx { tx }))
    }
}

/// A transaction against a [`PgStore`].
///
/// Dropping it without committing rolls it back.
pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

// =============================================================================
// Row decoding
// =============================================================================

fn parse<T>(value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse()
        .map_err(|e| StoreError::Serialization(format!("{value:?}: {e}")))
}

fn parse_opt<T>(value: Option<String>) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    value.as_deref().map(parse).transpose()
}

fn offering_from_row(kind: OfferingKind, row: &PgRow) -> Result<Offering> {
    Ok(Offering {
        id: parse(row.try_get::<&str, _>("id")?)?,
        kind,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        start_at: row.try_get("start_at")?,
        end_at: row.try_get("end_at")?,
        status: parse(row.try_get::<&str, _>("status")?)?,
        cost: row.try_get("cost")?,
        capacity_count: row.try_get("capacity_count")?,
        capacity_limit: row.try_get("capacity_limit")?,
        owner_id: UserId::from_uuid(row.try_get("owner_id")?),
        is_destroyed: row.try_get("is_destroyed")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment> {
    Ok(Payment {
        id: parse(row.try_get::<&str, _>("id")?)?,
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        amount: row.try_get("amount")?,
        method: parse_opt(row.try_get("method")?)?,
        status: parse(row.try_get::<&str, _>("status")?)?,
        target_type: parse(row.try_get::<&str, _>("target_type")?)?,
        target_id: parse(row.try_get::<&str, _>("target_id")?)?,
        title: row.try_get("title")?,
        valid_from: row.try_get("valid_from")?,
        valid_to: row.try_get("valid_to")?,
        paid_at: row.try_get("paid_at")?,
        cancelled_at: row.try_get("cancelled_at")?,
        is_destroyed: row.try_get("is_destroyed")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn registration_from_row(kind: OfferingKind, row: &PgRow) -> Result<Registration> {
    Ok(Registration {
        id: parse(row.try_get::<&str, _>("id")?)?,
        kind,
        user_id: UserId::from_uuid(row.try_get("user_id")?),
        offering_id: parse(row.try_get::<&str, _>("offering_id")?)?,
        payment_id: parse(row.try_get::<&str, _>("payment_id")?)?,
        status: parse(row.try_get::<&str, _>("status")?)?,
        is_destroyed: row.try_get("is_destroyed")?,
        registered_at: row.try_get("registered_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// =============================================================================
// Statement text
// =============================================================================

fn offering_select(kind: OfferingKind) -> String {
    format!(
        "SELECT id, title, description, start_at, end_at, status, cost, \
         {capacity} AS capacity_count, capacity_limit, owner_id, is_destroyed, \
         created_at, updated_at FROM {table}",
        capacity = capacity_column(kind),
        table = offering_table(kind),
    )
}

const PAYMENT_SELECT: &str = "SELECT id, user_id, amount, method, status, target_type, \
     target_id, title, valid_from, valid_to, paid_at, cancelled_at, is_destroyed, \
     created_at, updated_at FROM payments";

fn registration_select(kind: OfferingKind) -> String {
    format!(
        "SELECT id, user_id, {target} AS offering_id, payment_id, status, is_destroyed, \
         registered_at, updated_at FROM {table}",
        target = registration_target_column(kind),
        table = registration_table(kind),
    )
}

const fn lock_clause(lock: Lock) -> &'static str {
    match lock {
        Lock::None => "",
        Lock::ForUpdate => " FOR UPDATE",
    }
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl StoreTx for PgTx {
    // =========================================================================
    // Offerings
    // =========================================================================

    async fn get_offering(
        &mut self,
        kind: OfferingKind,
        id: OfferingId,
        lock: Lock,
    ) -> Result<Option<Offering>> {
        let sql = format!(
            "{} WHERE id = $1 AND NOT is_destroyed{}",
            offering_select(kind),
            lock_clause(lock)
        );
        sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut *self.tx)
            .await?
            .map(|row| offering_from_row(kind, &row))
            .transpose()
    }

    async fn find_offering_by_title(
        &mut self,
        kind: OfferingKind,
        title: &str,
    ) -> Result<Option<Offering>> {
        let sql = format!(
            "{} WHERE title = $1 AND NOT is_destroyed",
            offering_select(kind)
        );
        sqlx::query(&sql)
            .bind(title)
            .fetch_optional(&mut *self.tx)
            .await?
            .map(|row| offering_from_row(kind, &row))
            .transpose()
    }

    async fn insert_offering(&mut self, offering: &Offering) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (id, title, description, start_at, end_at, status, cost, \
             {}, capacity_limit, owner_id, is_destroyed, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            offering_table(offering.kind),
            capacity_column(offering.kind),
        );
        sqlx::query(&sql)
            .bind(offering.id.to_string())
            .bind(&offering.title)
            .bind(&offering.description)
            .bind(offering.start_at)
            .bind(offering.end_at)
            .bind(offering.status.as_str())
            .bind(offering.cost)
            .bind(offering.capacity_count)
            .bind(offering.capacity_limit)
            .bind(*offering.owner_id.as_uuid())
            .bind(offering.is_destroyed)
            .bind(offering.created_at)
            .bind(offering.updated_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn update_offering(&mut self, offering: &Offering) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET title = $2, description = $3, start_at = $4, end_at = $5, \
             status = $6, cost = $7, {} = $8, capacity_limit = $9, is_destroyed = $10, \
             updated_at = $11 WHERE id = $1",
            offering_table(offering.kind),
            capacity_column(offering.kind),
        );
        let result = sqlx::query(&sql)
            .bind(offering.id.to_string())
            .bind(&offering.title)
            .bind(&offering.description)
            .bind(offering.start_at)
            .bind(offering.end_at)
            .bind(offering.status.as_str())
            .bind(offering.cost)
            .bind(offering.capacity_count)
            .bind(offering.capacity_limit)
            .bind(offering.is_destroyed)
            .bind(offering.updated_at)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: offering.kind.label(),
                id: offering.id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_offerings(
        &mut self,
        kind: OfferingKind,
        query: &OfferingQuery,
    ) -> Result<Vec<Offering>> {
        let order = match query.sort {
            OfferingSort::Created => "created_at ASC, id ASC".to_string(),
            OfferingSort::Popular => format!("{} DESC, id ASC", capacity_column(kind)),
        };
        let sql = format!(
            "{} WHERE NOT is_destroyed AND ($1::text IS NULL OR status = $1) \
             ORDER BY {order} OFFSET $2 LIMIT $3",
            offering_select(kind),
        );
        let rows = sqlx::query(&sql)
            .bind(query.status.map(|status| status.as_str()))
            .bind(to_i64(query.skip))
            .bind(to_i64(query.limit))
            .fetch_all(&mut *self.tx)
            .await?;

        rows.iter().map(|row| offering_from_row(kind, row)).collect()
    }

    // =========================================================================
    // Payments
    // =========================================================================

    async fn get_payment(&mut self, id: PaymentId, lock: Lock) -> Result<Option<Payment>> {
        let sql = format!(
            "{PAYMENT_SELECT} WHERE id = $1 AND NOT is_destroyed{}",
            lock_clause(lock)
        );
        sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut *self.tx)
            .await?
            .as_ref()
            .map(payment_from_row)
            .transpose()
    }

    async fn find_open_payment(
        &mut self,
        user_id: UserId,
        target_type: OfferingKind,
        target_id: OfferingId,
        lock: Lock,
    ) -> Result<Option<Payment>> {
        let sql = format!(
            "{PAYMENT_SELECT} WHERE user_id = $1 AND target_type = $2 AND target_id = $3 \
             AND status <> 'CANCELLED' AND NOT is_destroyed ORDER BY id LIMIT 1{}",
            lock_clause(lock)
        );
        sqlx::query(&sql)
            .bind(*user_id.as_uuid())
            .bind(target_type.as_str())
            .bind(target_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await?
            .as_ref()
            .map(payment_from_row)
            .transpose()
    }

    async fn find_latest_payment(
        &mut self,
        user_id: UserId,
        target_type: OfferingKind,
        target_id: OfferingId,
        lock: Lock,
    ) -> Result<Option<Payment>> {
        let sql = format!(
            "{PAYMENT_SELECT} WHERE user_id = $1 AND target_type = $2 AND target_id = $3 \
             AND NOT is_destroyed ORDER BY created_at DESC, id DESC LIMIT 1{}",
            lock_clause(lock)
        );
        sqlx::query(&sql)
            .bind(*user_id.as_uuid())
            .bind(target_type.as_str())
            .bind(target_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await?
            .as_ref()
            .map(payment_from_row)
            .transpose()
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<()> {
        sqlx::query(
            "INSERT INTO payments (id, user_id, amount, method, status, target_type, \
             target_id, title, valid_from, valid_to, paid_at, cancelled_at, is_destroyed, \
             created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)",
        )
        .bind(payment.id.to_string())
        .bind(*payment.user_id.as_uuid())
        .bind(payment.amount)
        .bind(payment.method.map(|method| method.as_str()))
        .bind(payment.status.as_str())
        .bind(payment.target_type.as_str())
        .bind(payment.target_id.to_string())
        .bind(&payment.title)
        .bind(payment.valid_from)
        .bind(payment.valid_to)
        .bind(payment.paid_at)
        .bind(payment.cancelled_at)
        .bind(payment.is_destroyed)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<()> {
        let result = sqlx::query(
            "UPDATE payments SET method = $2, status = $3, valid_from = $4, valid_to = $5, \
             paid_at = $6, cancelled_at = $7, is_destroyed = $8, updated_at = $9 \
             WHERE id = $1",
        )
        .bind(payment.id.to_string())
        .bind(payment.method.map(|method| method.as_str()))
        .bind(payment.status.as_str())
        .bind(payment.valid_from)
        .bind(payment.valid_to)
        .bind(payment.paid_at)
        .bind(payment.cancelled_at)
        .bind(payment.is_destroyed)
        .bind(payment.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "payment",
                id: payment.id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_payments(&mut self, query: &PaymentQuery) -> Result<Vec<Payment>> {
        let order = match query.sort {
            PaymentSort::Created => "created_at ASC, id ASC",
            PaymentSort::Amount => "amount DESC, id ASC",
        };
        let sql = format!(
            "{PAYMENT_SELECT} WHERE NOT is_destroyed \
             AND ($1::uuid IS NULL OR user_id = $1) \
             AND ($2::text IS NULL OR status = $2) \
             AND ($3::date IS NULL OR (paid_at AT TIME ZONE 'UTC')::date >= $3) \
             AND ($4::date IS NULL OR (paid_at AT TIME ZONE 'UTC')::date <= $4) \
             ORDER BY {order} OFFSET $5 LIMIT $6"
        );
        let rows = sqlx::query(&sql)
            .bind(query.user_id.map(|user| *user.as_uuid()))
            .bind(query.status.map(|status| status.as_str()))
            .bind(query.paid_from)
            .bind(query.paid_to)
            .bind(to_i64(query.skip))
            .bind(to_i64(query.limit))
            .fetch_all(&mut *self.tx)
            .await?;

        rows.iter().map(payment_from_row).collect()
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
        let sql = format!(
            "{} WHERE id = $1 AND NOT is_destroyed{}",
            registration_select(kind),
            lock_clause(lock)
        );
        sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&mut *self.tx)
            .await?
            .map(|row| registration_from_row(kind, &row))
            .transpose()
    }

    async fn find_registration(
        &mut self,
        kind: OfferingKind,
        offering_id: OfferingId,
        payment_id: PaymentId,
        lock: Lock,
    ) -> Result<Option<Registration>> {
        let sql = format!(
            "{} WHERE {} = $1 AND payment_id = $2 AND NOT is_destroyed ORDER BY id LIMIT 1{}",
            registration_select(kind),
            registration_target_column(kind),
            lock_clause(lock)
        );
        sqlx::query(&sql)
            .bind(offering_id.to_string())
            .bind(payment_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await?
            .map(|row| registration_from_row(kind, &row))
            .transpose()
    }

    async fn find_registration_for(
        &mut self,
        kind: OfferingKind,
        user_id: UserId,
        offering_id: OfferingId,
        payment_id: PaymentId,
    ) -> Result<Option<Registration>> {
        let sql = format!(
            "{} WHERE user_id = $1 AND {} = $2 AND payment_id = $3 AND NOT is_destroyed \
             ORDER BY id LIMIT 1",
            registration_select(kind),
            registration_target_column(kind),
        );
        sqlx::query(&sql)
            .bind(*user_id.as_uuid())
            .bind(offering_id.to_string())
            .bind(payment_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await?
            .map(|row| registration_from_row(kind, &row))
            .transpose()
    }

    async fn insert_registration(&mut self, registration: &Registration) -> Result<()> {
        let sql = format!(
            "INSERT INTO {} (id, user_id, {}, payment_id, status, is_destroyed, \
             registered_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            registration_table(registration.kind),
            registration_target_column(registration.kind),
        );
        sqlx::query(&sql)
            .bind(registration.id.to_string())
            .bind(*registration.user_id.as_uuid())
            .bind(registration.offering_id.to_string())
            .bind(registration.payment_id.to_string())
            .bind(registration.status.as_str())
            .bind(registration.is_destroyed)
            .bind(registration.registered_at)
            .bind(registration.updated_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn update_registration(&mut self, registration: &Registration) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET status = $2, is_destroyed = $3, updated_at = $4 WHERE id = $1",
            registration_table(registration.kind),
        );
        let result = sqlx::query(&sql)
            .bind(registration.id.to_string())
            .bind(registration.status.as_str())
            .bind(registration.is_destroyed)
            .bind(registration.updated_at)
            .execute(&mut *self.tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: registration.kind.registration_label(),
                id: registration.id.to_string(),
            });
        }
        Ok(())
    }

    // =========================================================================
    // Completion
    // =========================================================================

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
