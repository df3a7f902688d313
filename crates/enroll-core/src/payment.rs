//! Payment types.
//!
//! A payment records money paid by one user against one offering. At most one
//! non-cancelled, non-destroyed payment may exist per
//! `(user_id, target_type, target_id)`; that is what prevents double enrollment.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EnrollError, Result};
use crate::ids::{OfferingId, PaymentId, UserId};
use crate::offering::{OfferingKind, DEFAULT_PAGE_LIMIT};

/// Lifecycle of a payment.
///
/// `PENDING -> PAID -> CANCELLED`. Only a `PAID` payment can be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Created but not yet paid.
    Pending,
    /// Paid; the bound registration is active.
    Paid,
    /// Cancelled; the bound registration is soft-deleted.
    Cancelled,
}

impl PaymentStatus {
    /// Upper-case wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Paid => "PAID",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = EnrollError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PAID" => Ok(Self::Paid),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(EnrollError::InvalidState(format!(
                "unknown payment status: {other}"
            ))),
        }
    }
}

/// Payment channel. Recorded only; no gateway is contacted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Kakao Pay.
    Kakaopay,
    /// Toss.
    Toss,
    /// Bank transfer.
    Bank,
    /// Card.
    Card,
}

impl PaymentMethod {
    /// Upper-case wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Kakaopay => "KAKAOPAY",
            Self::Toss => "TOSS",
            Self::Bank => "BANK",
            Self::Card => "CARD",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = EnrollError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "KAKAOPAY" => Ok(Self::Kakaopay),
            "TOSS" => Ok(Self::Toss),
            "BANK" => Ok(Self::Bank),
            "CARD" => Ok(Self::Card),
            other => Err(EnrollError::InvalidState(format!(
                "unknown payment method: {other}"
            ))),
        }
    }
}

/// A monetary transaction against one offering for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Identifier.
    pub id: PaymentId,

    /// The paying user.
    pub user_id: UserId,

    /// Amount in minor currency units.
    pub amount: i64,

    /// Payment channel, if known.
    pub method: Option<PaymentMethod>,

    /// Lifecycle status.
    pub status: PaymentStatus,

    /// Kind of offering paid for.
    pub target_type: OfferingKind,

    /// The offering paid for.
    pub target_id: OfferingId,

    /// Offering title at the time of payment.
    pub title: String,

    /// First day the payment is valid.
    pub valid_from: NaiveDate,

    /// Day the payment stops being valid. Always after `valid_from`.
    pub valid_to: NaiveDate,

    /// When the payment was paid.
    pub paid_at: Option<DateTime<Utc>>,

    /// When the payment was cancelled.
    pub cancelled_at: Option<DateTime<Utc>>,

    /// Soft-delete flag.
    pub is_destroyed: bool,

    /// When the payment was created.
    pub created_at: DateTime<Utc>,

    /// When the payment was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Build a payment for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if `valid_from >= valid_to`.
    pub fn new(input: NewPayment, user_id: UserId) -> Result<Self> {
        validate_validity(input.valid_from, input.valid_to)?;

        let now = Utc::now();
        Ok(Self {
            id: PaymentId::generate(),
            user_id,
            amount: input.amount,
            method: input.method,
            status: input.status,
            target_type: input.target_type,
            target_id: input.target_id,
            title: input.title,
            valid_from: input.valid_from,
            valid_to: input.valid_to,
            paid_at: input.paid_at,
            cancelled_at: None,
            is_destroyed: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// Whether this payment counts against the one-open-payment rule.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.status != PaymentStatus::Cancelled && !self.is_destroyed
    }

    /// Transition `PAID -> CANCELLED`, stamping `cancelled_at` and `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the payment is already cancelled or was
    /// never paid. The payment is unchanged on error.
    pub fn cancel(&mut self) -> Result<()> {
        match self.status {
            PaymentStatus::Paid => {
                let now = Utc::now();
                self.status = PaymentStatus::Cancelled;
                self.cancelled_at = Some(now);
                self.updated_at = now;
                Ok(())
            }
            PaymentStatus::Cancelled => Err(EnrollError::InvalidState(
                "payment already cancelled".into(),
            )),
            PaymentStatus::Pending => Err(EnrollError::InvalidState("payment not paid".into())),
        }
    }

    /// Merge a partial update and re-validate the validity range.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the merged range is inverted; the payment is
    /// unchanged on error.
    pub fn apply_patch(&mut self, patch: &PaymentPatch) -> Result<()> {
        let valid_from = patch.valid_from.unwrap_or(self.valid_from);
        let valid_to = patch.valid_to.unwrap_or(self.valid_to);
        validate_validity(valid_from, valid_to)?;

        if let Some(method) = patch.method {
            self.method = Some(method);
        }
        self.valid_from = valid_from;
        self.valid_to = valid_to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Input for creating a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayment {
    /// Amount in minor currency units.
    pub amount: i64,
    /// Payment channel.
    pub method: Option<PaymentMethod>,
    /// Initial status.
    pub status: PaymentStatus,
    /// Kind of offering.
    pub target_type: OfferingKind,
    /// Offering being paid for.
    pub target_id: OfferingId,
    /// Offering title.
    pub title: String,
    /// When it was paid, if it already is.
    pub paid_at: Option<DateTime<Utc>>,
    /// First valid day.
    pub valid_from: NaiveDate,
    /// End of validity.
    pub valid_to: NaiveDate,
}

/// Partial update of a payment by its owner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentPatch {
    /// New payment channel.
    #[serde(default)]
    pub method: Option<PaymentMethod>,
    /// New first valid day.
    #[serde(default)]
    pub valid_from: Option<NaiveDate>,
    /// New end of validity.
    #[serde(default)]
    pub valid_to: Option<NaiveDate>,
}

/// Payment listing sort order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentSort {
    /// Creation time, oldest first.
    #[default]
    Created,
    /// Amount, largest first.
    Amount,
}

/// Filter, sort and pagination for payment listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentQuery {
    /// Only this user's payments, if set.
    pub user_id: Option<UserId>,
    /// Only payments with this status, if set.
    pub status: Option<PaymentStatus>,
    /// Paid on or after this day.
    pub paid_from: Option<NaiveDate>,
    /// Paid on or before this day.
    pub paid_to: Option<NaiveDate>,
    /// Sort order.
    pub sort: PaymentSort,
    /// Rows to skip.
    pub skip: usize,
    /// Maximum rows to return.
    pub limit: usize,
}

impl Default for PaymentQuery {
    fn default() -> Self {
        Self {
            user_id: None,
            status: None,
            paid_from: None,
            paid_to: None,
            sort: PaymentSort::Created,
            skip: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

impl PaymentQuery {
    /// Whether `payment` passes this query's filters (not pagination).
    #[must_use]
    pub fn matches(&self, payment: &Payment) -> bool {
        if payment.is_destroyed {
            return false;
        }
        if self.user_id.is_some_and(|user| user != payment.user_id) {
            return false;
        }
        if self.status.is_some_and(|status| status != payment.status) {
            return false;
        }
        if self.paid_from.is_some() || self.paid_to.is_some() {
            let Some(paid_on) = payment.paid_at.map(|at| at.date_naive()) else {
                return false;
            };
            if self.paid_from.is_some_and(|from| paid_on < from) {
                return false;
            }
            if self.paid_to.is_some_and(|to| paid_on > to) {
                return false;
            }
        }
        true
    }
}

fn validate_validity(from: NaiveDate, to: NaiveDate) -> Result<()> {
    if from >= to {
        return Err(EnrollError::InvalidState(format!(
            "invalid valid_from/valid_to range: {from} >= {to}"
        )));
    }
    Ok(())
}
