//! Offering types: courses and tests.
//!
//! Courses and tests share one shape. The [`OfferingKind`] tag carries what
//! differs between them (naming and, in the store, which tables and capacity
//! column to use), so the apply/cancel/complete logic is written once.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EnrollError, Result};
use crate::ids::{OfferingId, UserId};

/// Default page size for listings.
pub const DEFAULT_PAGE_LIMIT: usize = 100;

/// The closed set of things a user can pay to enroll in.
///
/// This is also the payment `targetType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfferingKind {
    /// A course; its capacity counter is the student count.
    Course,
    /// A test; its capacity counter is the examinee count.
    Test,
}

impl OfferingKind {
    /// All kinds, in a stable order.
    pub const ALL: [Self; 2] = [Self::Course, Self::Test];

    /// Upper-case wire name (`COURSE`, `TEST`).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Course => "COURSE",
            Self::Test => "TEST",
        }
    }

    /// Lower-case entity name for messages and logs.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Course => "course",
            Self::Test => "test",
        }
    }

    /// Plural path segment (`courses`, `tests`).
    #[must_use]
    pub const fn plural(self) -> &'static str {
        match self {
            Self::Course => "courses",
            Self::Test => "tests",
        }
    }

    /// Entity name for the registration bound to this kind.
    #[must_use]
    pub const fn registration_label(self) -> &'static str {
        match self {
            Self::Course => "course registration",
            Self::Test => "test registration",
        }
    }
}

impl fmt::Display for OfferingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OfferingKind {
    type Err = EnrollError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "COURSE" | "course" | "courses" => Ok(Self::Course),
            "TEST" | "test" | "tests" => Ok(Self::Test),
            other => Err(EnrollError::InvalidState(format!(
                "unknown offering kind: {other}"
            ))),
        }
    }
}

/// Whether an offering is listed as open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OfferingStatus {
    /// Listed.
    Available,
    /// Not listed.
    Unavailable,
}

impl OfferingStatus {
    /// Upper-case wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Unavailable => "UNAVAILABLE",
        }
    }
}

impl FromStr for OfferingStatus {
    type Err = EnrollError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "AVAILABLE" => Ok(Self::Available),
            "UNAVAILABLE" => Ok(Self::Unavailable),
            other => Err(EnrollError::InvalidState(format!(
                "unknown offering status: {other}"
            ))),
        }
    }
}

/// A capacity-bearing, date-windowed, paid enrollment target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offering {
    /// Identifier.
    pub id: OfferingId,

    /// Course or test.
    pub kind: OfferingKind,

    /// Title, unique among non-destroyed offerings of the same kind.
    pub title: String,

    /// Free-text description.
    pub description: Option<String>,

    /// First day of the availability window (inclusive).
    pub start_at: NaiveDate,

    /// Last day of the availability window (inclusive).
    pub end_at: NaiveDate,

    /// Listing status.
    pub status: OfferingStatus,

    /// Cost in minor currency units.
    pub cost: i64,

    /// Number of active enrollments. Never negative.
    pub capacity_count: i64,

    /// Maximum number of active enrollments, if bounded.
    pub capacity_limit: Option<i64>,

    /// The user who created the offering.
    pub owner_id: UserId,

    /// Soft-delete flag.
    pub is_destroyed: bool,

    /// When the offering was created.
    pub created_at: DateTime<Utc>,

    /// When the offering was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Offering {
    /// Build a new offering owned by `owner_id`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the window is empty or inverted, or the cost
    /// or capacity limit is negative.
    pub fn new(kind: OfferingKind, input: NewOffering, owner_id: UserId) -> Result<Self> {
        validate_window(input.start_at, input.end_at)?;
        validate_non_negative("cost", input.cost)?;
        if let Some(limit) = input.capacity_limit {
            validate_non_negative("capacity_limit", limit)?;
        }

        let now = Utc::now();
        Ok(Self {
            id: OfferingId::generate(),
            kind,
            title: input.title,
            description: input.description,
            start_at: input.start_at,
            end_at: input.end_at,
            status: input.status,
            cost: input.cost,
            capacity_count: 0,
            capacity_limit: input.capacity_limit,
            owner_id,
            is_destroyed: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// Whether `today` falls inside `[start_at, end_at]`.
    #[must_use]
    pub fn is_open_on(&self, today: NaiveDate) -> bool {
        self.start_at <= today && today <= self.end_at
    }

    /// Whether the capacity limit, if any, has been reached.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.capacity_limit
            .is_some_and(|limit| self.capacity_count >= limit)
    }

    /// Merge a partial update into this offering and re-validate it.
    ///
    /// Stamps `updated_at`. On error the offering is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the merged window is inverted or a counter
    /// would go negative.
    pub fn apply_patch(&mut self, patch: &OfferingPatch) -> Result<()> {
        let start_at = patch.start_at.unwrap_or(self.start_at);
        let end_at = patch.end_at.unwrap_or(self.end_at);
        validate_window(start_at, end_at)?;

        if let Some(cost) = patch.cost {
            validate_non_negative("cost", cost)?;
        }
        if let Some(count) = patch.capacity_count {
            validate_non_negative("capacity_count", count)?;
        }
        if let Some(limit) = patch.capacity_limit {
            validate_non_negative("capacity_limit", limit)?;
        }

        if let Some(title) = &patch.title {
            self.title.clone_from(title);
        }
        if let Some(description) = &patch.description {
            self.description = Some(description.clone());
        }
        self.start_at = start_at;
        self.end_at = end_at;
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(cost) = patch.cost {
            self.cost = cost;
        }
        if let Some(count) = patch.capacity_count {
            self.capacity_count = count;
        }
        if let Some(limit) = patch.capacity_limit {
            self.capacity_limit = Some(limit);
        }
        if let Some(destroyed) = patch.is_destroyed {
            self.is_destroyed = destroyed;
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Input for creating an offering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOffering {
    /// Title.
    pub title: String,
    /// Free-text description.
    #[serde(default)]
    pub description: Option<String>,
    /// First day of the window.
    pub start_at: NaiveDate,
    /// Last day of the window.
    pub end_at: NaiveDate,
    /// Listing status.
    pub status: OfferingStatus,
    /// Cost in minor currency units.
    pub cost: i64,
    /// Optional maximum number of enrollments.
    #[serde(default)]
    pub capacity_limit: Option<i64>,
}

/// Partial update of an offering. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferingPatch {
    /// New title.
    #[serde(default)]
    pub title: Option<String>,
    /// New description.
    #[serde(default)]
    pub description: Option<String>,
    /// New window start.
    #[serde(default)]
    pub start_at: Option<NaiveDate>,
    /// New window end.
    #[serde(default)]
    pub end_at: Option<NaiveDate>,
    /// New status.
    #[serde(default)]
    pub status: Option<OfferingStatus>,
    /// New cost.
    #[serde(default)]
    pub cost: Option<i64>,
    /// New capacity counter; only the enrollment flows set this.
    #[serde(skip)]
    pub capacity_count: Option<i64>,
    /// New capacity limit.
    #[serde(default)]
    pub capacity_limit: Option<i64>,
    /// Soft-delete flag.
    #[serde(skip)]
    pub is_destroyed: Option<bool>,
}

impl OfferingPatch {
    /// A patch that only sets the capacity counter.
    #[must_use]
    pub fn capacity(count: i64) -> Self {
        Self {
            capacity_count: Some(count),
            ..Self::default()
        }
    }
}

/// Listing sort order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferingSort {
    /// Creation time, oldest first.
    #[default]
    Created,
    /// Capacity count, highest first.
    Popular,
}

/// Filter, sort and pagination for offering listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferingQuery {
    /// Only offerings with this status, if set.
    pub status: Option<OfferingStatus>,
    /// Sort order.
    pub sort: OfferingSort,
    /// Rows to skip.
    pub skip: usize,
    /// Maximum rows to return.
    pub limit: usize,
}

impl Default for OfferingQuery {
    fn default() -> Self {
        Self {
            status: Some(OfferingStatus::Available),
            sort: OfferingSort::Created,
            skip: 0,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

/// Check that a date window is non-empty (`start < end`).
///
/// # Errors
///
/// Returns `InvalidState` when `start >= end`.
pub fn validate_window(start: NaiveDate, end: NaiveDate) -> Result<()> {
    if start >= end {
        return Err(EnrollError::InvalidState(format!(
            "start_at ({start}) must be before end_at ({end})"
        )));
    }
    Ok(())
}

fn validate_non_negative(field: &str, value: i64) -> Result<()> {
    if value < 0 {
        return Err(EnrollError::InvalidState(format!(
            "{field} must not be negative"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample() -> NewOffering {
        NewOffering {
            title: "Rust 101".into(),
            description: None,
            start_at: date(2026, 1, 1),
            end_at: date(2026, 12, 31),
            status: OfferingStatus::Available,
            cost: 10_000,
            capacity_limit: None,
        }
    }

    #[test]
    fn new_offering_starts_empty() {
        let offering = Offering::new(OfferingKind::Course, sample(), UserId::generate()).unwrap();
        assert_eq!(offering.capacity_count, 0);
        assert!(!offering.is_destroyed);
        assert!(!offering.is_full());
    }

    #[test]
    fn rejects_inverted_window() {
        let mut input = sample();
        input.end_at = input.start_at;
        let err = Offering::new(OfferingKind::Test, input, UserId::generate()).unwrap_err();
        assert!(matches!(err, EnrollError::InvalidState(_)));
    }

    #[test]
    fn window_is_inclusive() {
        let offering = Offering::new(OfferingKind::Course, sample(), UserId::generate()).unwrap();
        assert!(offering.is_open_on(date(2026, 1, 1)));
        assert!(offering.is_open_on(date(2026, 12, 31)));
        assert!(!offering.is_open_on(date(2027, 1, 1)));
    }

    #[test]
    fn patch_revalidates_merged_window() {
        let mut offering =
            Offering::new(OfferingKind::Course, sample(), UserId::generate()).unwrap();
        let before = offering.clone();
        let patch = OfferingPatch {
            start_at: Some(date(2027, 6, 1)),
            ..OfferingPatch::default()
        };
        assert!(offering.apply_patch(&patch).is_err());
        assert_eq!(offering, before);
    }

    #[test]
    fn patch_rejects_negative_capacity() {
        let mut offering =
            Offering::new(OfferingKind::Course, sample(), UserId::generate()).unwrap();
        assert!(offering.apply_patch(&OfferingPatch::capacity(-1)).is_err());
        offering.apply_patch(&OfferingPatch::capacity(3)).unwrap();
        assert_eq!(offering.capacity_count, 3);
    }

    #[test]
    fn full_when_limit_reached() {
        let mut input = sample();
        input.capacity_limit = Some(1);
        let mut offering = Offering::new(OfferingKind::Test, input, UserId::generate()).unwrap();
        assert!(!offering.is_full());
        offering.capacity_count = 1;
        assert!(offering.is_full());
    }

    #[test]
    fn kind_parses_path_segments() {
        assert_eq!("courses".parse::<OfferingKind>().unwrap(), OfferingKind::Course);
        assert_eq!("TEST".parse::<OfferingKind>().unwrap(), OfferingKind::Test);
        assert!("quizzes".parse::<OfferingKind>().is_err());
    }
}
