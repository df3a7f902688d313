//! Table, column and constraint names.
//!
//! Courses and tests live in separate tables with differently named capacity
//! columns; these helpers map an [`OfferingKind`] onto the right names so the
//! rest of the crate can treat both kinds uniformly.

use enroll_core::OfferingKind;

/// Table names.
pub mod table {
    /// Courses.
    pub const COURSES: &str = "courses";

    /// Tests.
    pub const TESTS: &str = "tests";

    /// Payments for either kind, discriminated by `target_type`.
    pub const PAYMENTS: &str = "payments";

    /// Course registrations.
    pub const COURSE_REGISTRATIONS: &str = "course_registrations";

    /// Test registrations.
    pub const TEST_REGISTRATIONS: &str = "test_registrations";
}

/// Constraint names shared by both backends.
pub mod constraint {
    /// `start_at < end_at` on offerings.
    pub const OFFERING_WINDOW: &str = "offering_window_check";

    /// Capacity counter `>= 0` on offerings.
    pub const CAPACITY_NON_NEGATIVE: &str = "offering_capacity_check";

    /// `valid_from < valid_to` on payments.
    pub const PAYMENT_VALIDITY: &str = "payment_validity_check";

    /// Unique course title among non-destroyed courses.
    pub const COURSES_TITLE: &str = "courses_title_key";

    /// Unique test title among non-destroyed tests.
    pub const TESTS_TITLE: &str = "tests_title_key";

    /// One open payment per `(user_id, target_type, target_id)`.
    pub const PAYMENTS_OPEN_TARGET: &str = "payments_open_target_key";

    /// Human-readable description of a constraint violation.
    #[must_use]
    pub fn describe(name: &str) -> &'static str {
        match name {
            OFFERING_WINDOW => "start_at must be before end_at",
            CAPACITY_NON_NEGATIVE => "capacity count must not be negative",
            PAYMENT_VALIDITY => "valid_from must be before valid_to",
            COURSES_TITLE => "course already registered",
            TESTS_TITLE => "test already registered",
            PAYMENTS_OPEN_TARGET => "payment already exists for this offering",
            _ => "constraint violated",
        }
    }
}

/// Table holding offerings of `kind`.
#[must_use]
pub const fn offering_table(kind: OfferingKind) -> &'static str {
    match kind {
        OfferingKind::Course => table::COURSES,
        OfferingKind::Test => table::TESTS,
    }
}

/// Column holding the capacity counter for `kind`.
#[must_use]
pub const fn capacity_column(kind: OfferingKind) -> &'static str {
    match kind {
        OfferingKind::Course => "student_count",
        OfferingKind::Test => "examinee_count",
    }
}

/// Unique-title constraint for `kind`.
#[must_use]
pub const fn title_constraint(kind: OfferingKind) -> &'static str {
    match kind {
        OfferingKind::Course => constraint::COURSES_TITLE,
        OfferingKind::Test => constraint::TESTS_TITLE,
    }
}

/// Table holding registrations for `kind`.
#[must_use]
pub const fn registration_table(kind: OfferingKind) -> &'static str {
    match kind {
        OfferingKind::Course => table::COURSE_REGISTRATIONS,
        OfferingKind::Test => table::TEST_REGISTRATIONS,
    }
}

/// Column in the registration table referencing the offering.
#[must_use]
pub const fn registration_target_column(kind: OfferingKind) -> &'static str {
    match kind {
        OfferingKind::Course => "course_id",
        OfferingKind::Test => "test_id",
    }
}
