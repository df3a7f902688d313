//! Apply / cancel / complete integration tests.

mod common;

use axum::http::StatusCode;
use chrono::{Days, Utc};
use serde_json::{json, Value};

use common::{error_code, today, TestHarness};
use enroll_core::{
    NewOffering, NewPayment, Offering, OfferingKind, OfferingStatus, Payment, PaymentMethod,
    PaymentStatus, Registration, RegistrationStatus, UserId,
};
use enroll_store::Store;

// ============================================================================
// Apply
// ============================================================================

#[tokio::test]
async fn apply_with_full_amount_takes_a_seat() {
    let harness = TestHarness::new();
    let course_id = harness.open_course("Rust 101", 10_000).await;

    let response = harness
        .apply_as(harness.user_id, "courses", &course_id, 10_000)
        .await;

    response.assert_status(StatusCode::CREATED);
    let payment: Value = response.json();
    assert_eq!(payment["status"], "PAID");
    assert_eq!(payment["target_type"], "COURSE");
    assert_eq!(payment["target_id"], course_id.as_str());
    assert_eq!(payment["title"], "Rust 101");
    assert_eq!(payment["method"], "CARD");
    assert_eq!(payment["valid_from"], today().to_string());

    let course = harness.get_offering("courses", &course_id).await;
    assert_eq!(course["capacity_count"], 1);

    let snapshot = harness.snapshot();
    assert_eq!(snapshot.payments.len(), 1);
    assert_eq!(snapshot.registrations.len(), 1);
    let registration = &snapshot.registrations[0];
    assert_eq!(registration.status, RegistrationStatus::Pending);
    assert_eq!(registration.payment_id, snapshot.payments[0].id);
    assert_eq!(registration.user_id, harness.user_id);
}

#[tokio::test]
async fn apply_below_cost_is_rejected() {
    let harness = TestHarness::new();
    let course_id = harness.open_course("Rust 101", 10_000).await;

    let response = harness
        .apply_as(harness.user_id, "courses", &course_id, 9_999)
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(error_code(&body), "insufficient_amount");
    assert_eq!(body["error"]["details"]["cost"], 10_000);

    let course = harness.get_offering("courses", &course_id).await;
    assert_eq!(course["capacity_count"], 0);
}

#[tokio::test]
async fn second_apply_by_same_user_conflicts() {
    let harness = TestHarness::new();
    let course_id = harness.open_course("Rust 101", 10_000).await;

    harness
        .apply_as(harness.user_id, "courses", &course_id, 10_000)
        .await
        .assert_status(StatusCode::CREATED);

    let response = harness
        .apply_as(harness.user_id, "courses", &course_id, 10_000)
        .await;

    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(harness.snapshot().payments.len(), 1);
    let course = harness.get_offering("courses", &course_id).await;
    assert_eq!(course["capacity_count"], 1);
}

#[tokio::test]
async fn failed_applies_leave_store_untouched() {
    let harness = TestHarness::new();
    let course_id = harness.open_course("Rust 101", 10_000).await;
    let future = harness
        .create_offering(
            "courses",
            json!({
                "title": "Next term",
                "start_at": today() + Days::new(10),
                "end_at": today() + Days::new(40),
                "status": "AVAILABLE",
                "cost": 0
            }),
        )
        .await;
    let future_id = future["id"].as_str().unwrap().to_string();
    harness
        .apply_as(harness.user_id, "courses", &course_id, 10_000)
        .await
        .assert_status(StatusCode::CREATED);

    let before = harness.snapshot();

    let failures = [
        // amount below cost
        harness
            .apply_as(UserId::generate(), "courses", &course_id, 1)
            .await,
        // already applied
        harness
            .apply_as(harness.user_id, "courses", &course_id, 10_000)
            .await,
        // window not open yet
        harness
            .apply_as(harness.user_id, "courses", &future_id, 0)
            .await,
        // wrong kind
        harness
            .apply_as(harness.user_id, "tests", &course_id, 10_000)
            .await,
    ];
    let statuses: Vec<_> = failures.iter().map(|r| r.status_code()).collect();
    assert_eq!(
        statuses,
        [
            StatusCode::BAD_REQUEST,
            StatusCode::CONFLICT,
            StatusCode::BAD_REQUEST,
            StatusCode::NOT_FOUND
        ]
    );

    assert_eq!(harness.snapshot(), before);
}

#[tokio::test]
async fn apply_to_full_offering_conflicts() {
    let harness = TestHarness::new();
    let mut body = common::open_offering("Tiny seminar", 0);
    body["capacity_limit"] = json!(1);
    let course = harness.create_offering("courses", body).await;
    let course_id = course["id"].as_str().unwrap();

    harness
        .apply_as(UserId::generate(), "courses", course_id, 0)
        .await
        .assert_status(StatusCode::CREATED);

    let response = harness
        .apply_as(UserId::generate(), "courses", course_id, 0)
        .await;
    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["error"]["message"], "course is full");
}

#[tokio::test]
async fn apply_on_last_day_extends_validity() {
    let harness = TestHarness::new();
    let test = harness
        .create_offering(
            "tests",
            json!({
                "title": "Final exam",
                "start_at": today() - Days::new(7),
                "end_at": today(),
                "status": "AVAILABLE",
                "cost": 500
            }),
        )
        .await;
    let test_id = test["id"].as_str().unwrap();

    let response = harness.apply_as(harness.user_id, "tests", test_id, 500).await;

    response.assert_status(StatusCode::CREATED);
    let payment: Value = response.json();
    assert_eq!(payment["target_type"], "TEST");
    assert_eq!(payment["valid_from"], today().to_string());
    assert_eq!(payment["valid_to"], (today() + Days::new(1)).to_string());
}

#[tokio::test]
async fn apply_requires_authentication() {
    let harness = TestHarness::new();
    let course_id = harness.open_course("Rust 101", 0).await;

    let response = harness
        .server
        .post(&format!("/v1/courses/{course_id}/apply"))
        .json(&json!({ "amount": 0 }))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);

    let response = harness
        .server
        .post(&format!("/v1/courses/{course_id}/apply"))
        .add_header("authorization", "Bearer not-a-token")
        .json(&json!({ "amount": 0 }))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

// ============================================================================
// Cancel
// ============================================================================

#[tokio::test]
async fn cancel_releases_the_seat() {
    let harness = TestHarness::new();
    let course_id = harness.open_course("Rust 101", 10_000).await;
    harness
        .apply_as(harness.user_id, "courses", &course_id, 10_000)
        .await
        .assert_status(StatusCode::CREATED);

    let response = harness
        .action_as(harness.user_id, "courses", &course_id, "cancel")
        .await;

    response.assert_status_ok();
    let payment: Value = response.json();
    assert_eq!(payment["status"], "CANCELLED");
    assert!(payment["cancelled_at"].is_string());

    let course = harness.get_offering("courses", &course_id).await;
    assert_eq!(course["capacity_count"], 0);

    let snapshot = harness.snapshot();
    assert!(snapshot.registrations[0].is_destroyed);
    assert_eq!(snapshot.payments[0].status, PaymentStatus::Cancelled);
}

#[tokio::test]
async fn cancel_without_payment_is_not_found() {
    let harness = TestHarness::new();
    let course_id = harness.open_course("Rust 101", 0).await;

    let response = harness
        .action_as(harness.user_id, "courses", &course_id, "cancel")
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_after_window_closed_is_rejected() {
    let harness = TestHarness::new();
    let mut offering = Offering::new(
        OfferingKind::Course,
        NewOffering {
            title: "Last term".into(),
            description: None,
            start_at: today() - Days::new(60),
            end_at: today() - Days::new(30),
            status: OfferingStatus::Available,
            cost: 100,
            capacity_limit: None,
        },
        harness.owner_id,
    )
    .unwrap();
    offering.capacity_count = 1;
    let payment = Payment::new(
        NewPayment {
            amount: 100,
            method: Some(PaymentMethod::Card),
            status: PaymentStatus::Paid,
            target_type: OfferingKind::Course,
            target_id: offering.id,
            title: offering.title.clone(),
            paid_at: Some(Utc::now()),
            valid_from: offering.start_at,
            valid_to: offering.end_at,
        },
        harness.user_id,
    )
    .unwrap();
    let registration =
        Registration::new(OfferingKind::Course, harness.user_id, offering.id, payment.id);

    let mut tx = harness.store.begin().await.unwrap();
    tx.insert_offering(&offering).await.unwrap();
    tx.insert_payment(&payment).await.unwrap();
    tx.insert_registration(&registration).await.unwrap();
    tx.commit().await.unwrap();
    let before = harness.snapshot();

    let response = harness
        .action_as(harness.user_id, "courses", &offering.id.to_string(), "cancel")
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(error_code(&body), "invalid_state");
    assert_eq!(harness.snapshot(), before);
}

#[tokio::test]
async fn user_can_reapply_after_cancel() {
    let harness = TestHarness::new();
    let course_id = harness.open_course("Rust 101", 0).await;

    harness
        .apply_as(harness.user_id, "courses", &course_id, 0)
        .await
        .assert_status(StatusCode::CREATED);
    harness
        .action_as(harness.user_id, "courses", &course_id, "cancel")
        .await
        .assert_status_ok();
    harness
        .apply_as(harness.user_id, "courses", &course_id, 0)
        .await
        .assert_status(StatusCode::CREATED);

    let course = harness.get_offering("courses", &course_id).await;
    assert_eq!(course["capacity_count"], 1);
    assert_eq!(harness.snapshot().payments.len(), 2);
}

// ============================================================================
// Complete
// ============================================================================

#[tokio::test]
async fn complete_marks_registration_completed() {
    let harness = TestHarness::new();
    let course_id = harness.open_course("Rust 101", 10_000).await;
    harness
        .apply_as(harness.user_id, "courses", &course_id, 10_000)
        .await
        .assert_status(StatusCode::CREATED);

    let response = harness
        .action_as(harness.user_id, "courses", &course_id, "complete")
        .await;

    response.assert_status_ok();
    let course: Value = response.json();
    assert_eq!(course["id"], course_id.as_str());
    assert_eq!(course["capacity_count"], 1);

    let snapshot = harness.snapshot();
    assert_eq!(snapshot.registrations[0].status, RegistrationStatus::Completed);
}

#[tokio::test]
async fn completed_registration_cannot_be_cancelled() {
    let harness = TestHarness::new();
    let course_id = harness.open_course("Rust 101", 10_000).await;
    harness
        .apply_as(harness.user_id, "courses", &course_id, 10_000)
        .await
        .assert_status(StatusCode::CREATED);
    harness
        .action_as(harness.user_id, "courses", &course_id, "complete")
        .await
        .assert_status_ok();

    let after_complete = harness.snapshot();

    let response = harness
        .action_as(harness.user_id, "courses", &course_id, "cancel")
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(error_code(&body), "invalid_state");
    assert_eq!(
        body["error"]["message"],
        "cannot cancel a completed course registration"
    );
    assert_eq!(harness.snapshot(), after_complete);
}

#[tokio::test]
async fn complete_without_payment_is_not_found() {
    let harness = TestHarness::new();
    let course_id = harness.open_course("Rust 101", 0).await;

    let response = harness
        .action_as(harness.user_id, "courses", &course_id, "complete")
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn complete_after_cancel_conflicts() {
    let harness = TestHarness::new();
    let course_id = harness.open_course("Rust 101", 10_000).await;
    harness
        .apply_as(harness.user_id, "courses", &course_id, 10_000)
        .await
        .assert_status(StatusCode::CREATED);
    harness
        .action_as(harness.user_id, "courses", &course_id, "cancel")
        .await
        .assert_status_ok();
    let after_cancel = harness.snapshot();

    let response = harness
        .action_as(harness.user_id, "courses", &course_id, "complete")
        .await;

    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(error_code(&body), "conflict");
    assert_eq!(
        body["error"]["message"],
        "cannot complete a course that is not paid"
    );
    assert_eq!(harness.snapshot(), after_cancel);
}

// ============================================================================
// Contention
// ============================================================================

#[tokio::test]
async fn lock_timeout_surfaces_as_retryable() {
    use enroll_core::OfferingId;
    use enroll_store::Lock;

    let harness = TestHarness::with_lock_timeout(std::time::Duration::from_millis(50));
    let course_id = harness.open_course("Rust 101", 0).await;

    let mut holder = harness.store.begin().await.unwrap();
    holder
        .get_offering(
            OfferingKind::Course,
            course_id.parse::<OfferingId>().unwrap(),
            Lock::ForUpdate,
        )
        .await
        .unwrap();

    let response = harness
        .apply_as(harness.user_id, "courses", &course_id, 0)
        .await;

    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(error_code(&body), "busy");
    assert_eq!(body["error"]["details"]["retryable"], true);

    holder.rollback().await.unwrap();
    harness
        .apply_as(harness.user_id, "courses", &course_id, 0)
        .await
        .assert_status(StatusCode::CREATED);
}
