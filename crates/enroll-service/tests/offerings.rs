//! Offering CRUD integration tests.

mod common;

use axum::http::StatusCode;
use chrono::Days;
use serde_json::{json, Value};

use common::{error_code, open_offering, today, TestHarness};

#[tokio::test]
async fn create_returns_offering_owned_by_caller() {
    let harness = TestHarness::new();

    let course = harness
        .create_offering("courses", open_offering("Rust 101", 10_000))
        .await;

    assert_eq!(course["title"], "Rust 101");
    assert_eq!(course["kind"], "COURSE");
    assert_eq!(course["status"], "AVAILABLE");
    assert_eq!(course["capacity_count"], 0);
    assert_eq!(course["owner_id"], harness.owner_id.to_string());
    assert!(course["id"].is_string());
}

#[tokio::test]
async fn create_requires_authentication() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/courses")
        .json(&open_offering("Rust 101", 0))
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = response.json();
    assert_eq!(error_code(&body), "unauthorized");
}

#[tokio::test]
async fn create_with_inverted_window_is_rejected() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/tests")
        .add_header("authorization", harness.owner_auth_header())
        .json(&json!({
            "title": "Backwards",
            "start_at": today(),
            "end_at": today() - Days::new(1),
            "status": "AVAILABLE",
            "cost": 0
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(error_code(&body), "invalid_state");
}

#[tokio::test]
async fn duplicate_title_conflicts_within_kind_only() {
    let harness = TestHarness::new();
    harness
        .create_offering("courses", open_offering("Algorithms", 0))
        .await;

    let response = harness
        .server
        .post("/v1/courses")
        .add_header("authorization", harness.owner_auth_header())
        .json(&open_offering("Algorithms", 0))
        .await;
    response.assert_status(StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["error"]["message"], "course already registered");

    // Same title as a test is fine.
    harness
        .create_offering("tests", open_offering("Algorithms", 0))
        .await;
}

#[tokio::test]
async fn get_and_list_are_public() {
    let harness = TestHarness::new();
    let course_id = harness.open_course("Rust 101", 0).await;

    let course = harness.get_offering("courses", &course_id).await;
    assert_eq!(course["id"], course_id.as_str());

    let response = harness.server.get("/v1/courses").await;
    response.assert_status_ok();
    let list: Vec<Value> = response.json();
    assert_eq!(list.len(), 1);
}

#[tokio::test]
async fn get_with_malformed_id_is_bad_request() {
    let harness = TestHarness::new();

    let response = harness.server.get("/v1/courses/not-an-id").await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_under_wrong_kind_is_not_found() {
    let harness = TestHarness::new();
    let course_id = harness.open_course("Rust 101", 0).await;

    let response = harness.server.get(&format!("/v1/tests/{course_id}")).await;

    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn list_filters_by_status() {
    let harness = TestHarness::new();
    harness.open_course("Open course", 0).await;
    let mut hidden = open_offering("Hidden course", 0);
    hidden["status"] = json!("UNAVAILABLE");
    harness.create_offering("courses", hidden).await;

    let available: Vec<Value> = harness.server.get("/v1/courses").await.json();
    let titles: Vec<_> = available.iter().map(|c| c["title"].clone()).collect();
    assert_eq!(titles, [json!("Open course")]);

    let unavailable: Vec<Value> = harness
        .server
        .get("/v1/courses")
        .add_query_param("status", "UNAVAILABLE")
        .await
        .json();
    let titles: Vec<_> = unavailable.iter().map(|c| c["title"].clone()).collect();
    assert_eq!(titles, [json!("Hidden course")]);
}

#[tokio::test]
async fn list_sorted_by_popularity() {
    let harness = TestHarness::new();
    let quiet = harness.open_course("Quiet", 0).await;
    let busy = harness.open_course("Busy", 0).await;

    harness
        .apply_as(harness.user_id, "courses", &busy, 0)
        .await
        .assert_status(StatusCode::CREATED);
    harness
        .apply_as(harness.owner_id, "courses", &busy, 0)
        .await
        .assert_status(StatusCode::CREATED);
    harness
        .apply_as(harness.user_id, "courses", &quiet, 0)
        .await
        .assert_status(StatusCode::CREATED);

    let by_created: Vec<Value> = harness.server.get("/v1/courses").await.json();
    assert_eq!(by_created[0]["title"], "Quiet");

    let by_popularity: Vec<Value> = harness
        .server
        .get("/v1/courses")
        .add_query_param("sort", "popular")
        .await
        .json();
    assert_eq!(by_popularity[0]["title"], "Busy");
    assert_eq!(by_popularity[0]["capacity_count"], 2);
    assert_eq!(by_popularity[1]["capacity_count"], 1);
}

#[tokio::test]
async fn list_paginates() {
    let harness = TestHarness::new();
    for title in ["One", "Two", "Three"] {
        harness.open_course(title, 0).await;
    }

    let page: Vec<Value> = harness
        .server
        .get("/v1/courses")
        .add_query_param("skip", "1")
        .add_query_param("limit", "1")
        .await
        .json();

    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["title"], "Two");
}

#[tokio::test]
async fn owner_can_update() {
    let harness = TestHarness::new();
    let course_id = harness.open_course("Rust 101", 0).await;

    let response = harness
        .server
        .patch(&format!("/v1/courses/{course_id}"))
        .add_header("authorization", harness.owner_auth_header())
        .json(&json!({ "title": "Rust 102", "cost": 2_500 }))
        .await;

    response.assert_status_ok();
    let course: Value = response.json();
    assert_eq!(course["title"], "Rust 102");
    assert_eq!(course["cost"], 2_500);
}

#[tokio::test]
async fn non_owner_cannot_update_or_delete() {
    let harness = TestHarness::new();
    let course_id = harness.open_course("Rust 101", 0).await;

    let response = harness
        .server
        .patch(&format!("/v1/courses/{course_id}"))
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "cost": 1 }))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);

    let response = harness
        .server
        .delete(&format!("/v1/courses/{course_id}"))
        .add_header("authorization", harness.user_auth_header())
        .await;
    response.assert_status(StatusCode::FORBIDDEN);

    let course = harness.get_offering("courses", &course_id).await;
    assert_eq!(course["cost"], 0);
}

#[tokio::test]
async fn update_into_existing_title_conflicts() {
    let harness = TestHarness::new();
    harness.open_course("Taken", 0).await;
    let course_id = harness.open_course("Free", 0).await;

    let response = harness
        .server
        .patch(&format!("/v1/courses/{course_id}"))
        .add_header("authorization", harness.owner_auth_header())
        .json(&json!({ "title": "Taken" }))
        .await;

    response.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn deleted_offering_disappears_and_frees_title() {
    let harness = TestHarness::new();
    let course_id = harness.open_course("Rust 101", 0).await;

    let response = harness
        .server
        .delete(&format!("/v1/courses/{course_id}"))
        .add_header("authorization", harness.owner_auth_header())
        .await;
    response.assert_status(StatusCode::NO_CONTENT);

    let response = harness.server.get(&format!("/v1/courses/{course_id}")).await;
    response.assert_status(StatusCode::NOT_FOUND);

    let list: Vec<Value> = harness.server.get("/v1/courses").await.json();
    assert!(list.is_empty());

    let again = harness.open_course("Rust 101", 0).await;
    assert_ne!(again, course_id);

    let snapshot = harness.snapshot();
    assert_eq!(snapshot.offerings.len(), 2);
    assert_eq!(
        snapshot.offerings.iter().filter(|o| o.is_destroyed).count(),
        1
    );
}

#[tokio::test]
async fn bulk_update_returns_rows_in_input_order() {
    let harness = TestHarness::new();
    let first = harness.open_course("First", 0).await;
    let second = harness.open_course("Second", 0).await;

    let response = harness
        .server
        .patch("/v1/courses")
        .add_header("authorization", harness.owner_auth_header())
        .json(&json!([
            { "id": second, "cost": 200 },
            { "id": first, "cost": 100 }
        ]))
        .await;

    response.assert_status_ok();
    let rows: Vec<Value> = response.json();
    assert_eq!(rows[0]["id"], second.as_str());
    assert_eq!(rows[0]["cost"], 200);
    assert_eq!(rows[1]["id"], first.as_str());
    assert_eq!(rows[1]["cost"], 100);
}

#[tokio::test]
async fn bulk_update_is_all_or_nothing() {
    let harness = TestHarness::new();
    let first = harness.open_course("First", 0).await;
    let second = harness.open_course("Second", 0).await;
    let before = harness.snapshot();

    let response = harness
        .server
        .patch("/v1/courses")
        .add_header("authorization", harness.owner_auth_header())
        .json(&json!([
            { "id": first, "cost": 100 },
            { "id": second, "start_at": today() + Days::new(90) }
        ]))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(harness.snapshot(), before);
}
