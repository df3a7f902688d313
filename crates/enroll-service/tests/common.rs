//! Common test utilities for enrollment integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum_test::TestServer;
use chrono::{Days, NaiveDate, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};

use enroll_core::UserId;
use enroll_service::auth::JwtClaims;
use enroll_service::{create_router, AppState, ServiceConfig};
use enroll_store::{MemoryStore, Snapshot};

/// Secret shared by the harness and the service under test.
pub const TEST_JWT_SECRET: &str = "test-secret";

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Application state behind the server, for calling services directly.
    pub state: AppState,
    /// The in-memory store behind the server.
    pub store: MemoryStore,
    /// A user that creates offerings.
    pub owner_id: UserId,
    /// A user that applies to offerings.
    pub user_id: UserId,
}

impl TestHarness {
    /// Create a new test harness with a fresh store.
    pub fn new() -> Self {
        Self::with_lock_timeout(Duration::from_secs(5))
    }

    /// Create a harness whose row-lock waits give up after `lock_timeout`.
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        let store = MemoryStore::with_lock_timeout(lock_timeout);

        let config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            jwt_secret: TEST_JWT_SECRET.into(),
            lock_timeout_ms: u64::try_from(lock_timeout.as_millis()).unwrap_or(u64::MAX),
            ..ServiceConfig::default()
        };

        let state = AppState::new(Arc::new(store.clone()), config);
        let router: Router = create_router(state.clone());

        let server = TestServer::new(router).expect("Failed to create test server");

        Self {
            server,
            state,
            store,
            owner_id: UserId::generate(),
            user_id: UserId::generate(),
        }
    }

    /// Authorization header value for `user_id`.
    pub fn auth_header_for(user_id: UserId) -> String {
        let claims = JwtClaims {
            sub: user_id.to_string(),
            exp: Utc::now().timestamp() + 3600,
            iat: Some(Utc::now().timestamp()),
            username: Some("tester".into()),
            email: Some("tester@example.com".into()),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(TEST_JWT_SECRET.as_bytes()),
        )
        .expect("Failed to sign token");
        format!("Bearer {token}")
    }

    /// Authorization header for the offering owner.
    pub fn owner_auth_header(&self) -> String {
        Self::auth_header_for(self.owner_id)
    }

    /// Authorization header for the applying user.
    pub fn user_auth_header(&self) -> String {
        Self::auth_header_for(self.user_id)
    }

    /// Committed store contents.
    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot().expect("Failed to snapshot store")
    }

    /// Create an offering as the owner and return its JSON.
    pub async fn create_offering(&self, collection: &str, body: Value) -> Value {
        let response = self
            .server
            .post(&format!("/v1/{collection}"))
            .add_header("authorization", self.owner_auth_header())
            .json(&body)
            .await;
        response.assert_status(axum::http::StatusCode::CREATED);
        response.json()
    }

    /// Create an open course costing `cost` and return its id.
    pub async fn open_course(&self, title: &str, cost: i64) -> String {
        let course = self.create_offering("courses", open_offering(title, cost)).await;
        course["id"].as_str().expect("course id").to_string()
    }

    /// Fetch an offering as JSON.
    pub async fn get_offering(&self, collection: &str, id: &str) -> Value {
        let response = self.server.get(&format!("/v1/{collection}/{id}")).await;
        response.assert_status_ok();
        response.json()
    }

    /// Apply to an offering as `user_id`.
    pub async fn apply_as(
        &self,
        user_id: UserId,
        collection: &str,
        id: &str,
        amount: i64,
    ) -> axum_test::TestResponse {
        self.server
            .post(&format!("/v1/{collection}/{id}/apply"))
            .add_header("authorization", Self::auth_header_for(user_id))
            .json(&json!({ "amount": amount, "method": "CARD" }))
            .await
    }

    /// Post to an offering action (`cancel`, `complete`) as `user_id`.
    pub async fn action_as(
        &self,
        user_id: UserId,
        collection: &str,
        id: &str,
        action: &str,
    ) -> axum_test::TestResponse {
        self.server
            .post(&format!("/v1/{collection}/{id}/{action}"))
            .add_header("authorization", Self::auth_header_for(user_id))
            .await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Today in UTC.
pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Offering body whose window includes today.
pub fn open_offering(title: &str, cost: i64) -> Value {
    json!({
        "title": title,
        "description": "integration test offering",
        "start_at": today() - Days::new(1),
        "end_at": today() + Days::new(30),
        "status": "AVAILABLE",
        "cost": cost
    })
}

/// Error code from an error response body.
pub fn error_code(body: &Value) -> &str {
    body["error"]["code"].as_str().unwrap_or_default()
}
