//! Common test utilities and helpers for tenancy-api tests
//!
//! Builds the full router over an in-memory database and fake providers so
//! tests can drive the HTTP surface and still reach behind it.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, Response, StatusCode},
    Router,
};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::Arc;
use tenancy_api::{create_app, AppState, StateOptions};
use tenancy_orchestrator::providers::NativeSubscriptionStatus;
use tenancy_orchestrator::test_utils::{create_test_db, FakeBillingProvider, FakeIdentityProvider};
use tenancy_orchestrator::{NewWorkspace, Workspace, WorkspaceStore};
use tower::ServiceExt; // for `oneshot`

pub const ADMIN: &str = "admin@example.com";

/// TestClient to encapsulate API interaction logic
pub struct TestClient {
    pub app: Router,
    pub pool: SqlitePool,
    pub identity: Arc<FakeIdentityProvider>,
    pub billing: Arc<FakeBillingProvider>,
}

impl TestClient {
    pub async fn new() -> Self {
        let pool = create_test_db().await;
        let identity = Arc::new(FakeIdentityProvider::new());
        let billing = Arc::new(FakeBillingProvider::new());

        let state = AppState::new(
            pool.clone(),
            identity.clone(),
            billing.clone(),
            StateOptions::default(),
        );

        Self {
            app: create_app(state),
            pool,
            identity,
            billing,
        }
    }

    pub fn store(&self) -> WorkspaceStore {
        WorkspaceStore::new(self.pool.clone())
    }

    /// Send a request to the API
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<Value>,
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }

        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        self.send(request).await
    }

    pub async fn get(&self, uri: &str, headers: &[(&str, &str)]) -> Response<Body> {
        self.request("GET", uri, headers, None).await
    }

    pub async fn post(&self, uri: &str, headers: &[(&str, &str)], body: Value) -> Response<Body> {
        self.request("POST", uri, headers, Some(body)).await
    }

    pub async fn delete(&self, uri: &str, headers: &[(&str, &str)]) -> Response<Body> {
        self.request("DELETE", uri, headers, None).await
    }

    /// Stage a signup over HTTP, complete its checkout at the fake billing
    /// provider and run provisioning. Returns the provisioned workspace view.
    pub async fn provision(&self, session: &str, name: &str, slug: &str) -> Value {
        let headers = signup_headers("founder", session);

        let response = self
            .post(
                "/api/v1/provisioning/intent",
                &headers,
                json!({ "name": name, "slug": slug, "plan": "growth", "interval": "year" }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let started: Value = extract_json_body(response).await;
        let checkout_ref = started["checkout_session_id"].as_str().unwrap().to_string();

        self.billing
            .complete_checkout(&checkout_ref, NativeSubscriptionStatus::Trialing);

        let response = self
            .post(
                "/api/v1/provisioning/run",
                &headers,
                json!({ "checkout_ref": checkout_ref }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        extract_json_body(response).await
    }

    /// Insert a bare workspace row with no billing attached.
    pub async fn fixture_workspace(&self, org_ref: &str, name: &str) -> Workspace {
        self.store()
            .create_workspace(NewWorkspace {
                org_ref: org_ref.to_string(),
                name: name.to_string(),
                slug: None,
            })
            .await
            .expect("Failed to create fixture workspace")
    }
}

/// Helper to extract JSON body from axum response
pub async fn extract_json_body<T>(response: Response<Body>) -> T
where
    T: serde::de::DeserializeOwned,
{
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");

    serde_json::from_slice(&body).expect("Failed to deserialize JSON")
}

pub fn admin_headers() -> Vec<(&'static str, &'static str)> {
    vec![("x-user", ADMIN), ("x-user-role", "admin")]
}

pub fn member_headers<'a>(username: &'a str, org_id: &'a str) -> Vec<(&'static str, &'a str)> {
    vec![("x-user", username), ("x-org-id", org_id)]
}

pub fn signup_headers<'a>(username: &'a str, session: &'a str) -> Vec<(&'static str, &'a str)> {
    vec![("x-user", username), ("x-signup-session", session)]
}
