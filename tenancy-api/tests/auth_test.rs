//! Integration tests for authentication middleware
//!
//! Tests that the auth middleware correctly extracts caller identity from
//! proxy headers and that the role and session helpers enforce access.

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Request, StatusCode},
    middleware,
    routing::get,
    Router,
};
use tenancy_api::auth::{
    auth_middleware, require_admin, signup_session, AuthenticatedUser, SIGNUP_SESSION_HEADER,
};
use tenancy_api::ApiError;
use tower::ServiceExt; // for `oneshot`

// Simple handler that returns the authenticated user info
async fn test_handler(
    axum::Extension(user): axum::Extension<AuthenticatedUser>,
) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "username": user.username,
        "role": user.role,
        "org_id": user.org_id,
        "is_admin": user.is_admin(),
    }))
}

// Create a test app with auth middleware
fn create_test_app() -> Router {
    Router::new()
        .route("/protected", get(test_handler))
        .layer(middleware::from_fn(auth_middleware))
}

async fn call(headers: &[(&str, &str)]) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().uri("/protected");
    for (k, v) in headers {
        builder = builder.header(*k, *v);
    }

    let response = create_test_app()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn user(role: Option<&str>) -> AuthenticatedUser {
    AuthenticatedUser {
        username: "someone".to_string(),
        role: role.map(str::to_string),
        org_id: None,
    }
}

#[tokio::test]
async fn test_valid_x_user_header_passes() {
    let (status, json) = call(&[("x-user", "testuser")]).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["username"], "testuser");
    assert!(json["role"].is_null());
    assert!(json["org_id"].is_null());
    assert_eq!(json["is_admin"], false);
}

#[tokio::test]
async fn test_role_and_org_headers_are_extracted() {
    let (status, json) = call(&[
        ("x-user", "ops@example.com"),
        ("x-user-role", "admin"),
        ("x-org-id", "org_42"),
    ])
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["role"], "admin");
    assert_eq!(json["org_id"], "org_42");
    assert_eq!(json["is_admin"], true);
}

#[tokio::test]
async fn test_missing_user_header_fails() {
    let (status, json) = call(&[("x-org-id", "org_42")]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(json["error"].as_str().unwrap().contains("x-user"));
}

#[tokio::test]
async fn test_blank_user_header_fails() {
    let (status, _) = call(&[("x-user", "   ")]).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_blank_org_header_is_ignored() {
    let (status, json) = call(&[("x-user", "testuser"), ("x-org-id", "")]).await;

    assert_eq!(status, StatusCode::OK);
    assert!(json["org_id"].is_null());
}

#[test]
fn test_require_admin() {
    assert!(require_admin(&user(Some("admin"))).is_ok());
    assert!(matches!(
        require_admin(&user(Some("member"))),
        Err(ApiError::Forbidden(_))
    ));
    assert!(matches!(require_admin(&user(None)), Err(ApiError::Forbidden(_))));
}

#[test]
fn test_signup_session_header() {
    let mut headers = HeaderMap::new();
    assert!(matches!(
        signup_session(&headers),
        Err(ApiError::BadRequest(_))
    ));

    headers.insert(SIGNUP_SESSION_HEADER, HeaderValue::from_static(" sess-1 "));
    assert_eq!(signup_session(&headers).unwrap(), "sess-1");
}
