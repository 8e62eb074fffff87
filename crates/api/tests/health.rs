//! Health endpoint and middleware stack tests.

mod common;

use axum::http::StatusCode;
use common::{assert_status, body_json, build_test_app, get, setup};

/// GET /health reports the store as healthy and needs no caller identity.
#[tokio::test]
async fn test_health_check() {
    let env = setup("exit 0", |_| {}).await;
    let app = build_test_app(&env);

    let response = get(app, "/health", None).await;
    assert_status(&response, StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["db_healthy"], true);
    assert_eq!(body["active_jobs"], 0);
}

/// Every response carries a generated `x-request-id`.
#[tokio::test]
async fn test_request_id_is_propagated() {
    let env = setup("exit 0", |_| {}).await;
    let app = build_test_app(&env);

    let response = get(app, "/health", None).await;
    let request_id = response
        .headers()
        .get("x-request-id")
        .expect("x-request-id header should be set");
    assert!(!request_id.is_empty());
}

/// Unknown routes are 404.
#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let env = setup("exit 0", |_| {}).await;
    let app = build_test_app(&env);

    let response = get(app, "/api/v1/nothing-here", Some("ops")).await;
    assert_status(&response, StatusCode::NOT_FOUND);
}
