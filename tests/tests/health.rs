//! Tests for health check endpoints.

use axum::http::StatusCode;
use integration_tests::setup::TestContext;

/// Test /health endpoint returns proper structure
#[tokio::test]
async fn test_health_endpoint_structure() {
    let ctx = TestContext::new().await;
    let server = ctx.server();

    let response = server.get("/health").await;
    response.assert_status_ok();

    let body: serde_json::Value = response.json();
    for field in ["status", "store_connected", "auth_connected", "components"] {
        assert!(body.get(field).is_some(), "Response should have '{field}' field");
    }
    assert_eq!(body["auth_mode"], "mock");

    let status = body["status"].as_str().unwrap_or("");
    assert!(
        matches!(status, "healthy" | "degraded" | "unhealthy"),
        "unexpected status '{status}'"
    );
}

/// Test /health/ready follows the store component
#[tokio::test]
async fn test_ready_endpoint_tracks_store() {
    let ctx = TestContext::new().await;
    let server = ctx.server();

    telemetry::health().store.set_healthy();
    server.get("/health/ready").await.assert_status_ok();
}

/// Test /health/live endpoint
#[tokio::test]
async fn test_live_endpoint() {
    let ctx = TestContext::new().await;
    let server = ctx.server();

    server.get("/health/live").await.assert_status_ok();
}

/// Test that health endpoints don't require authentication
#[tokio::test]
async fn test_health_endpoints_no_auth_required() {
    let ctx = TestContext::new().await;
    let server = ctx.server();

    for path in ["/health", "/health/ready", "/health/live"] {
        let response = server.get(path).await;
        assert_ne!(
            response.status_code(),
            StatusCode::UNAUTHORIZED,
            "{path} should not require auth"
        );
    }
}
