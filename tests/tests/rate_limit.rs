//! Rate limiting on the public tracking surface.

use api::middleware::rate_limit::RateLimitSettings;
use axum::http::StatusCode;
use integration_tests::{
    fixtures,
    setup::{slow_refill_limits, TestContext},
};

/// The 101st request from one IP inside the window is rejected with no write.
#[tokio::test]
async fn test_request_over_budget_rejected() {
    let ctx = TestContext::new().await;
    let server = ctx.server_with_rate_limits(&slow_refill_limits());

    for _ in 0..100 {
        server
            .post("/track/favorite")
            .add_header("X-Forwarded-For", "198.51.100.4")
            .json(&fixtures::favorite_venue(8))
            .await
            .assert_status_ok();
    }
    let attempts_before = ctx.writer.event_attempts();

    let response = server
        .post("/track/favorite")
        .add_header("X-Forwarded-For", "198.51.100.4")
        .json(&fixtures::favorite_venue(8))
        .await;
    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "RATE_001");
    assert!(response.headers().get("retry-after").is_some());

    assert_eq!(ctx.writer.event_attempts(), attempts_before);
    assert_eq!(ctx.event_count().await, 100);

    // another client still has its own budget
    server
        .post("/track/favorite")
        .add_header("X-Forwarded-For", "198.51.100.5")
        .json(&fixtures::favorite_venue(8))
        .await
        .assert_status_ok();
}

/// Rejection happens before parsing: a malformed body still gets 429.
#[tokio::test]
async fn test_limit_checked_before_validation() {
    let ctx = TestContext::new().await;
    let server = ctx.server_with_rate_limits(&slow_refill_limits());

    for _ in 0..100 {
        server
            .post("/track/search")
            .add_header("X-Forwarded-For", "198.51.100.9")
            .json(&fixtures::search("tapas"))
            .await
            .assert_status_ok();
    }

    let response = server
        .post("/track/search")
        .add_header("X-Forwarded-For", "198.51.100.9")
        .text("{not json")
        .await;
    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
}

/// Without a trusted proxy a rotating `X-Forwarded-For` earns no extra budget.
#[tokio::test]
async fn test_forwarded_header_ignored_when_untrusted() {
    let ctx = TestContext::new().await;
    let settings = RateLimitSettings {
        public_requests: 3,
        trust_forwarded_headers: false,
        ..slow_refill_limits()
    };
    let server = ctx.server_with_rate_limits(&settings);

    for i in 0..3 {
        server
            .post("/track/favorite")
            .add_header("X-Forwarded-For", &format!("198.51.100.{}", 20 + i))
            .json(&fixtures::favorite_venue(8))
            .await
            .assert_status_ok();
    }

    let response = server
        .post("/track/favorite")
        .add_header("X-Forwarded-For", "198.51.100.99")
        .json(&fixtures::favorite_venue(8))
        .await;
    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(ctx.event_count().await, 3);
}
