//! End-to-end tests for the public tracking surface.
//!
//! POST /track/* → EventCollector → MockWriter → SQLite, then read back
//! through the admin dashboards.

use std::sync::Arc;
use std::time::Duration;

use analytics_core::{EntityRef, ReferentialPolicy};
use api::{Catalog, StaticCatalog};
use chrono::Utc;
use integration_tests::{fixtures, setup::TestContext};

/// Tracked event lands in storage and the session token is echoed back.
#[tokio::test]
async fn test_track_event_e2e() {
    let ctx = TestContext::new().await;
    let server = ctx.server();

    let response = server
        .post("/track/event")
        .add_header("X-Session-ID", "visitor-1")
        .json(&fixtures::venue_view(7))
        .await;

    response.assert_status_ok();
    assert_eq!(response.headers().get("x-session-id").unwrap(), "visitor-1");
    let body: serde_json::Value = response.json();
    assert_eq!(body["tracked"], true);
    assert!(body["session_id"].is_string());

    assert_eq!(ctx.event_count().await, 1);
    let sessions = ctx.store.sessions_for_token("visitor-1").await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].page_view_count, 1);
}

/// Requests without a token get a minted one; reusing it extends the session.
#[tokio::test]
async fn test_minted_token_extends_session() {
    let ctx = TestContext::new().await;
    let server = ctx.server();

    let first = server.post("/track/event").json(&fixtures::venue_view(1)).await;
    first.assert_status_ok();
    let token = first.headers().get("x-session-id").unwrap().to_str().unwrap().to_string();
    let first_body: serde_json::Value = first.json();

    let second = server
        .post("/track/favorite")
        .add_header("Cookie", &format!("session_id={token}"))
        .json(&fixtures::favorite_venue(1))
        .await;
    second.assert_status_ok();
    let second_body: serde_json::Value = second.json();

    assert_eq!(first_body["session_id"], second_body["session_id"]);
    let sessions = ctx.store.sessions_for_token(&token).await.unwrap();
    assert_eq!(sessions[0].page_view_count, 2);
}

/// Three searches for one term (any case, padded) count as frequency 3.
#[tokio::test]
async fn test_popular_searches_normalized() {
    let ctx = TestContext::new().await;
    let server = ctx.server();

    for term in ["rooftop", " Rooftop", "ROOFTOP "] {
        let response = server.post("/track/search").json(&fixtures::search(term)).await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["tracked"], true);
    }

    let blank = server.post("/track/search").json(&fixtures::search("   ")).await;
    blank.assert_status_ok();
    let body: serde_json::Value = blank.json();
    assert_eq!(body["tracked"], false);

    let response = server
        .get("/analytics/global?days=1")
        .add_header("Authorization", &fixtures::admin_bearer())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();

    let searches = body["popular_searches"].as_array().unwrap();
    let rooftop = searches
        .iter()
        .find(|s| s["search_term"] == "rooftop")
        .expect("rooftop should be a popular search");
    assert_eq!(rooftop["frequency"], 3);
    assert_eq!(searches.len(), 1);
}

/// Today's venue figures come from raw events, matching a direct computation.
#[tokio::test]
async fn test_venue_dashboard_today_matches_raw() {
    let ctx = TestContext::new().await;
    let server = ctx.server();

    for token in ["visitor-a", "visitor-a", "visitor-b"] {
        server
            .post("/track/event")
            .add_header("X-Session-ID", token)
            .json(&fixtures::venue_view(42))
            .await
            .assert_status_ok();
    }
    server
        .post("/track/share")
        .add_header("X-Session-ID", "visitor-b")
        .json(&fixtures::share_venue(42, "whatsapp"))
        .await
        .assert_status_ok();

    let response = server
        .get("/analytics/venues/42?days=30")
        .add_header("Authorization", &fixtures::admin_bearer())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();

    let today = Utc::now().date_naive();
    let raw = ctx.store.compute_day_stat(EntityRef::venue(42), today).await.unwrap();
    assert_eq!(raw.stats.views, 3);
    assert_eq!(raw.stats.unique_visitors, 2);
    assert_eq!(raw.stats.shares, 1);

    let days = body["daily_breakdown"].as_array().unwrap();
    assert_eq!(days.len(), 1);
    assert_eq!(days[0]["live"], true);
    assert_eq!(days[0]["date"], today.to_string());
    assert_eq!(days[0]["views"], raw.stats.views);
    assert_eq!(days[0]["unique_visitors"], raw.stats.unique_visitors);
    assert_eq!(days[0]["shares"], raw.stats.shares);
    assert_eq!(body["stats"]["views"], 3);
    assert!(body["name"].is_null());

    // nothing was rolled up for today
    assert!(ctx.store.aggregation_run(today).await.unwrap().is_none());
}

/// Storage failures never reach the caller.
#[tokio::test]
async fn test_storage_failure_is_swallowed() {
    let ctx = TestContext::new().await;
    let server = ctx.server();
    ctx.writer.set_should_fail(true);

    let response = server.post("/track/event").json(&fixtures::venue_view(3)).await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["tracked"], false);

    ctx.writer.set_should_fail(false);
    assert_eq!(ctx.event_count().await, 0);
}

/// A write slower than the collector timeout is dropped, not awaited.
#[tokio::test]
async fn test_slow_storage_times_out() {
    let config = analytics_core::AnalyticsConfig {
        collector_timeout_ms: 50,
        ..analytics_core::AnalyticsConfig::default()
    };
    let ctx = TestContext::with_config(config, None).await;
    let server = ctx.server();
    ctx.writer.set_delay(Some(Duration::from_millis(500)));

    let response = server.post("/track/event").json(&fixtures::venue_view(3)).await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["tracked"], false);
}

#[tokio::test]
async fn test_unrecognized_event_type_rejected() {
    let ctx = TestContext::new().await;
    let server = ctx.server();

    let response = server
        .post("/track/event")
        .json(&serde_json::json!({ "event_type": "page_flip" }))
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "VALID_001");
    assert_eq!(ctx.writer.event_attempts(), 0);
}

/// Under the default policy an unknown venue is stored and shown without a name.
#[tokio::test]
async fn test_unknown_venue_accepted_by_default() {
    let catalog: Arc<dyn Catalog> = Arc::new(StaticCatalog::new().venue(5, "Skyline Bar"));
    let ctx = TestContext::with_catalog(catalog, ReferentialPolicy::Accept).await;
    let server = ctx.server();

    server.post("/track/event").json(&fixtures::venue_view(999)).await.assert_status_ok();
    server.post("/track/event").json(&fixtures::venue_view(5)).await.assert_status_ok();
    assert_eq!(ctx.event_count().await, 2);

    let response = server
        .get("/analytics/global?days=1")
        .add_header("Authorization", &fixtures::admin_bearer())
        .await;
    let body: serde_json::Value = response.json();
    let top = body["top_venues"].as_array().unwrap();
    let named = top.iter().find(|v| v["id"] == 5).unwrap();
    assert_eq!(named["name"], "Skyline Bar");
    let unknown = top.iter().find(|v| v["id"] == 999).unwrap();
    assert!(unknown["name"].is_null());
}

/// Under `reject` an unknown venue fails validation before any write.
#[tokio::test]
async fn test_unknown_venue_rejected_by_policy() {
    let catalog: Arc<dyn Catalog> = Arc::new(StaticCatalog::new().venue(5, "Skyline Bar"));
    let ctx = TestContext::with_catalog(catalog, ReferentialPolicy::Reject).await;
    let server = ctx.server();

    let response = server.post("/track/event").json(&fixtures::venue_view(999)).await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "VALID_001");

    server.post("/track/event").json(&fixtures::venue_view(5)).await.assert_status_ok();
    assert_eq!(ctx.event_count().await, 1);
}

/// Content events pick up their venue from the catalog.
#[tokio::test]
async fn test_content_event_enriched_with_venue() {
    let catalog: Arc<dyn Catalog> =
        Arc::new(StaticCatalog::new().venue(5, "Skyline Bar").content(77, "Sunset set", 5));
    let ctx = TestContext::with_catalog(catalog, ReferentialPolicy::Accept).await;
    let server = ctx.server();

    server.post("/track/event").json(&fixtures::content_view(77)).await.assert_status_ok();

    let today = Utc::now().date_naive();
    let venue = ctx.store.compute_day_stat(EntityRef::venue(5), today).await.unwrap();
    assert_eq!(venue.stats.content_views, 1);
}
