//! End-to-end tests for the admin analytics surface: authentication,
//! auditing, exports and operator controls.

use analytics_core::{actions, AuditOutcome, EntityRef, EventType, StatWindow};
use axum::http::StatusCode;
use chrono::{Duration, Utc};
use integration_tests::{
    fixtures,
    setup::{slow_refill_limits, TestContext},
};
use uuid::Uuid;

#[tokio::test]
async fn test_missing_token_denied_and_audited() {
    let ctx = TestContext::new().await;
    let server = ctx.server();

    let response = server.get("/analytics/realtime").await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "AUTH_001");

    let denied = ctx
        .store
        .count_audit(actions::ADMIN_AUTH, AuditOutcome::Denied)
        .await
        .unwrap();
    assert_eq!(denied, 1);
}

/// Repeated failed logins from one IP exhaust the stricter admin budget.
#[tokio::test]
async fn test_admin_auth_attempts_rate_limited() {
    let ctx = TestContext::new().await;
    let server = ctx.server_with_rate_limits(&slow_refill_limits());

    for _ in 0..5 {
        server
            .get("/analytics/realtime")
            .add_header("Authorization", "Bearer short")
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    // even a valid token is refused until the bucket refills
    let response = server
        .get("/analytics/realtime")
        .add_header("Authorization", &fixtures::admin_bearer())
        .await;
    response.assert_status(StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "RATE_002");
    assert!(response.headers().get("retry-after").is_some());
}

#[tokio::test]
async fn test_successful_view_is_audited_with_actor() {
    let ctx = TestContext::new().await;
    let server = ctx.server();

    server
        .get("/analytics/global?days=7")
        .add_header("Authorization", &fixtures::admin_bearer())
        .await
        .assert_status_ok();

    let response = server
        .get("/analytics/audit?limit=10")
        .add_header("Authorization", &fixtures::admin_bearer())
        .await;
    response.assert_status_ok();
    let records: Vec<serde_json::Value> = response.json();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["action"], actions::VIEW_GLOBAL);
    assert_eq!(records[0]["actor"], api::state::MOCK_ADMIN_USERNAME);
    assert_eq!(records[0]["outcome"], "success");
    assert_eq!(records[0]["details"]["days"], 7);
}

#[tokio::test]
async fn test_out_of_range_days_rejected() {
    let ctx = TestContext::new().await;
    let server = ctx.server();

    let response = server
        .get("/analytics/global?days=0")
        .add_header("Authorization", &fixtures::admin_bearer())
        .await;
    response.assert_status_bad_request();
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "VALID_003");

    let invalid = ctx
        .store
        .count_audit(actions::VIEW_GLOBAL, AuditOutcome::Invalid)
        .await
        .unwrap();
    assert_eq!(invalid, 1);
}

/// An inverted range is a validation error, produces no file, and is audited.
#[tokio::test]
async fn test_export_invalid_range_e2e() {
    let ctx = TestContext::new().await;
    let server = ctx.server();

    let response = server
        .post("/analytics/export")
        .add_header("Authorization", &fixtures::admin_bearer())
        .json(&fixtures::export_request("events", "2024-02-01", "2024-01-01"))
        .await;

    response.assert_status_bad_request();
    assert!(response.headers().get("content-disposition").is_none());
    let body: serde_json::Value = response.json();
    assert_eq!(body["code"], "VALID_002");

    let invalid = ctx
        .store
        .count_audit(actions::EXPORT, AuditOutcome::Invalid)
        .await
        .unwrap();
    assert_eq!(invalid, 1);
}

#[tokio::test]
async fn test_export_events_csv_e2e() {
    let ctx = TestContext::new().await;
    let server = ctx.server();

    for venue in [1, 2, 3] {
        server
            .post("/track/event")
            .json(&fixtures::venue_view(venue))
            .await
            .assert_status_ok();
    }

    let today = Utc::now().date_naive().to_string();
    let response = server
        .post("/analytics/export")
        .add_header("Authorization", &fixtures::admin_bearer())
        .json(&fixtures::export_request("events", &today, &today))
        .await;

    response.assert_status_ok();
    assert_eq!(
        response.headers().get("content-disposition").unwrap(),
        format!("attachment; filename=analytics_events_{today}_{today}.csv").as_str()
    );
    assert_eq!(response.headers().get("x-export-truncated").unwrap(), "false");

    let csv = response.text();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("id,event_type,venue_id,content_id,session_id"));
    assert!(lines[1..].iter().all(|l| l.contains(",venue_view,")));

    let success = ctx
        .store
        .count_audit(actions::EXPORT, AuditOutcome::Success)
        .await
        .unwrap();
    assert_eq!(success, 1);
}

/// Venue exports covering today carry today's live figures.
#[tokio::test]
async fn test_export_venues_includes_today_e2e() {
    let ctx = TestContext::new().await;
    let server = ctx.server();

    for venue in [8, 8, 9] {
        server
            .post("/track/event")
            .json(&fixtures::venue_view(venue))
            .await
            .assert_status_ok();
    }

    let today = Utc::now().date_naive();
    let start = (today - Duration::days(7)).to_string();
    let response = server
        .post("/analytics/export")
        .add_header("Authorization", &fixtures::admin_bearer())
        .json(&fixtures::export_request("venues", &start, &today.to_string()))
        .await;

    response.assert_status_ok();
    let csv = response.text();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with(&format!("8,{today},2,")));
    assert!(lines[2].starts_with(&format!("9,{today},1,")));
}

#[tokio::test]
async fn test_export_truncates_at_row_limit() {
    let config = analytics_core::AnalyticsConfig {
        max_export_rows: 2,
        ..integration_tests::setup::test_config()
    };
    let ctx = TestContext::with_config(config, None).await;
    let server = ctx.server();

    let now = Utc::now();
    for _ in 0..5 {
        fixtures::seed_event(&ctx.store, EventType::Click, None, Uuid::new_v4(), now).await;
    }

    let today = now.date_naive().to_string();
    let response = server
        .post("/analytics/export")
        .add_header("Authorization", &fixtures::admin_bearer())
        .json(&fixtures::export_request("events", &today, &today))
        .await;

    response.assert_status_ok();
    assert_eq!(response.headers().get("x-export-truncated").unwrap(), "true");
    assert_eq!(response.headers().get("x-export-row-limit").unwrap(), "2");
    assert_eq!(response.text().lines().count(), 3);
}

/// Re-running aggregation for a day yields identical rollups.
#[tokio::test]
async fn test_aggregation_run_idempotent_e2e() {
    let ctx = TestContext::new().await;
    let server = ctx.server();

    let yesterday = Utc::now().date_naive() - Duration::days(1);
    let (start, _) = analytics_core::day_bounds(yesterday);
    let session = Uuid::new_v4();
    for i in 0..3 {
        fixtures::seed_event(
            &ctx.store,
            EventType::VenueView,
            Some(11),
            session,
            start + Duration::minutes(i),
        )
        .await;
    }

    let run = |server: &axum_test::TestServer| {
        server
            .post("/analytics/aggregation/run")
            .add_header("Authorization", &fixtures::admin_bearer())
            .json(&serde_json::json!({ "date": yesterday.to_string() }))
    };

    let first = run(&server).await;
    first.assert_status_ok();
    let body: serde_json::Value = first.json();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["venues"], 1);
    let after_first = ctx
        .store
        .rollups_for(EntityRef::venue(11), StatWindow::single(yesterday))
        .await
        .unwrap();

    run(&server).await.assert_status_ok();
    let after_second = ctx
        .store
        .rollups_for(EntityRef::venue(11), StatWindow::single(yesterday))
        .await
        .unwrap();

    assert_eq!(after_first, after_second);
    assert_eq!(after_second.len(), 1);
    assert_eq!(after_second[0].stats.views, 3);
    assert_eq!(after_second[0].stats.unique_visitors, 1);

    let status = server
        .get("/analytics/aggregation/status")
        .add_header("Authorization", &fixtures::admin_bearer())
        .await;
    status.assert_status_ok();
    let body: serde_json::Value = status.json();
    assert_eq!(body["outstanding_failures"], 0);
    assert_eq!(body["recent_runs"][0]["date"], yesterday.to_string());
    assert_eq!(body["recent_runs"][0]["status"], "completed");
}

/// The current day is still open, so a manual run for it is refused before any
/// rollup or run record is written.
#[tokio::test]
async fn test_aggregation_run_rejects_open_day() {
    let ctx = TestContext::new().await;
    let server = ctx.server();

    let today = Utc::now().date_naive();
    fixtures::seed_event(&ctx.store, EventType::VenueView, Some(11), Uuid::new_v4(), Utc::now())
        .await;

    for date in [today, today + Duration::days(1)] {
        let response = server
            .post("/analytics/aggregation/run")
            .add_header("Authorization", &fixtures::admin_bearer())
            .json(&serde_json::json!({ "date": date.to_string() }))
            .await;
        response.assert_status_bad_request();
        let body: serde_json::Value = response.json();
        assert_eq!(body["code"], "VALID_002");
    }

    assert!(ctx.store.aggregation_run(today).await.unwrap().is_none());
    assert!(ctx
        .store
        .rollups_for(EntityRef::venue(11), StatWindow::single(today))
        .await
        .unwrap()
        .is_empty());
    let invalid = ctx
        .store
        .count_audit(actions::RUN_AGGREGATION, AuditOutcome::Invalid)
        .await
        .unwrap();
    assert_eq!(invalid, 2);
}

#[tokio::test]
async fn test_retention_purge_e2e() {
    let ctx = TestContext::new().await;
    let server = ctx.server();

    let now = Utc::now();
    let retention_days = i64::from(ctx.state.config.retention_days);
    fixtures::seed_event(
        &ctx.store,
        EventType::Click,
        None,
        Uuid::new_v4(),
        now - Duration::days(retention_days + 5),
    )
    .await;
    fixtures::seed_event(&ctx.store, EventType::Click, None, Uuid::new_v4(), now).await;

    let response = server
        .post("/analytics/retention/purge")
        .add_header("Authorization", &fixtures::admin_bearer())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["events"], 1);
    assert_eq!(ctx.event_count().await, 1);

    let purges = ctx
        .store
        .count_audit(actions::PURGE_RETENTION, AuditOutcome::Success)
        .await
        .unwrap();
    assert_eq!(purges, 1);
}

#[tokio::test]
async fn test_realtime_panel_e2e() {
    let ctx = TestContext::new().await;
    let server = ctx.server();

    server
        .post("/track/event")
        .add_header("X-Session-ID", "rt-visitor")
        .json(&fixtures::venue_view(9))
        .await
        .assert_status_ok();
    server
        .post("/track/search")
        .add_header("X-Session-ID", "rt-visitor")
        .json(&fixtures::search("jazz"))
        .await
        .assert_status_ok();

    let response = server
        .get("/analytics/realtime")
        .add_header("Authorization", &fixtures::admin_bearer())
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["active_sessions"], 1);
    assert_eq!(body["recent_events"], 2);
    assert_eq!(body["trending_venues"][0]["entity_id"], 9);
    assert_eq!(body["recent_searches"][0]["search_term"], "jazz");
}
