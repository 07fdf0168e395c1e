//! Admin analytics endpoints.
//!
//! Each call is written to the audit log with the admin's identity, the
//! request parameters and the outcome, whether or not it succeeds.

use analytics_core::{actions, AuditEntry, AuditOutcome, Error, ExportRequest, Result};
use axum::{
    body::{Body, Bytes},
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::extractors::AdminContext;
use crate::response::ApiError;
use crate::services::{EntityDashboard, GlobalDashboard, PerformanceDashboard, RealtimeSnapshot};
use crate::state::AppState;

pub const EXPORT_TRUNCATED_HEADER: &str = "x-export-truncated";
pub const EXPORT_ROW_LIMIT_HEADER: &str = "x-export-row-limit";

const DEFAULT_DASHBOARD_DAYS: u32 = 30;
const DEFAULT_PERFORMANCE_HOURS: u32 = 24;

#[derive(Debug, Deserialize)]
pub struct DaysQuery {
    pub days: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct HoursQuery {
    pub hours: Option<u32>,
}

/// Maps a malformed query string to `VALID_003`.
pub(crate) fn query_param<T>(query: std::result::Result<Query<T>, QueryRejection>) -> Result<T> {
    query
        .map(|Query(q)| q)
        .map_err(|e| Error::invalid_parameter(e.body_text()))
}

fn outcome_of<T>(result: &Result<T>) -> AuditOutcome {
    match result {
        Ok(_) => AuditOutcome::Success,
        Err(e) if e.is_validation() => AuditOutcome::Invalid,
        Err(_) => AuditOutcome::Error,
    }
}

/// Records `entry` with the outcome of `result`, then hands the result back.
pub(crate) async fn audited<T>(
    state: &AppState,
    entry: AuditEntry,
    result: Result<T>,
) -> std::result::Result<T, ApiError> {
    let entry = match &result {
        Err(e) => {
            let mut details = match entry.details.clone() {
                Value::Object(map) => map,
                Value::Null => Map::new(),
                other => Map::from_iter([("request".to_string(), other)]),
            };
            details.insert("error".into(), json!(e.to_string()));
            entry.details(Value::Object(details))
        }
        Ok(_) => entry,
    };
    state.audit(entry.outcome(outcome_of(&result))).await;
    result.map_err(ApiError::from)
}

/// GET /analytics/global?days=N
pub async fn global(
    State(state): State<AppState>,
    admin: AdminContext,
    query: std::result::Result<Query<DaysQuery>, QueryRejection>,
) -> std::result::Result<Json<GlobalDashboard>, ApiError> {
    let today = Utc::now().date_naive();
    let query = query_param(query);
    let days = query.as_ref().ok().and_then(|q| q.days);
    let entry = admin
        .audit(actions::VIEW_GLOBAL)
        .details(json!({ "days": days }));

    let result = match query {
        Ok(q) => {
            state
                .dashboard()
                .global(q.days.unwrap_or(DEFAULT_DASHBOARD_DAYS), today)
                .await
        }
        Err(e) => Err(e),
    };
    audited(&state, entry, result).await.map(Json)
}

/// GET /analytics/venues/{id}?days=N
pub async fn venue(
    State(state): State<AppState>,
    admin: AdminContext,
    Path(venue_id): Path<i64>,
    query: std::result::Result<Query<DaysQuery>, QueryRejection>,
) -> std::result::Result<Json<EntityDashboard>, ApiError> {
    let today = Utc::now().date_naive();
    let query = query_param(query);
    let days = query.as_ref().ok().and_then(|q| q.days);
    let entry = admin
        .audit(actions::VIEW_VENUE)
        .target(format!("venue:{venue_id}"))
        .details(json!({ "venue_id": venue_id, "days": days }));

    let result = match query {
        Ok(q) => {
            state
                .dashboard()
                .venue(venue_id, q.days.unwrap_or(DEFAULT_DASHBOARD_DAYS), today)
                .await
        }
        Err(e) => Err(e),
    };
    audited(&state, entry, result).await.map(Json)
}

/// GET /analytics/content/{id}
pub async fn content(
    State(state): State<AppState>,
    admin: AdminContext,
    Path(content_id): Path<i64>,
) -> std::result::Result<Json<EntityDashboard>, ApiError> {
    let today = Utc::now().date_naive();
    let entry = admin
        .audit(actions::VIEW_CONTENT)
        .target(format!("content:{content_id}"))
        .details(json!({ "content_id": content_id }));

    let result = state.dashboard().content(content_id, today).await;
    audited(&state, entry, result).await.map(Json)
}

/// GET /analytics/performance?hours=N
pub async fn performance(
    State(state): State<AppState>,
    admin: AdminContext,
    query: std::result::Result<Query<HoursQuery>, QueryRejection>,
) -> std::result::Result<Json<PerformanceDashboard>, ApiError> {
    let query = query_param(query);
    let hours = query.as_ref().ok().and_then(|q| q.hours);
    let entry = admin
        .audit(actions::VIEW_PERFORMANCE)
        .details(json!({ "hours": hours }));

    let result = match query {
        Ok(q) => {
            state
                .dashboard()
                .performance(q.hours.unwrap_or(DEFAULT_PERFORMANCE_HOURS), Utc::now())
                .await
        }
        Err(e) => Err(e),
    };
    audited(&state, entry, result).await.map(Json)
}

/// GET /analytics/realtime
pub async fn realtime(
    State(state): State<AppState>,
    admin: AdminContext,
) -> std::result::Result<Json<RealtimeSnapshot>, ApiError> {
    let entry = admin.audit(actions::VIEW_REALTIME);
    let result = state.realtime().snapshot(Utc::now()).await;
    audited(&state, entry, result).await.map(Json)
}

fn header_value(value: impl ToString) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).unwrap_or_else(|_| HeaderValue::from_static(""))
}

/// POST /analytics/export
///
/// Streams CSV. Validation and the row count happen before the first byte,
/// so an invalid range produces an error body and no file.
pub async fn export(
    State(state): State<AppState>,
    admin: AdminContext,
    body: Bytes,
) -> std::result::Result<Response, ApiError> {
    let service = state.exporter();
    let mut entry = admin.audit(actions::EXPORT);
    let parsed: Result<ExportRequest> = serde_json::from_slice(&body)
        .map_err(|e| Error::validation(format!("Invalid export request: {e}")));

    let prepared = match parsed {
        Ok(request) => {
            let prepared = service.prepare(&request).await;
            let mut details = request.audit_details();
            if let (Ok(prepared), Some(map)) = (&prepared, details.as_object_mut()) {
                map.insert("rows".into(), json!(prepared.rows()));
                map.insert("truncated".into(), json!(prepared.truncated));
            }
            entry = entry.target(request.export_type).details(details);
            prepared
        }
        Err(e) => Err(e),
    };
    let prepared = audited(&state, entry, prepared).await?;

    if prepared.truncated {
        warn!(
            actor = admin.actor(),
            matching_rows = prepared.matching_rows,
            row_limit = prepared.row_limit,
            "Export exceeds row limit"
        );
    }
    info!(
        actor = admin.actor(),
        export_type = %prepared.export.export_type,
        rows = prepared.rows(),
        "Streaming export"
    );

    let disposition = format!("attachment; filename={}", prepared.filename());
    let headers = [
        (header::CONTENT_TYPE, HeaderValue::from_static("text/csv; charset=utf-8")),
        (header::CONTENT_DISPOSITION, header_value(disposition)),
        (
            header::HeaderName::from_static(EXPORT_TRUNCATED_HEADER),
            header_value(prepared.truncated),
        ),
        (
            header::HeaderName::from_static(EXPORT_ROW_LIMIT_HEADER),
            header_value(prepared.row_limit),
        ),
    ];
    let body = Body::from_stream(service.stream(prepared));
    Ok((StatusCode::OK, headers, body).into_response())
}
