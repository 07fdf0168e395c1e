//! Operator endpoints: aggregation control, retention purge, audit log.

use analytics_core::{
    actions, limits::MAX_AUDIT_LIMIT, AuditRecord, Error, PurgeReport, Result, EXPORT_DATE_FORMAT,
};
use analytics_store::{AggregationRun, RollupStore};
use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use worker::AggregationOutcome;

use crate::extractors::AdminContext;
use crate::response::ApiError;
use crate::routes::analytics::{audited, query_param};
use crate::state::AppState;

const RECENT_RUNS_LIMIT: u32 = 14;
const DEFAULT_AUDIT_LIMIT: u32 = 100;

#[derive(Debug, Serialize)]
pub struct AggregationStatus {
    pub outstanding_failures: u64,
    pub running: Vec<NaiveDate>,
    pub recent_runs: Vec<AggregationRun>,
}

#[derive(Debug, Deserialize)]
pub struct RunAggregationRequest {
    /// `YYYY-MM-DD`; defaults to yesterday.
    pub date: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunAggregationResponse {
    pub date: NaiveDate,
    #[serde(flatten)]
    pub outcome: AggregationOutcome,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<u32>,
}

async fn aggregation_status(state: &AppState) -> Result<AggregationStatus> {
    let recent_runs = state.store.recent_runs(RECENT_RUNS_LIMIT).await?;
    let running = recent_runs
        .iter()
        .map(|run| run.date)
        .filter(|date| state.aggregator.is_running(*date))
        .collect();
    Ok(AggregationStatus {
        outstanding_failures: state.store.outstanding_failures().await?,
        running,
        recent_runs,
    })
}

/// GET /analytics/aggregation/status
pub async fn status(
    State(state): State<AppState>,
    admin: AdminContext,
) -> std::result::Result<Json<AggregationStatus>, ApiError> {
    let entry = admin.audit(actions::VIEW_AGGREGATION);
    let result = aggregation_status(&state).await;
    audited(&state, entry, result).await.map(Json)
}

fn parse_run_date(body: &Bytes) -> Result<NaiveDate> {
    let request: RunAggregationRequest = if body.is_empty() {
        RunAggregationRequest { date: None }
    } else {
        serde_json::from_slice(body)
            .map_err(|e| Error::validation(format!("Invalid aggregation request: {e}")))?
    };
    match request.date {
        Some(raw) => NaiveDate::parse_from_str(raw.trim(), EXPORT_DATE_FORMAT)
            .map_err(|_| Error::invalid_date_range(format!("date must be YYYY-MM-DD, got {raw:?}"))),
        None => Utc::now()
            .date_naive()
            .pred_opt()
            .ok_or_else(|| Error::internal("no date before today")),
    }
}

/// POST /analytics/aggregation/run
///
/// Re-derives the whole day, including a day already closed. A trigger for a
/// date whose run is in progress returns `already_running` and does nothing.
/// The current day and later dates are rejected because they are still open.
pub async fn run_aggregation(
    State(state): State<AppState>,
    admin: AdminContext,
    body: Bytes,
) -> std::result::Result<Json<RunAggregationResponse>, ApiError> {
    let date = parse_run_date(&body);
    let mut entry = admin.audit(actions::RUN_AGGREGATION);
    if let Ok(date) = &date {
        entry = entry.target(date.to_string()).details(json!({ "date": date }));
    }

    let result = match date {
        Ok(date) => {
            info!(actor = admin.actor(), %date, "Manual aggregation triggered");
            state
                .aggregator
                .run_for_date(date)
                .await
                .map(|outcome| RunAggregationResponse { date, outcome })
        }
        Err(e) => Err(e),
    };
    audited(&state, entry, result).await.map(Json)
}

/// POST /analytics/retention/purge
pub async fn purge_retention(
    State(state): State<AppState>,
    admin: AdminContext,
) -> std::result::Result<Json<PurgeReport>, ApiError> {
    let retention = state.retention();
    let entry = admin
        .audit(actions::PURGE_RETENTION)
        .details(json!({ "retention": retention.policy() }));
    let result = retention.run().await;
    if let Ok(report) = &result {
        info!(actor = admin.actor(), deleted = report.total(), "Retention purge executed");
    }
    audited(&state, entry, result).await.map(Json)
}

/// GET /analytics/audit?limit=N
pub async fn audit_log(
    State(state): State<AppState>,
    admin: AdminContext,
    query: std::result::Result<Query<AuditQuery>, QueryRejection>,
) -> std::result::Result<Json<Vec<AuditRecord>>, ApiError> {
    let result = match query_param(query) {
        Ok(q) => {
            let limit = q.limit.unwrap_or(DEFAULT_AUDIT_LIMIT);
            if limit == 0 || limit > MAX_AUDIT_LIMIT {
                Err(Error::invalid_parameter(format!(
                    "limit must be between 1 and {MAX_AUDIT_LIMIT}"
                )))
            } else {
                // read before recording this call so the caller sees prior entries only
                state.store.recent_audit(limit).await.map_err(Error::from)
            }
        }
        Err(e) => Err(e),
    };
    let entry = admin.audit(actions::VIEW_AUDIT);
    audited(&state, entry, result).await.map(Json)
}
