//! Response time sampling.

use std::time::Instant;

use analytics_core::PerformanceSample;
use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use serde_json::json;
use tracing::debug;

use crate::state::AppState;

pub const RESPONSE_TIME_METRIC: &str = "response_time";

/// Records a `response_time` sample (seconds) for every routed request.
///
/// The write is spawned so a slow store never delays the response.
pub async fn record_response_time(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let response = next.run(request).await;

    let elapsed = started.elapsed().as_secs_f64();
    let sample = PerformanceSample::new(RESPONSE_TIME_METRIC, elapsed, Utc::now()).with_metadata(json!({
        "endpoint": endpoint,
        "method": method,
        "status_code": response.status().as_u16(),
    }));

    let writer = state.writer.clone();
    tokio::spawn(async move {
        if let Err(e) = writer.insert_sample(&sample).await {
            debug!(error = %e, "Dropped response time sample");
        }
    });

    response
}
