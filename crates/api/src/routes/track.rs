//! Public tracking endpoints.
//!
//! Every handler runs behind the public rate limiter. A request that passes
//! validation always gets `200`; whether the write landed is reported in
//! `tracked`, never as an error.

use analytics_core::{
    to_millis, EventSubmission, FavoriteSubmission, SearchSubmission, ShareSubmission,
};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderName, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::extractors::{Client, RequestSession};
use crate::response::{ApiError, TrackResponse};
use crate::services::CollectOutcome;
use crate::state::AppState;

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        debug!(error = %e, "Rejected tracking payload");
        ApiError::bad_request(format!("Invalid JSON payload: {e}"))
    })
}

/// Lower-case form of [`crate::extractors::SESSION_HEADER`].
const SESSION_RESPONSE_HEADER: &str = "x-session-id";

/// Echoes the effective session token so clients can persist a minted one.
fn track_response(outcome: CollectOutcome, timestamp: i64) -> Response {
    let mut response = Json(TrackResponse::from_outcome(&outcome, timestamp)).into_response();
    if let Ok(value) = HeaderValue::from_str(&outcome.session_token) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(SESSION_RESPONSE_HEADER), value);
    }
    response
}

/// POST /track/event
pub async fn track_event(
    State(state): State<AppState>,
    Client(client): Client,
    RequestSession(token): RequestSession,
    body: Bytes,
) -> Result<Response, ApiError> {
    let now = Utc::now();
    let submission: EventSubmission = parse_body(&body)?;
    let event = submission.into_new_event()?;
    let outcome = state.collector().collect(event, &client, &token, now).await?;
    Ok(track_response(outcome, to_millis(now)))
}

/// POST /track/search
pub async fn track_search(
    State(state): State<AppState>,
    Client(client): Client,
    RequestSession(token): RequestSession,
    body: Bytes,
) -> Result<Response, ApiError> {
    let now = Utc::now();
    let submission: SearchSubmission = parse_body(&body)?;
    let outcome = state
        .collector()
        .collect_search(submission, &client, &token, now)
        .await?;
    Ok(track_response(outcome, to_millis(now)))
}

/// POST /track/share
pub async fn track_share(
    State(state): State<AppState>,
    Client(client): Client,
    RequestSession(token): RequestSession,
    body: Bytes,
) -> Result<Response, ApiError> {
    let now = Utc::now();
    let submission: ShareSubmission = parse_body(&body)?;
    let event = submission.into_new_event()?;
    let outcome = state.collector().collect(event, &client, &token, now).await?;
    Ok(track_response(outcome, to_millis(now)))
}

/// POST /track/favorite
pub async fn track_favorite(
    State(state): State<AppState>,
    Client(client): Client,
    RequestSession(token): RequestSession,
    body: Bytes,
) -> Result<Response, ApiError> {
    let now = Utc::now();
    let submission: FavoriteSubmission = parse_body(&body)?;
    let event = submission.into_new_event()?;
    let outcome = state.collector().collect(event, &client, &token, now).await?;
    Ok(track_response(outcome, to_millis(now)))
}
