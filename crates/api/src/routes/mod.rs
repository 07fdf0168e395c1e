//! API routes.

pub mod admin;
pub mod analytics;
pub mod health;
pub mod track;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::middleware::{performance::record_response_time, rate_limit::limit_public};
use crate::state::AppState;

/// Public tracking routes, each charged to the caller's rate limit bucket.
fn track_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/track/event", post(track::track_event))
        .route("/track/search", post(track::track_search))
        .route("/track/share", post(track::track_share))
        .route("/track/favorite", post(track::track_favorite))
        .route_layer(middleware::from_fn_with_state(state.clone(), limit_public))
}

/// Admin-only routes; authentication happens in the `AdminContext` extractor.
fn analytics_routes() -> Router<AppState> {
    Router::new()
        .route("/analytics/global", get(analytics::global))
        .route("/analytics/venues/:id", get(analytics::venue))
        .route("/analytics/content/:id", get(analytics::content))
        .route("/analytics/performance", get(analytics::performance))
        .route("/analytics/realtime", get(analytics::realtime))
        .route("/analytics/export", post(analytics::export))
        .route("/analytics/aggregation/status", get(admin::status))
        .route("/analytics/aggregation/run", post(admin::run_aggregation))
        .route("/analytics/retention/purge", post(admin::purge_retention))
        .route("/analytics/audit", get(admin::audit_log))
}

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        .merge(track_routes(&state))
        .merge(analytics_routes())
        .route_layer(middleware::from_fn_with_state(state.clone(), record_response_time))
        .route("/health", get(health::health_handler))
        .route("/health/ready", get(health::ready_handler))
        .route("/health/live", get(health::live_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
