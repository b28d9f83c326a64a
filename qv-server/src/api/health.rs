//! Health and metrics endpoints

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::db::{messages, projects, users};
use crate::{ApiResult, AppState};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: i64,
}

/// GET /health, GET /api/health
///
/// No authentication.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "quickvibe".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
    })
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub uptime_seconds: i64,
    pub requests_total: u64,
    pub active_streams: u64,
    pub users: i64,
    pub projects: i64,
    pub messages: i64,
}

/// GET /api/metrics
pub async fn metrics(State(state): State<AppState>) -> ApiResult<Json<MetricsResponse>> {
    Ok(Json(MetricsResponse {
        uptime_seconds: state.uptime_seconds(),
        requests_total: state.metrics.requests_total(),
        active_streams: state.metrics.active_streams(),
        users: users::count_users(&state.db).await?,
        projects: projects::count_projects(&state.db).await?,
        messages: messages::count_messages(&state.db).await?,
    }))
}

/// Request counting middleware
pub async fn count_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    state.metrics.record_request();
    next.run(request).await
}

pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/health", get(health_check))
        .route("/api/metrics", get(metrics))
}
