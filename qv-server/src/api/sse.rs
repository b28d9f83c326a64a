//! Server-wide event stream

use axum::{extract::State, response::IntoResponse, routing::get, Router};
use qv_common::sse::user_event_stream;

use super::CurrentUser;
use crate::AppState;

/// GET /api/events
///
/// The caller's project and orchestration events, with heartbeat.
pub async fn event_stream(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> impl IntoResponse {
    user_event_stream(&state.event_bus, user.id)
}

pub fn event_routes() -> Router<AppState> {
    Router::new().route("/api/events", get(event_stream))
}
