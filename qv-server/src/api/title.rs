//! Project title generation

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use super::CurrentUser;
use crate::services::title::generate_title;
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct TitleRequest {
    pub prompt: String,
}

/// POST /api/projects/title (rate limited)
pub async fn title(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<TitleRequest>,
) -> ApiResult<Json<Value>> {
    if req.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("Prompt is required".to_string()));
    }
    state.rate_limiter.check(&user.id)?;

    let title = generate_title(state.llm.as_ref(), &req.prompt).await;
    Ok(Json(json!({ "title": title })))
}

pub fn title_routes() -> Router<AppState> {
    Router::new().route("/api/projects/title", post(title))
}
