//! Agent catalog endpoints

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::generation::charge;
use super::CurrentUser;
use crate::services::agents::{clamp_max_agents, find_agent, select_agents, AGENTS};
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct SelectRequest {
    pub prompt: String,
    #[serde(default)]
    pub project_type: Option<String>,
    #[serde(default)]
    pub max: Option<usize>,
}

/// GET /api/agents/list
pub async fn list() -> Json<Value> {
    Json(json!({ "agents": AGENTS, "total": AGENTS.len() }))
}

/// GET /api/agents/:id
pub async fn get_one(Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let agent = find_agent(&id).ok_or_else(|| ApiError::NotFound(format!("Agent {} not found", id)))?;
    Ok(Json(json!({ "agent": agent })))
}

/// POST /api/agents/select (rate limited)
pub async fn select(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<SelectRequest>,
) -> ApiResult<Json<Value>> {
    if req.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("Prompt is required".to_string()));
    }
    state.rate_limiter.check(&user.id)?;

    let max = clamp_max_agents(req.max);
    let selection = select_agents(state.llm.as_ref(), &req.prompt, req.project_type.as_deref(), max).await;
    charge(&state, &user.id, &selection.usage).await;
    Ok(Json(json!({ "agents": selection.agents })))
}

pub fn agent_routes() -> Router<AppState> {
    Router::new()
        .route("/api/agents/list", get(list))
        .route("/api/agents/select", post(select))
        .route("/api/agents/:id", get(get_one))
}
