//! Multi-agent orchestration over SSE
//!
//! The run executes on its own task and reports through an mpsc channel.
//! Dropping the response stream (client disconnect) cancels the run. Tokens
//! spent before a failure or cancellation are still charged.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use qv_common::db::MessageRole;
use qv_common::events::QvEvent;
use qv_common::sse::json_event;
use serde::Deserialize;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::generation::{charge, ensure_balance};
use super::{load_editable, CurrentUser};
use crate::db::{messages, projects};
use crate::services::agents::{find_agent, select_agents, DEFAULT_MAX_AGENTS};
use crate::services::orchestrator::{
    clamp_max_parallel, plan_tasks, OrchestrationOutcome, Orchestrator,
};
use crate::{ApiError, ApiResult, AppState};

const EVENT_BUFFER: usize = 32;

#[derive(Debug, Deserialize)]
pub struct OrchestrateRequest {
    pub prompt: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub agents: Option<Vec<String>>,
    #[serde(default)]
    pub max_parallel: Option<usize>,
    #[serde(default)]
    pub project_type: Option<String>,
}

/// Requested agent ids, validated and without repeats
fn requested_agents(ids: &[String]) -> ApiResult<Vec<&'static str>> {
    let mut agents: Vec<&'static str> = Vec::new();
    for id in ids {
        let agent = find_agent(id.trim())
            .ok_or_else(|| ApiError::BadRequest(format!("Unknown agent: {}", id)))?;
        if !agents.contains(&agent.id) {
            agents.push(agent.id);
        }
    }
    Ok(agents)
}

/// POST /api/agent/orchestrate
pub async fn orchestrate(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<OrchestrateRequest>,
) -> ApiResult<impl IntoResponse> {
    let prompt = req.prompt.trim().to_string();
    if prompt.is_empty() {
        return Err(ApiError::BadRequest("Prompt is required".to_string()));
    }
    state.rate_limiter.check(&user.id)?;
    ensure_balance(&user)?;

    if let Some(project_id) = &req.project_id {
        load_editable(&state, project_id, &user).await?;
    }

    let agents = match req.agents.as_deref().filter(|ids| !ids.is_empty()) {
        Some(ids) => requested_agents(ids)?,
        None => {
            let selection = select_agents(
                state.llm.as_ref(),
                &prompt,
                req.project_type.as_deref(),
                DEFAULT_MAX_AGENTS,
            )
            .await;
            charge(&state, &user.id, &selection.usage).await;
            selection.agents
        }
    };

    let tasks = plan_tasks(&agents, clamp_max_parallel(req.max_parallel));
    let run_id = Uuid::new_v4().to_string();
    info!(run_id = %run_id, user_id = %user.id, agents = ?agents, "Orchestration started");

    state.event_bus.emit_lossy(QvEvent::OrchestrationStarted {
        run_id: run_id.clone(),
        user_id: user.id.clone(),
        task_count: tasks.len(),
        timestamp: Utc::now(),
    });

    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);

    let run_state = state.clone();
    let run_cancel = cancel.clone();
    let project_id = req.project_id.clone();
    let user_id = user.id.clone();
    tokio::spawn(async move {
        let orchestrator = Orchestrator::new(run_state.llm.clone(), run_state.config.max_tokens);
        let (result, usage) = orchestrator.run(&run_id, &prompt, tasks, &run_cancel, &tx).await;
        charge(&run_state, &user_id, &usage).await;

        let success = match result {
            Ok(outcome) => {
                if let Some(project_id) = &project_id {
                    store_outcome(&run_state, project_id, &user_id, &outcome).await;
                }
                true
            }
            Err(_) => false,
        };

        run_state.event_bus.emit_lossy(QvEvent::OrchestrationFinished {
            run_id,
            user_id,
            success,
            timestamp: Utc::now(),
        });
    });

    let guard = cancel.drop_guard();
    let active = state.metrics.stream_started();
    let events = async_stream::stream! {
        let _guard = guard;
        let _active = active;
        while let Some(event) = rx.recv().await {
            yield Ok::<Event, Infallible>(json_event(event.name(), &event));
        }
    };

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn store_outcome(state: &AppState, project_id: &str, user_id: &str, outcome: &OrchestrationOutcome) {
    let stored = async {
        projects::set_current_code(&state.db, project_id, &outcome.code).await?;
        messages::append_messages(
            &state.db,
            project_id,
            &[(MessageRole::Assistant, outcome.summary.as_str())],
        )
        .await
    }
    .await;

    match stored {
        Ok(_) => state.event_bus.emit_lossy(QvEvent::ProjectSaved {
            project_id: project_id.to_string(),
            user_id: user_id.to_string(),
            created: false,
            timestamp: Utc::now(),
        }),
        Err(e) => warn!(project_id, error = %e, "Failed to store orchestration result"),
    }
}

pub fn orchestrate_routes() -> Router<AppState> {
    Router::new().route("/api/agent/orchestrate", post(orchestrate))
}
