//! Streamed code generation
//!
//! `POST /api/agent/stream` answers with `text/event-stream`:
//! `start`, then `delta` per text chunk, then `done` (or `error`).
//! Failures before the upstream stream opens are regular JSON errors.
//!
//! The upstream reply is consumed on its own task, so a client that goes
//! away mid-stream is still charged and the exchange is still saved.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use chrono::Utc;
use futures::StreamExt;
use qv_common::db::{MessageRole, User};
use qv_common::events::QvEvent;
use qv_common::sse::json_event;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{load_editable, CurrentUser};
use crate::db::{messages, projects, users};
use crate::services::agents::find_agent;
use crate::services::code_extract::extract_code;
use crate::services::llm::{LlmMessage, LlmRequest, LlmRole, LlmStream, StreamEvent, Usage};
use crate::services::prompts::generation_system_prompt;
use crate::{ApiError, ApiResult, AppState};

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub project_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct DonePayload {
    message_id: Option<String>,
    code: Option<String>,
    usage: Usage,
}

/// Reject callers with nothing left to spend
pub(crate) fn ensure_balance(user: &User) -> ApiResult<()> {
    if user.token_balance <= 0 {
        return Err(ApiError::PaymentRequired(
            "Token balance exhausted".to_string(),
        ));
    }
    Ok(())
}

/// Conversation for the LLM plus the latest user prompt
///
/// `messages` wins over `prompt`; `system` entries are dropped since the
/// system prompt is built server-side.
fn conversation(req: &GenerateRequest) -> ApiResult<(Vec<LlmMessage>, String)> {
    let mut conversation = Vec::new();
    for m in &req.messages {
        match m.role.as_str() {
            "user" => conversation.push(LlmMessage::user(m.content.clone())),
            "assistant" => conversation.push(LlmMessage::assistant(m.content.clone())),
            "system" => {}
            other => {
                return Err(ApiError::BadRequest(format!("Invalid message role: {}", other)));
            }
        }
    }

    if conversation.is_empty() {
        if let Some(prompt) = req.prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            conversation.push(LlmMessage::user(prompt));
        }
    }

    let prompt = conversation
        .iter()
        .rev()
        .find(|m| m.role == LlmRole::User)
        .map(|m| m.content.clone())
        .ok_or_else(|| ApiError::BadRequest("A prompt or at least one user message is required".to_string()))?;

    Ok((conversation, prompt))
}

/// Saturating conversion for token counts
pub(crate) fn token_cost(usage: &Usage) -> i64 {
    i64::try_from(usage.total()).unwrap_or(i64::MAX)
}

/// POST /api/agent/stream
pub async fn stream(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<GenerateRequest>,
) -> ApiResult<impl IntoResponse> {
    let (conversation, prompt) = conversation(&req)?;
    state.rate_limiter.check(&user.id)?;
    ensure_balance(&user)?;

    if let Some(project_id) = &req.project_id {
        load_editable(&state, project_id, &user).await?;
    }

    let agent = req.agent_id.as_deref().and_then(find_agent);
    let request = LlmRequest {
        system: Some(generation_system_prompt(agent, req.project_type.as_deref())),
        messages: conversation,
        max_tokens: None,
    };

    let upstream = state.llm.stream(&request).await?;
    let model = state.llm.model().to_string();
    info!(user_id = %user.id, project_id = ?req.project_id, model = %model, "Generation started");

    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
    let _ = tx.send(json_event("start", &json!({ "model": model }))).await;
    tokio::spawn(run_generation(
        state.clone(),
        user.id.clone(),
        req.project_id.clone(),
        prompt,
        upstream,
        tx,
    ));

    let active = state.metrics.stream_started();
    let events = async_stream::stream! {
        let _active = active;
        while let Some(event) = rx.recv().await {
            yield Ok::<Event, Infallible>(event);
        }
    };

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Drain the upstream reply, then charge and save
///
/// Send failures only mean the client left; the reply is still drained.
async fn run_generation(
    state: AppState,
    user_id: String,
    project_id: Option<String>,
    prompt: String,
    mut upstream: LlmStream,
    tx: mpsc::Sender<Event>,
) {
    let mut text = String::new();
    let mut usage = Usage::default();

    while let Some(item) = upstream.next().await {
        match item {
            Ok(StreamEvent::Start { input_tokens }) => usage.input_tokens = input_tokens,
            Ok(StreamEvent::Text(chunk)) => {
                text.push_str(&chunk);
                let _ = tx.send(json_event("delta", &json!({ "text": chunk }))).await;
            }
            Ok(StreamEvent::Usage { output_tokens, stop_reason }) => {
                usage.output_tokens = output_tokens;
                debug!(stop_reason = ?stop_reason, "Generation usage received");
            }
            Ok(StreamEvent::Done) => break,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Generation stream failed");
                charge(&state, &user_id, &usage).await;
                let _ = tx.send(json_event("error", &json!({ "message": e.to_string() }))).await;
                return;
            }
        }
    }

    if tx.is_closed() {
        info!(user_id = %user_id, "Client disconnected during generation");
    }

    charge(&state, &user_id, &usage).await;

    let code = extract_code(&text);
    let mut message_id = None;

    if let Some(project_id) = &project_id {
        match persist(&state, project_id, &prompt, &text, code.as_deref()).await {
            Ok(id) => {
                message_id = Some(id);
                state.event_bus.emit_lossy(QvEvent::ProjectSaved {
                    project_id: project_id.clone(),
                    user_id: user_id.clone(),
                    created: false,
                    timestamp: Utc::now(),
                });
            }
            Err(e) => {
                warn!(project_id = %project_id, error = %e, "Saving generation failed");
                let message = format!("Failed to save generation: {}", e);
                let _ = tx.send(json_event("error", &json!({ "message": message }))).await;
                return;
            }
        }
    }

    info!(user_id = %user_id, tokens = usage.total(), "Generation finished");
    let _ = tx.send(json_event("done", &DonePayload { message_id, code, usage })).await;
}

/// Append the exchange and replace the project's code; returns the assistant message id
async fn persist(
    state: &AppState,
    project_id: &str,
    prompt: &str,
    reply: &str,
    code: Option<&str>,
) -> qv_common::Result<String> {
    let ids = messages::append_messages(
        &state.db,
        project_id,
        &[(MessageRole::User, prompt), (MessageRole::Assistant, reply)],
    )
    .await?;

    if let Some(code) = code {
        projects::set_current_code(&state.db, project_id, code).await?;
    }

    ids.last()
        .cloned()
        .ok_or_else(|| qv_common::Error::Internal("No message ids returned".to_string()))
}

/// Deduct spent tokens, floored at zero; failures are logged only
pub(crate) async fn charge(state: &AppState, user_id: &str, usage: &Usage) {
    if usage.total() == 0 {
        return;
    }
    match users::deduct_tokens(&state.db, user_id, token_cost(usage)).await {
        Ok(balance) => debug!(user_id, balance, "Token balance updated"),
        Err(e) => warn!(user_id, error = %e, "Failed to deduct tokens"),
    }
}

pub fn generation_routes() -> Router<AppState> {
    Router::new().route("/api/agent/stream", post(stream))
}
