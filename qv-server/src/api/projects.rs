//! Project endpoints: save, load, list, update, delete, message paging

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use qv_common::db::{Message, MessageRole, Project, ProjectFile, ProjectSummary, Visibility};
use qv_common::events::QvEvent;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tracing::info;

use super::{load_editable, load_owned, load_readable, CurrentUser, MaybeUser};
use crate::db::files::list_files;
use crate::db::messages::messages_after;
use crate::db::projects::{
    delete_project, list_projects, save_project, update_project, ListScope, NewMessage,
    ProjectUpdate, SaveOutcome, SaveProject,
};
use crate::pagination::{clamp_limit, parse_cursor, Cursor, Page};
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct MessageInput {
    #[serde(default)]
    pub id: Option<String>,
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct SaveProjectRequest {
    #[serde(default)]
    pub project_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_project_type")]
    pub project_type: String,
    #[serde(default)]
    pub active_agents: Vec<String>,
    #[serde(default)]
    pub messages: Vec<MessageInput>,
    #[serde(default)]
    pub current_code: Option<String>,
    #[serde(default)]
    pub visibility: Option<String>,
}

fn default_project_type() -> String {
    "web".to_string()
}

#[derive(Debug, Serialize)]
pub struct SaveProjectResponse {
    pub project_id: String,
    pub created: bool,
}

/// Project with its first message page and files
#[derive(Debug, Serialize)]
pub struct ProjectDetail {
    pub project: Project,
    pub messages: Page<Message>,
    pub files: Vec<ProjectFile>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LoadRequest {
    pub id: String,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub visibility: Option<String>,
    pub current_code: Option<String>,
    pub active_agents: Option<Vec<String>>,
}

fn parse_visibility(raw: Option<&str>) -> ApiResult<Option<Visibility>> {
    raw.map(|v| v.parse::<Visibility>()).transpose().map_err(ApiError::from)
}

/// One page of a project's messages, oldest first
pub async fn message_page(
    db: &SqlitePool,
    project_id: &str,
    cursor: Option<&str>,
    limit: Option<i64>,
) -> ApiResult<Page<Message>> {
    let limit = clamp_limit(limit);
    let after = parse_cursor(cursor)?.map(|c| c.int_key()).transpose()?;

    let rows = messages_after(db, project_id, after, limit + 1).await?;
    Ok(Page::from_rows(rows, limit, |m| Cursor::new(m.position, m.id.clone())))
}

async fn project_detail(state: &AppState, project: Project, limit: Option<i64>) -> ApiResult<ProjectDetail> {
    let messages = message_page(&state.db, &project.id, None, limit).await?;
    let files = list_files(&state.db, &project.id).await?;
    Ok(ProjectDetail {
        project,
        messages,
        files,
    })
}

/// POST /api/projects/save
///
/// Creates the project, or updates it and replaces its messages when
/// `project_id` names an existing project the caller can edit.
pub async fn save(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<SaveProjectRequest>,
) -> ApiResult<(StatusCode, Json<SaveProjectResponse>)> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("Project name is required".to_string()));
    }

    let messages = req
        .messages
        .into_iter()
        .map(|m| -> ApiResult<NewMessage> {
            let role = m.role.parse::<MessageRole>()?;
            Ok(NewMessage {
                id: m.id,
                role,
                content: m.content,
            })
        })
        .collect::<ApiResult<Vec<_>>>()?;

    let save = SaveProject {
        project_id: req.project_id.filter(|id| !id.trim().is_empty()),
        name: name.to_string(),
        description: req.description,
        project_type: req.project_type,
        active_agents: req.active_agents,
        messages,
        current_code: req.current_code,
        visibility: parse_visibility(req.visibility.as_deref())?,
    };

    let (project_id, created) = match save_project(&state.db, &user.id, &save).await? {
        SaveOutcome::Created(id) => (id, true),
        SaveOutcome::Updated(id) => (id, false),
        SaveOutcome::Forbidden => {
            return Err(ApiError::Forbidden("You cannot edit this project".to_string()))
        }
    };

    info!(project_id = %project_id, user_id = %user.id, created, "Project saved");
    state.event_bus.emit_lossy(QvEvent::ProjectSaved {
        project_id: project_id.clone(),
        user_id: user.id.clone(),
        created,
        timestamp: Utc::now(),
    });

    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(SaveProjectResponse { project_id, created })))
}

/// GET /api/projects/:id
pub async fn get_one(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<ProjectDetail>> {
    let (project, _) = load_readable(&state, &id, user.as_ref()).await?;
    Ok(Json(project_detail(&state, project, query.limit).await?))
}

/// POST /api/projects/load
pub async fn load(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Json(req): Json<LoadRequest>,
) -> ApiResult<Json<ProjectDetail>> {
    let (project, _) = load_readable(&state, &req.id, user.as_ref()).await?;
    Ok(Json(project_detail(&state, project, req.limit).await?))
}

/// GET /api/projects/:id/messages?cursor=&limit=
pub async fn messages(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<Message>>> {
    load_readable(&state, &id, user.as_ref()).await?;
    let page = message_page(&state.db, &id, query.cursor.as_deref(), query.limit).await?;
    Ok(Json(page))
}

/// GET /api/projects/list?scope=owned|shared|all
pub async fn list(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Value>> {
    let scope = match query.scope.as_deref() {
        Some(raw) => raw.parse::<ListScope>()?,
        None => ListScope::Owned,
    };
    let projects: Vec<ProjectSummary> = list_projects(&state.db, &user.id, scope).await?;
    Ok(Json(json!({ "total": projects.len(), "projects": projects })))
}

/// PUT /api/projects/:id
///
/// Editors may change content; visibility is owner-only.
pub async fn update(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateProjectRequest>,
) -> ApiResult<Json<Project>> {
    let (_, access) = load_editable(&state, &id, &user).await?;

    let visibility = parse_visibility(req.visibility.as_deref())?;
    if visibility.is_some() && !access.is_owner() {
        return Err(ApiError::Forbidden("Only the owner can change visibility".to_string()));
    }
    if let Some(name) = &req.name {
        if name.trim().is_empty() {
            return Err(ApiError::BadRequest("Project name cannot be empty".to_string()));
        }
    }

    let patch = ProjectUpdate {
        name: req.name.map(|n| n.trim().to_string()),
        description: req.description,
        visibility,
        current_code: req.current_code,
        active_agents: req.active_agents,
    };
    if !update_project(&state.db, &id, &patch).await? {
        return Err(ApiError::NotFound(format!("Project {} not found", id)));
    }

    state.event_bus.emit_lossy(QvEvent::ProjectSaved {
        project_id: id.clone(),
        user_id: user.id.clone(),
        created: false,
        timestamp: Utc::now(),
    });

    let (project, _) = load_readable(&state, &id, Some(&user)).await?;
    Ok(Json(project))
}

/// DELETE /api/projects/:id (owner only)
pub async fn delete(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    load_owned(&state, &id, &user).await?;
    if !delete_project(&state.db, &id).await? {
        return Err(ApiError::NotFound(format!("Project {} not found", id)));
    }

    info!(project_id = %id, "Project deleted");
    state.event_bus.emit_lossy(QvEvent::ProjectDeleted {
        project_id: id.clone(),
        user_id: user.id.clone(),
        timestamp: Utc::now(),
    });

    Ok(Json(json!({ "success": true, "project_id": id })))
}

pub fn project_routes() -> Router<AppState> {
    Router::new()
        .route("/api/projects/save", post(save))
        .route("/api/projects/load", post(load))
        .route("/api/projects/list", get(list))
        .route("/api/projects/:id", get(get_one).put(update).delete(delete))
        .route("/api/projects/:id/messages", get(messages))
}
