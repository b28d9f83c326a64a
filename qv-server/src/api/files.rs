//! Project file endpoints

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use qv_common::db::ProjectFile;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{load_editable, load_readable, CurrentUser, MaybeUser};
use crate::db::files::{delete_file, infer_language, list_files, upsert_file, validate_path};
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct PutFileRequest {
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub language: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FilePathQuery {
    pub path: String,
}

/// GET /api/projects/:id/files
pub async fn list(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    load_readable(&state, &id, user.as_ref()).await?;
    let files = list_files(&state.db, &id).await?;
    Ok(Json(json!({ "files": files })))
}

/// PUT /api/projects/:id/files
pub async fn put(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<PutFileRequest>,
) -> ApiResult<Json<ProjectFile>> {
    load_editable(&state, &id, &user).await?;
    validate_path(&req.path)?;

    let language = req
        .language
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .unwrap_or_else(|| infer_language(&req.path));

    let file = upsert_file(&state.db, &id, &req.path, &req.content, language).await?;
    debug!(project_id = %id, path = %file.path, "File saved");
    Ok(Json(file))
}

/// DELETE /api/projects/:id/files?path=
pub async fn delete(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Query(query): Query<FilePathQuery>,
) -> ApiResult<Json<Value>> {
    load_editable(&state, &id, &user).await?;
    if !delete_file(&state.db, &id, &query.path).await? {
        return Err(ApiError::NotFound(format!("File {} not found", query.path)));
    }
    Ok(Json(json!({ "success": true })))
}

pub fn file_routes() -> Router<AppState> {
    Router::new().route("/api/projects/:id/files", get(list).put(put).delete(delete))
}
