//! HTTP API handlers for qv-server

pub mod agents;
pub mod auth;
pub mod collaboration;
pub mod discover;
pub mod files;
pub mod generation;
pub mod health;
pub mod orchestrate;
pub mod projects;
pub mod settings;
pub mod sse;
pub mod title;

pub use agents::agent_routes;
pub use auth::{auth_routes, CurrentUser, MaybeUser};
pub use collaboration::collaboration_routes;
pub use discover::discover_routes;
pub use files::file_routes;
pub use generation::generation_routes;
pub use health::{count_requests, health_routes};
pub use orchestrate::orchestrate_routes;
pub use projects::project_routes;
pub use settings::settings_routes;
pub use sse::event_routes;
pub use title::title_routes;

use qv_common::db::{Project, User};

use crate::db::projects::{access_for, get_project, ProjectAccess};
use crate::{ApiError, ApiResult, AppState};

/// Load a project the caller may read: 404 when missing, 403 without access
pub(crate) async fn load_readable(
    state: &AppState,
    project_id: &str,
    user: Option<&User>,
) -> ApiResult<(Project, ProjectAccess)> {
    let (project, access) = load_with_access(state, project_id, user).await?;
    if !access.can_read() {
        return Err(ApiError::Forbidden("You do not have access to this project".to_string()));
    }
    Ok((project, access))
}

/// Load a project the caller may edit (owner or EDITOR)
pub(crate) async fn load_editable(
    state: &AppState,
    project_id: &str,
    user: &User,
) -> ApiResult<(Project, ProjectAccess)> {
    let (project, access) = load_with_access(state, project_id, Some(user)).await?;
    if !access.can_edit() {
        return Err(ApiError::Forbidden("You cannot edit this project".to_string()));
    }
    Ok((project, access))
}

/// Load a project the caller owns
pub(crate) async fn load_owned(state: &AppState, project_id: &str, user: &User) -> ApiResult<Project> {
    let (project, access) = load_with_access(state, project_id, Some(user)).await?;
    if !access.is_owner() {
        return Err(ApiError::Forbidden("Only the project owner can do this".to_string()));
    }
    Ok(project)
}

async fn load_with_access(
    state: &AppState,
    project_id: &str,
    user: Option<&User>,
) -> ApiResult<(Project, ProjectAccess)> {
    let project = get_project(&state.db, project_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Project {} not found", project_id)))?;
    let access = access_for(&state.db, &project, user.map(|u| u.id.as_str())).await?;
    Ok((project, access))
}
