//! Collaborators and invites

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use qv_common::db::{CollaboratorRole, Invite};
use qv_common::events::QvEvent;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::auth::is_plausible_email;
use super::{load_owned, load_readable, CurrentUser};
use crate::db::collaborators::{
    accept_invite, create_invite, list_collaborators, list_pending_invites, remove_collaborator,
    revoke_invite, AcceptOutcome,
};
use crate::db::users::get_user;
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct InviteRequest {
    pub email: String,
    pub role: String,
}

/// POST /api/projects/:id/invites (owner)
pub async fn invite(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<InviteRequest>,
) -> ApiResult<(StatusCode, Json<Invite>)> {
    let project = load_owned(&state, &id, &user).await?;

    let email = req.email.trim();
    if !is_plausible_email(email) {
        return Err(ApiError::BadRequest("Invalid email address".to_string()));
    }
    let owner = get_user(&state.db, &project.user_id).await?;
    if owner.is_some_and(|o| o.email.eq_ignore_ascii_case(email)) {
        return Err(ApiError::BadRequest("You cannot invite the project owner".to_string()));
    }
    let role: CollaboratorRole = req.role.parse()?;

    let invite = create_invite(&state.db, &id, email, role, &user.id).await?;
    info!(project_id = %id, invite_id = %invite.id, "Invite created");
    Ok((StatusCode::CREATED, Json(invite)))
}

/// GET /api/projects/:id/invites (owner)
pub async fn list_invites(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    load_owned(&state, &id, &user).await?;
    let invites = list_pending_invites(&state.db, &id).await?;
    Ok(Json(json!({ "invites": invites })))
}

/// DELETE /api/projects/:id/invites/:invite_id (owner)
pub async fn revoke(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((id, invite_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    load_owned(&state, &id, &user).await?;
    if !revoke_invite(&state.db, &id, &invite_id).await? {
        return Err(ApiError::NotFound(format!("Pending invite {} not found", invite_id)));
    }
    Ok(Json(json!({ "success": true })))
}

/// POST /api/invites/:token/accept
pub async fn accept(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(token): Path<String>,
) -> ApiResult<Json<Value>> {
    let invite = match accept_invite(&state.db, &token, &user.id, &user.email).await? {
        AcceptOutcome::Accepted(invite) => invite,
        AcceptOutcome::EmailMismatch => {
            return Err(ApiError::Forbidden(
                "This invite was sent to a different email address".to_string(),
            ))
        }
    };

    info!(project_id = %invite.project_id, user_id = %user.id, "Invite accepted");
    state.event_bus.emit_lossy(QvEvent::CollaboratorJoined {
        project_id: invite.project_id.clone(),
        user_id: user.id.clone(),
        role: invite.role.clone(),
        timestamp: Utc::now(),
    });

    Ok(Json(json!({
        "project_id": invite.project_id,
        "role": invite.role,
    })))
}

/// GET /api/projects/:id/collaborators
pub async fn collaborators(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    load_readable(&state, &id, Some(&user)).await?;
    let collaborators = list_collaborators(&state.db, &id).await?;
    Ok(Json(json!({ "collaborators": collaborators })))
}

/// DELETE /api/projects/:id/collaborators/:user_id
///
/// The owner may remove anyone; a collaborator may remove themself.
pub async fn remove(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path((id, member_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let (project, _) = load_readable(&state, &id, Some(&user)).await?;
    if project.user_id != user.id && member_id != user.id {
        return Err(ApiError::Forbidden("Only the project owner can remove collaborators".to_string()));
    }

    if !remove_collaborator(&state.db, &id, &member_id).await? {
        return Err(ApiError::NotFound(format!("Collaborator {} not found", member_id)));
    }
    info!(project_id = %id, user_id = %member_id, "Collaborator removed");
    Ok(Json(json!({ "success": true })))
}

pub fn collaboration_routes() -> Router<AppState> {
    Router::new()
        .route("/api/projects/:id/invites", post(invite).get(list_invites))
        .route("/api/projects/:id/invites/:invite_id", delete(revoke))
        .route("/api/invites/:token/accept", post(accept))
        .route("/api/projects/:id/collaborators", get(collaborators))
        .route("/api/projects/:id/collaborators/:user_id", delete(remove))
}
