//! Accounts and bearer-token sessions
//!
//! Sessions are opaque `qvs_…` tokens stored in SQLite. With
//! `allow_local_user` enabled, requests without a token act as the built-in
//! local user (single-user desktop mode).

use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use qv_common::db::{User, LOCAL_USER_ID};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::db::{settings, users};
use crate::services::password::{hash_password, verify_password, MIN_PASSWORD_LEN};
use crate::{ApiError, ApiResult, AppState};

/// Authenticated caller; rejects with 401
pub struct CurrentUser(pub User);

/// Caller if authenticated; an invalid token is treated as anonymous
pub struct MaybeUser(pub Option<User>);

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(token) = bearer_token(&parts.headers) {
            return users::user_for_session(&state.db, token)
                .await?
                .map(CurrentUser)
                .ok_or_else(|| ApiError::Unauthorized("Invalid or expired session".to_string()));
        }

        if state.config.allow_local_user {
            if let Some(user) = users::get_user(&state.db, LOCAL_USER_ID).await? {
                return Ok(CurrentUser(user));
            }
        }

        Err(ApiError::Unauthorized("Authentication required".to_string()))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match CurrentUser::from_request_parts(parts, state).await {
            Ok(CurrentUser(user)) => Ok(MaybeUser(Some(user))),
            Err(ApiError::Unauthorized(_)) => Ok(MaybeUser(None)),
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SigninRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
}

/// Minimal shape check: something before `@`, and a dot after it
pub fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .find('.')
                    .map(|dot| dot > 0 && dot < domain.len() - 1)
                    .unwrap_or(false)
        }
        None => false,
    }
}

/// POST /api/auth/signup
pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let name = req.name.trim();
    let email = req.email.trim();

    if name.is_empty() || email.is_empty() || req.password.trim().is_empty() {
        return Err(ApiError::BadRequest("Name, email and password are required".to_string()));
    }
    if !is_plausible_email(email) {
        return Err(ApiError::BadRequest("Invalid email address".to_string()));
    }
    if req.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    let password_hash = hash_password(&req.password)?;
    let balance = settings::get_default_token_balance(&state.db).await?;
    let user = users::create_user(&state.db, name, email, &password_hash, balance).await?;
    let token = users::create_session(&state.db, &user.id, state.config.session_ttl_days).await?;

    info!(user_id = %user.id, "User signed up");
    Ok((StatusCode::CREATED, Json(AuthResponse { user, token })))
}

/// POST /api/auth/signin
pub async fn signin(
    State(state): State<AppState>,
    Json(req): Json<SigninRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let invalid = || ApiError::Unauthorized("Invalid email or password".to_string());

    let user = users::find_by_email(&state.db, req.email.trim())
        .await?
        .ok_or_else(invalid)?;
    if !verify_password(&req.password, &user.password_hash) {
        debug!(user_id = %user.id, "Sign-in rejected");
        return Err(invalid());
    }

    let token = users::create_session(&state.db, &user.id, state.config.session_ttl_days).await?;
    info!(user_id = %user.id, "User signed in");
    Ok(Json(AuthResponse { user, token }))
}

/// POST /api/auth/signout
pub async fn signout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Value>> {
    if let Some(token) = bearer_token(&headers) {
        if users::delete_session(&state.db, token).await? {
            debug!("Session ended");
        }
    }
    Ok(Json(json!({ "success": true })))
}

/// GET /api/auth/session
pub async fn session(CurrentUser(user): CurrentUser) -> Json<Value> {
    Json(json!({ "user": user }))
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/signup", post(signup))
        .route("/api/auth/signin", post(signin))
        .route("/api/auth/signout", post(signout))
        .route("/api/auth/session", get(session))
}
