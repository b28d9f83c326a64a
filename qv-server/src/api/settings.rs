//! Runtime settings and LLM credentials

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use qv_common::config::{select_api_key, ApiKeySource, API_KEY_ENV};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::CurrentUser;
use crate::db::{credentials, settings};
use crate::services::api_key_validator::{has_valid_format, KEY_PREFIX};
use crate::services::ValidationResult;
use crate::{ApiError, ApiResult, AppState};

#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub theme: String,
    pub auto_save: bool,
    pub default_project_path: Option<String>,
    pub anthropic_api_key_set: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSettingsRequest {
    pub theme: Option<String>,
    pub auto_save: Option<bool>,
    pub default_project_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StoreCredentialsRequest {
    pub api_key: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CredentialsStatus {
    pub authenticated: bool,
    pub source: &'static str,
    pub email: Option<String>,
}

/// Key currently in effect, with where it came from
async fn effective_key(state: &AppState) -> ApiResult<Option<(String, ApiKeySource)>> {
    let db_key = credentials::get_api_key(&state.db).await?;
    Ok(select_api_key(
        db_key,
        std::env::var(API_KEY_ENV).ok(),
        state.config.anthropic_api_key.clone(),
    ))
}

async fn current_settings(state: &AppState) -> ApiResult<SettingsResponse> {
    Ok(SettingsResponse {
        theme: settings::get_theme(&state.db).await?,
        auto_save: settings::get_auto_save(&state.db).await?,
        default_project_path: settings::get_default_project_path(&state.db).await?,
        anthropic_api_key_set: effective_key(state).await?.is_some(),
    })
}

/// GET /api/settings
pub async fn get_settings(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
) -> ApiResult<Json<SettingsResponse>> {
    Ok(Json(current_settings(&state).await?))
}

/// POST /api/settings
///
/// Upserts the provided fields and returns the resulting settings.
pub async fn update_settings(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
    Json(req): Json<UpdateSettingsRequest>,
) -> ApiResult<Json<SettingsResponse>> {
    if let Some(theme) = &req.theme {
        let theme = theme.trim();
        if theme.is_empty() {
            return Err(ApiError::BadRequest("Theme cannot be empty".to_string()));
        }
        settings::set_setting(&state.db, settings::THEME, theme).await?;
    }
    if let Some(auto_save) = req.auto_save {
        settings::set_setting(&state.db, settings::AUTO_SAVE, auto_save).await?;
    }
    if let Some(path) = &req.default_project_path {
        settings::set_setting(&state.db, settings::DEFAULT_PROJECT_PATH, path.trim()).await?;
    }

    Ok(Json(current_settings(&state).await?))
}

/// GET /api/credentials/status
pub async fn credentials_status(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
) -> ApiResult<Json<CredentialsStatus>> {
    let status = match effective_key(&state).await? {
        Some((_, source)) => {
            let email = match source {
                ApiKeySource::Database => credentials::get_credentials(&state.db)
                    .await?
                    .and_then(|c| c.email),
                _ => None,
            };
            CredentialsStatus {
                authenticated: true,
                source: source.as_str(),
                email,
            }
        }
        None => CredentialsStatus {
            authenticated: false,
            source: "none",
            email: None,
        },
    };
    Ok(Json(status))
}

/// POST /api/credentials
///
/// The key is checked against the API before it is stored.
pub async fn store_credentials(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
    Json(req): Json<StoreCredentialsRequest>,
) -> ApiResult<Json<Value>> {
    let api_key = req.api_key.trim();
    if !has_valid_format(api_key) {
        return Err(ApiError::InvalidApiKey(format!(
            "API key must start with {}",
            KEY_PREFIX
        )));
    }

    match state.key_validator.validate_key(api_key).await {
        ValidationResult::Valid => {}
        ValidationResult::Invalid => {
            return Err(ApiError::InvalidApiKey(
                "The API key was rejected by Anthropic".to_string(),
            ))
        }
        ValidationResult::Unavailable(reason) => {
            warn!("API key validation unavailable: {}", reason);
            return Err(ApiError::Upstream(format!("Could not validate API key: {}", reason)));
        }
    }

    let email = req.email.as_deref().map(str::trim).filter(|e| !e.is_empty());
    credentials::store_credentials(&state.db, api_key, email).await?;
    info!("Anthropic API key stored");

    Ok(Json(json!({ "success": true })))
}

/// DELETE /api/credentials
pub async fn delete_credentials(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
) -> ApiResult<Json<Value>> {
    let removed = credentials::delete_credentials(&state.db).await?;
    if removed {
        info!("Stored Anthropic API key removed");
    }
    Ok(Json(json!({ "success": true, "removed": removed })))
}

pub fn settings_routes() -> Router<AppState> {
    Router::new()
        .route("/api/settings", get(get_settings).post(update_settings))
        .route("/api/credentials/status", get(credentials_status))
        .route("/api/credentials", post(store_credentials).delete(delete_credentials))
}
