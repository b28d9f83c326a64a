//! qv-server library - QuickVibe HTTP service
//!
//! Exposes the router and state for the `quickvibe` binary and for
//! integration tests.

pub mod api;
pub mod db;
pub mod error;
pub mod pagination;
pub mod port;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::{middleware, Router};
use chrono::{DateTime, Utc};
use qv_common::config::TomlConfig;
use qv_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::services::{ApiKeyValidator, LlmClient, Metrics, UserRateLimiter};

/// Maximum accepted request body
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Event bus buffer per subscriber
pub const EVENT_BUS_CAPACITY: usize = 100;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<TomlConfig>,
    pub event_bus: EventBus,
    pub llm: Arc<dyn LlmClient>,
    pub key_validator: ApiKeyValidator,
    pub rate_limiter: UserRateLimiter,
    pub metrics: Metrics,
    /// Service startup timestamp for uptime reporting
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: TomlConfig, llm: Arc<dyn LlmClient>) -> Self {
        let rate_limiter = UserRateLimiter::per_minute(config.rate_limit_per_minute);
        Self {
            db,
            config: Arc::new(config),
            event_bus: EventBus::new(EVENT_BUS_CAPACITY),
            llm,
            key_validator: ApiKeyValidator::new(),
            rate_limiter,
            metrics: Metrics::new(),
            startup_time: Utc::now(),
        }
    }

    pub fn with_key_validator(mut self, validator: ApiKeyValidator) -> Self {
        self.key_validator = validator;
        self
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.startup_time).num_seconds().max(0)
    }
}

/// How often expired sessions and idle limiter keys are cleaned up
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

/// Periodic housekeeping: purge expired sessions, shrink the rate limiter
pub fn spawn_maintenance(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(MAINTENANCE_INTERVAL);
        loop {
            tick.tick().await;

            match db::users::purge_expired_sessions(&state.db).await {
                Ok(0) => {}
                Ok(purged) => info!(purged, "Purged expired sessions"),
                Err(e) => warn!("Session purge failed: {}", e),
            }
            state.rate_limiter.shrink();
        }
    })
}

/// Build application router
///
/// API routes first; when `static_dir` is configured, unknown paths are
/// served from it with `index.html` as the client-side routing fallback.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let mut router = Router::new()
        .merge(api::health_routes())
        .merge(api::auth_routes())
        .merge(api::project_routes())
        .merge(api::file_routes())
        .merge(api::collaboration_routes())
        .merge(api::discover_routes())
        .merge(api::agent_routes())
        .merge(api::generation_routes())
        .merge(api::orchestrate_routes())
        .merge(api::title_routes())
        .merge(api::settings_routes())
        .merge(api::event_routes());

    if let Some(static_dir) = &state.config.static_dir {
        let index = static_dir.join("index.html");
        router = router.fallback_service(ServeDir::new(static_dir).fallback(ServeFile::new(index)));
    }

    router
        .layer(middleware::from_fn_with_state(state.clone(), api::count_requests))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
