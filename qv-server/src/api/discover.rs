//! Discovery feed, likes and forks

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use qv_common::db::ProjectSummary;
use qv_common::events::QvEvent;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{load_readable, CurrentUser};
use crate::db::discover::{fork_project, public_feed, toggle_like, DiscoverSort, FeedAfter};
use crate::pagination::{clamp_limit, parse_cursor, Cursor, Page};
use crate::{ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub sort: Option<String>,
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

fn feed_after(sort: DiscoverSort, cursor: &Cursor) -> ApiResult<FeedAfter> {
    Ok(match sort {
        DiscoverSort::Recent => FeedAfter::Recent {
            updated_at: cursor.str_key()?.to_string(),
            id: cursor.id.clone(),
        },
        DiscoverSort::Popular => FeedAfter::Popular {
            likes: cursor.int_key()?,
            id: cursor.id.clone(),
        },
    })
}

/// GET /api/discover?sort=recent|popular&cursor=&limit=
pub async fn feed(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> ApiResult<Json<Page<ProjectSummary>>> {
    let sort = match query.sort.as_deref() {
        Some(raw) => raw.parse::<DiscoverSort>()?,
        None => DiscoverSort::Recent,
    };
    let limit = clamp_limit(query.limit);
    let after = parse_cursor(query.cursor.as_deref())?
        .map(|c| feed_after(sort, &c))
        .transpose()?;

    let rows = public_feed(&state.db, sort, after.as_ref(), limit + 1).await?;
    let page = Page::from_rows(rows, limit, |p| match sort {
        DiscoverSort::Recent => Cursor::new(p.updated_at.clone(), p.id.clone()),
        DiscoverSort::Popular => Cursor::new(p.likes, p.id.clone()),
    });
    Ok(Json(page))
}

/// POST /api/projects/:id/like
pub async fn like(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    load_readable(&state, &id, Some(&user)).await?;
    let (liked, likes) = toggle_like(&state.db, &id, &user.id).await?;
    Ok(Json(json!({ "liked": liked, "likes": likes })))
}

/// POST /api/projects/:id/fork
pub async fn fork(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let (source, _) = load_readable(&state, &id, Some(&user)).await?;
    let fork_id = fork_project(&state.db, &source, &user.id).await?;

    info!(source_id = %id, fork_id = %fork_id, user_id = %user.id, "Project forked");
    state.event_bus.emit_lossy(QvEvent::ProjectForked {
        source_id: id.clone(),
        fork_id: fork_id.clone(),
        user_id: user.id.clone(),
        timestamp: Utc::now(),
    });

    Ok((
        StatusCode::CREATED,
        Json(json!({ "project_id": fork_id, "forked_from": id })),
    ))
}

pub fn discover_routes() -> Router<AppState> {
    Router::new()
        .route("/api/discover", get(feed))
        .route("/api/projects/:id/like", post(like))
        .route("/api/projects/:id/fork", post(fork))
}
