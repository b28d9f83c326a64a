//! Public feed, likes and forks

mod helpers;

use axum::http::StatusCode;
use helpers::TestApp;
use serde_json::json;
use std::collections::HashSet;

async fn publish(app: &TestApp, token: &str, id: &str) {
    let (status, _) = app
        .call(
            "PUT",
            &format!("/api/projects/{}", id),
            Some(token),
            Some(json!({ "visibility": "PUBLIC" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

/// Walk the whole feed; returns ids in feed order
async fn walk_feed(app: &TestApp, sort: &str, limit: usize) -> Vec<String> {
    let mut ids = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let uri = match &cursor {
            Some(c) => format!("/api/discover?sort={}&limit={}&cursor={}", sort, limit, c),
            None => format!("/api/discover?sort={}&limit={}", sort, limit),
        };
        let (status, page) = app.call("GET", &uri, None, None).await;
        assert_eq!(status, StatusCode::OK, "{}", page);

        let items = page["items"].as_array().unwrap();
        assert!(items.len() <= limit);
        ids.extend(items.iter().map(|p| p["id"].as_str().unwrap().to_string()));

        match page["next_cursor"].as_str() {
            Some(next) => cursor = Some(next.to_string()),
            None => break,
        }
    }
    ids
}

#[tokio::test]
async fn test_feed_pages_cover_public_projects_once() {
    let app = TestApp::new().await;
    let (token, _) = app.signup("Ada", "ada@example.com").await;

    let mut public = HashSet::new();
    for i in 0..7 {
        let id = app.create_project(&token, &format!("App {}", i), 0).await;
        publish(&app, &token, &id).await;
        public.insert(id);
    }
    app.create_project(&token, "Private", 0).await;

    for sort in ["recent", "popular"] {
        let ids = walk_feed(&app, sort, 3).await;
        assert_eq!(ids.len(), 7, "duplicates or gaps for {}", sort);
        assert_eq!(ids.into_iter().collect::<HashSet<_>>(), public);
    }

    let (status, _) = app.call("GET", "/api/discover?sort=weird", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_popular_feed_orders_by_likes() {
    let app = TestApp::new().await;
    let (ada, _) = app.signup("Ada", "ada@example.com").await;
    let (bob, _) = app.signup("Bob", "bob@example.com").await;

    let quiet = app.create_project(&ada, "Quiet", 0).await;
    let loved = app.create_project(&ada, "Loved", 0).await;
    publish(&app, &ada, &quiet).await;
    publish(&app, &ada, &loved).await;

    for token in [&ada, &bob] {
        app.call("POST", &format!("/api/projects/{}/like", loved), Some(token), None)
            .await;
    }

    let ids = walk_feed(&app, "popular", 10).await;
    assert_eq!(ids, vec![loved, quiet]);
}

#[tokio::test]
async fn test_like_toggles_and_count_matches() {
    let app = TestApp::new().await;
    let (ada, _) = app.signup("Ada", "ada@example.com").await;
    let (bob, _) = app.signup("Bob", "bob@example.com").await;
    let id = app.create_project(&ada, "Likeable", 0).await;
    publish(&app, &ada, &id).await;
    let uri = format!("/api/projects/{}/like", id);

    let (_, body) = app.call("POST", &uri, Some(&bob), None).await;
    assert_eq!(body, json!({ "liked": true, "likes": 1 }));
    let (_, body) = app.call("POST", &uri, Some(&ada), None).await;
    assert_eq!(body, json!({ "liked": true, "likes": 2 }));
    let (_, body) = app.call("POST", &uri, Some(&bob), None).await;
    assert_eq!(body, json!({ "liked": false, "likes": 1 }));

    let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM project_likes WHERE project_id = ?")
        .bind(&id)
        .fetch_one(&app.state.db)
        .await
        .unwrap();
    assert_eq!(stored, 1);
}

#[tokio::test]
async fn test_like_private_project_of_someone_else_is_forbidden() {
    let app = TestApp::new().await;
    let (ada, _) = app.signup("Ada", "ada@example.com").await;
    let (bob, _) = app.signup("Bob", "bob@example.com").await;
    let id = app.create_project(&ada, "Secret", 0).await;

    let (status, _) = app
        .call("POST", &format!("/api/projects/{}/like", id), Some(&bob), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_fork_copies_code_and_files() {
    let app = TestApp::new().await;
    let (ada, _) = app.signup("Ada", "ada@example.com").await;
    let (bob, bob_id) = app.signup("Bob", "bob@example.com").await;
    let source = app.create_project(&ada, "Game", 4).await;
    app.call(
        "PUT",
        &format!("/api/projects/{}/files", source),
        Some(&ada),
        Some(json!({ "path": "index.html", "content": "<html>game</html>" })),
    )
    .await;
    publish(&app, &ada, &source).await;

    let (status, body) = app
        .call("POST", &format!("/api/projects/{}/fork", source), Some(&bob), None)
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["forked_from"], source.as_str());
    let fork = body["project_id"].as_str().unwrap().to_string();

    let (_, detail) = app.call("GET", &format!("/api/projects/{}", fork), Some(&bob), None).await;
    assert_eq!(detail["project"]["user_id"], bob_id.as_str());
    assert_eq!(detail["project"]["visibility"], "PRIVATE");
    assert_eq!(detail["project"]["forked_from"], source.as_str());
    assert_eq!(detail["project"]["current_code"], "<html></html>");
    assert_eq!(detail["messages"]["items"], json!([]));
    assert_eq!(detail["files"][0]["path"], "index.html");

    let (_, original) = app.call("GET", &format!("/api/projects/{}", source), None, None).await;
    assert_eq!(original["project"]["forks"], 1);
}

#[tokio::test]
async fn test_fork_private_project_is_forbidden() {
    let app = TestApp::new().await;
    let (ada, _) = app.signup("Ada", "ada@example.com").await;
    let (bob, _) = app.signup("Bob", "bob@example.com").await;
    let id = app.create_project(&ada, "Secret", 0).await;

    let (status, _) = app
        .call("POST", &format!("/api/projects/{}/fork", id), Some(&bob), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
