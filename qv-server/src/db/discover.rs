//! Discovery feed, likes and forks

use qv_common::db::{Project, ProjectSummary, Visibility};
use qv_common::ids::{generate_id, now_db};
use qv_common::{Error, Result};
use sqlx::SqlitePool;

/// Feed ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoverSort {
    /// `(updated_at DESC, id DESC)`
    Recent,
    /// `(likes DESC, id DESC)`
    Popular,
}

impl std::str::FromStr for DiscoverSort {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "recent" => Ok(DiscoverSort::Recent),
            "popular" => Ok(DiscoverSort::Popular),
            other => Err(Error::InvalidInput(format!("Invalid sort: {}", other))),
        }
    }
}

/// Keyset position inside the feed
#[derive(Debug, Clone, PartialEq)]
pub enum FeedAfter {
    Recent { updated_at: String, id: String },
    Popular { likes: i64, id: String },
}

const FEED_COLUMNS: &str = r#"
    SELECT p.id, p.name, p.description, p.project_type, p.visibility, p.likes, p.forks,
           p.forked_from, p.user_id, u.name AS owner_name, p.created_at, p.updated_at
    FROM projects p
    JOIN users u ON u.id = p.user_id
"#;

/// Public projects after `after` in `sort` order, at most `fetch` rows
pub async fn public_feed(
    db: &SqlitePool,
    sort: DiscoverSort,
    after: Option<&FeedAfter>,
    fetch: i64,
) -> Result<Vec<ProjectSummary>> {
    let public = Visibility::Public.as_str();

    let rows = match (sort, after) {
        (DiscoverSort::Recent, None) => {
            let sql = format!(
                "{} WHERE p.visibility = ? ORDER BY p.updated_at DESC, p.id DESC LIMIT ?",
                FEED_COLUMNS
            );
            sqlx::query_as::<_, ProjectSummary>(&sql)
                .bind(public)
                .bind(fetch)
                .fetch_all(db)
                .await?
        }
        (DiscoverSort::Popular, None) => {
            let sql = format!(
                "{} WHERE p.visibility = ? ORDER BY p.likes DESC, p.id DESC LIMIT ?",
                FEED_COLUMNS
            );
            sqlx::query_as::<_, ProjectSummary>(&sql)
                .bind(public)
                .bind(fetch)
                .fetch_all(db)
                .await?
        }
        (DiscoverSort::Recent, Some(FeedAfter::Recent { updated_at, id })) => {
            let sql = format!(
                "{} WHERE p.visibility = ? AND (p.updated_at < ? OR (p.updated_at = ? AND p.id < ?)) \
                 ORDER BY p.updated_at DESC, p.id DESC LIMIT ?",
                FEED_COLUMNS
            );
            sqlx::query_as::<_, ProjectSummary>(&sql)
                .bind(public)
                .bind(updated_at)
                .bind(updated_at)
                .bind(id)
                .bind(fetch)
                .fetch_all(db)
                .await?
        }
        (DiscoverSort::Popular, Some(FeedAfter::Popular { likes, id })) => {
            let sql = format!(
                "{} WHERE p.visibility = ? AND (p.likes < ? OR (p.likes = ? AND p.id < ?)) \
                 ORDER BY p.likes DESC, p.id DESC LIMIT ?",
                FEED_COLUMNS
            );
            sqlx::query_as::<_, ProjectSummary>(&sql)
                .bind(public)
                .bind(likes)
                .bind(likes)
                .bind(id)
                .bind(fetch)
                .fetch_all(db)
                .await?
        }
        _ => {
            return Err(Error::InvalidInput(
                "Cursor does not match the requested sort".to_string(),
            ))
        }
    };

    Ok(rows)
}

/// Toggle `user_id`'s like; returns `(liked, like_count)`
pub async fn toggle_like(db: &SqlitePool, project_id: &str, user_id: &str) -> Result<(bool, i64)> {
    let mut tx = db.begin().await?;

    let removed = sqlx::query("DELETE FROM project_likes WHERE project_id = ? AND user_id = ?")
        .bind(project_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    let liked = removed == 0;
    if liked {
        sqlx::query("INSERT INTO project_likes (project_id, user_id, created_at) VALUES (?, ?, ?)")
            .bind(project_id)
            .bind(user_id)
            .bind(now_db())
            .execute(&mut *tx)
            .await?;
    }

    let likes: i64 = sqlx::query_scalar(
        r#"
        UPDATE projects
        SET likes = (SELECT COUNT(*) FROM project_likes WHERE project_id = ?1)
        WHERE id = ?1
        RETURNING likes
        "#,
    )
    .bind(project_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok((liked, likes))
}

/// Copy a project (code and files, not messages) into `user_id`'s account
pub async fn fork_project(db: &SqlitePool, source: &Project, user_id: &str) -> Result<String> {
    let mut tx = db.begin().await?;
    let fork_id = generate_id("proj");
    let ts = now_db();

    sqlx::query(
        r#"
        INSERT INTO projects (id, name, description, project_type, active_agents, current_code,
                              visibility, forked_from, user_id, created_at, updated_at)
        SELECT ?, name || ' (fork)', description, project_type, active_agents, current_code,
               ?, id, ?, ?, ?
        FROM projects WHERE id = ?
        "#,
    )
    .bind(&fork_id)
    .bind(Visibility::Private.as_str())
    .bind(user_id)
    .bind(&ts)
    .bind(&ts)
    .bind(&source.id)
    .execute(&mut *tx)
    .await?;

    let files: Vec<(String, String, String)> =
        sqlx::query_as("SELECT path, content, language FROM project_files WHERE project_id = ?")
            .bind(&source.id)
            .fetch_all(&mut *tx)
            .await?;

    for (path, content, language) in files {
        sqlx::query(
            r#"
            INSERT INTO project_files (id, project_id, path, content, language, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(generate_id("file"))
        .bind(&fork_id)
        .bind(&path)
        .bind(&content)
        .bind(&language)
        .bind(&ts)
        .bind(&ts)
        .execute(&mut *tx)
        .await?;
    }

    sqlx::query("UPDATE projects SET forks = forks + 1 WHERE id = ?")
        .bind(&source.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(fork_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::users::create_user;
    use qv_common::db::{init_memory_database, LOCAL_USER_ID};

    async fn insert_public(db: &SqlitePool, id: &str, updated_at: &str) {
        sqlx::query(
            "INSERT INTO projects (id, name, visibility, user_id, created_at, updated_at) \
             VALUES (?, ?, 'PUBLIC', ?, ?, ?)",
        )
        .bind(id)
        .bind(format!("Project {}", id))
        .bind(LOCAL_USER_ID)
        .bind(updated_at)
        .bind(updated_at)
        .execute(db)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_recent_feed_keyset_with_ties() {
        let db = init_memory_database().await.unwrap();
        let same = "2025-01-01T00:00:00.000Z";
        insert_public(&db, "a", same).await;
        insert_public(&db, "b", same).await;
        insert_public(&db, "c", "2025-02-01T00:00:00.000Z").await;

        let first = public_feed(&db, DiscoverSort::Recent, None, 2).await.unwrap();
        let ids: Vec<&str> = first.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b"]);

        let after = FeedAfter::Recent {
            updated_at: same.to_string(),
            id: "b".to_string(),
        };
        let rest = public_feed(&db, DiscoverSort::Recent, Some(&after), 2).await.unwrap();
        let ids: Vec<&str> = rest.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[tokio::test]
    async fn test_like_toggle_keeps_count() {
        let db = init_memory_database().await.unwrap();
        insert_public(&db, "p", "2025-01-01T00:00:00.000Z").await;
        let bob = create_user(&db, "Bob", "bob@example.com", "h", 10).await.unwrap();

        assert_eq!(toggle_like(&db, "p", &bob.id).await.unwrap(), (true, 1));
        assert_eq!(toggle_like(&db, "p", LOCAL_USER_ID).await.unwrap(), (true, 2));
        assert_eq!(toggle_like(&db, "p", &bob.id).await.unwrap(), (false, 1));
    }

    #[tokio::test]
    async fn test_mismatched_cursor_rejected() {
        let db = init_memory_database().await.unwrap();
        let after = FeedAfter::Popular {
            likes: 3,
            id: "x".to_string(),
        };
        let result = public_feed(&db, DiscoverSort::Recent, Some(&after), 5).await;
        assert!(matches!(result, Err(Error::InvalidInput(_))));
    }
}
