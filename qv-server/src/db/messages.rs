//! Project chat messages

use qv_common::db::{Message, MessageRole};
use qv_common::ids::{generate_id, now_db};
use qv_common::Result;
use sqlx::SqlitePool;

/// Fetch up to `fetch` messages after `after_position`, oldest first
///
/// Callers pass `limit + 1` to learn whether another page exists.
pub async fn messages_after(
    db: &SqlitePool,
    project_id: &str,
    after_position: Option<i64>,
    fetch: i64,
) -> Result<Vec<Message>> {
    let messages = sqlx::query_as::<_, Message>(
        r#"
        SELECT * FROM messages
        WHERE project_id = ? AND position > ?
        ORDER BY position ASC
        LIMIT ?
        "#,
    )
    .bind(project_id)
    .bind(after_position.unwrap_or(-1))
    .bind(fetch)
    .fetch_all(db)
    .await?;
    Ok(messages)
}

/// Append messages at the end of a project's history; returns their ids
pub async fn append_messages(
    db: &SqlitePool,
    project_id: &str,
    messages: &[(MessageRole, &str)],
) -> Result<Vec<String>> {
    let mut tx = db.begin().await?;
    let ts = now_db();

    let last: Option<i64> =
        sqlx::query_scalar("SELECT MAX(position) FROM messages WHERE project_id = ?")
            .bind(project_id)
            .fetch_one(&mut *tx)
            .await?;
    let mut position = last.map_or(0, |p| p + 1);

    let mut ids = Vec::with_capacity(messages.len());
    for (role, content) in messages {
        let id = generate_id("msg");
        sqlx::query(
            r#"
            INSERT INTO messages (id, project_id, role, content, position, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(project_id)
        .bind(role.as_str())
        .bind(*content)
        .bind(position)
        .bind(&ts)
        .execute(&mut *tx)
        .await?;

        ids.push(id);
        position += 1;
    }

    sqlx::query("UPDATE projects SET updated_at = ? WHERE id = ?")
        .bind(&ts)
        .bind(project_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(ids)
}

pub async fn count_messages(db: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
        .fetch_one(db)
        .await?;
    Ok(count)
}
