//! Tests for database creation, default settings and cascade behavior

use qv_common::db::init::{init_database, LOCAL_USER_EMAIL, LOCAL_USER_ID};
use qv_common::db::migrations::{get_schema_version, CURRENT_SCHEMA_VERSION};
use qv_common::db::{ensure_setting, init_memory_database};
use tempfile::TempDir;

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("nested").join("quickvibe.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("quickvibe.db");

    let pool1 = init_database(&db_path).await.unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await;
    assert!(pool2.is_ok(), "Failed to open existing database: {:?}", pool2.err());

    let version = get_schema_version(&pool2.unwrap()).await.unwrap();
    assert_eq!(version, CURRENT_SCHEMA_VERSION);
}

#[tokio::test]
async fn test_default_settings_initialized() {
    let pool = init_memory_database().await.unwrap();

    for (key, expected) in [
        ("theme", "dark"),
        ("auto_save", "true"),
        ("default_token_balance", "10000"),
    ] {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(value.as_deref(), Some(expected), "setting {}", key);
    }
}

#[tokio::test]
async fn test_null_setting_is_reset_but_user_value_kept() {
    let pool = init_memory_database().await.unwrap();

    sqlx::query("UPDATE settings SET value = NULL WHERE key = 'theme'")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("UPDATE settings SET value = 'false' WHERE key = 'auto_save'")
        .execute(&pool)
        .await
        .unwrap();

    ensure_setting(&pool, "theme", "dark").await.unwrap();
    ensure_setting(&pool, "auto_save", "true").await.unwrap();

    let theme: String = sqlx::query_scalar("SELECT value FROM settings WHERE key = 'theme'")
        .fetch_one(&pool)
        .await
        .unwrap();
    let auto_save: String = sqlx::query_scalar("SELECT value FROM settings WHERE key = 'auto_save'")
        .fetch_one(&pool)
        .await
        .unwrap();

    assert_eq!(theme, "dark");
    assert_eq!(auto_save, "false");
}

#[tokio::test]
async fn test_local_user_created_once() {
    let pool = init_memory_database().await.unwrap();
    qv_common::db::create_schema(&pool).await.unwrap();

    let rows: Vec<(String, String)> = sqlx::query_as("SELECT id, email FROM users")
        .fetch_all(&pool)
        .await
        .unwrap();

    assert_eq!(rows, vec![(LOCAL_USER_ID.to_string(), LOCAL_USER_EMAIL.to_string())]);
}

#[tokio::test]
async fn test_project_delete_cascades() {
    let pool = init_memory_database().await.unwrap();
    let now = qv_common::ids::now_db();

    sqlx::query(
        "INSERT INTO projects (id, name, user_id, created_at, updated_at) VALUES ('p1', 'Demo', ?, ?, ?)",
    )
    .bind(LOCAL_USER_ID)
    .bind(&now)
    .bind(&now)
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO messages (id, project_id, role, content, position, created_at) VALUES ('m1', 'p1', 'user', 'hi', 0, ?)",
    )
    .bind(&now)
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO project_files (id, project_id, path, content, language, created_at, updated_at) \
         VALUES ('f1', 'p1', 'index.html', '<html></html>', 'html', ?, ?)",
    )
    .bind(&now)
    .bind(&now)
    .execute(&pool)
    .await
    .unwrap();

    sqlx::query("DELETE FROM projects WHERE id = 'p1'")
        .execute(&pool)
        .await
        .unwrap();

    let messages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
        .fetch_one(&pool)
        .await
        .unwrap();
    let files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM project_files")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!((messages, files), (0, 0));
}

#[tokio::test]
async fn test_message_role_constraint() {
    let pool = init_memory_database().await.unwrap();
    let now = qv_common::ids::now_db();

    sqlx::query(
        "INSERT INTO projects (id, name, user_id, created_at, updated_at) VALUES ('p1', 'Demo', ?, ?, ?)",
    )
    .bind(LOCAL_USER_ID)
    .bind(&now)
    .bind(&now)
    .execute(&pool)
    .await
    .unwrap();

    let result = sqlx::query(
        "INSERT INTO messages (id, project_id, role, content, position, created_at) VALUES ('m1', 'p1', 'robot', 'hi', 0, ?)",
    )
    .bind(&now)
    .execute(&pool)
    .await;

    assert!(result.is_err());
}
