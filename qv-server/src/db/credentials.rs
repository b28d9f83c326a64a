//! Stored LLM API credentials (single row, id = 1)

use qv_common::db::StoredCredentials;
use qv_common::ids::now_db;
use qv_common::Result;
use sqlx::SqlitePool;

pub async fn get_credentials(db: &SqlitePool) -> Result<Option<StoredCredentials>> {
    let row = sqlx::query_as::<_, StoredCredentials>(
        "SELECT api_key, email, subscription_tier, last_validated FROM auth_credentials WHERE id = 1",
    )
    .fetch_optional(db)
    .await?;
    Ok(row)
}

pub async fn get_api_key(db: &SqlitePool) -> Result<Option<String>> {
    Ok(get_credentials(db).await?.map(|c| c.api_key))
}

/// Store a validated key, replacing any previous one
pub async fn store_credentials(db: &SqlitePool, api_key: &str, email: Option<&str>) -> Result<()> {
    let ts = now_db();
    sqlx::query(
        r#"
        INSERT INTO auth_credentials (id, api_key, email, last_validated, created_at, updated_at)
        VALUES (1, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            api_key = excluded.api_key,
            email = excluded.email,
            last_validated = excluded.last_validated,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(api_key)
    .bind(email)
    .bind(&ts)
    .bind(&ts)
    .bind(&ts)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn delete_credentials(db: &SqlitePool) -> Result<bool> {
    let result = sqlx::query("DELETE FROM auth_credentials WHERE id = 1")
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}
