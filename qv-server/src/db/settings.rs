//! Runtime settings (key-value rows in the `settings` table)

use qv_common::{Error, Result};
use sqlx::SqlitePool;

pub const THEME: &str = "theme";
pub const AUTO_SAVE: &str = "auto_save";
pub const DEFAULT_PROJECT_PATH: &str = "default_project_path";
pub const DEFAULT_TOKEN_BALANCE: &str = "default_token_balance";

/// Balance granted to new accounts when the setting is absent
pub const FALLBACK_TOKEN_BALANCE: i64 = 10_000;

pub async fn get_theme(db: &SqlitePool) -> Result<String> {
    get_setting(db, THEME).await.map(|opt| opt.unwrap_or_else(|| "dark".to_string()))
}

pub async fn get_auto_save(db: &SqlitePool) -> Result<bool> {
    get_setting(db, AUTO_SAVE).await.map(|opt| opt.unwrap_or(true))
}

pub async fn get_default_project_path(db: &SqlitePool) -> Result<Option<String>> {
    get_setting(db, DEFAULT_PROJECT_PATH).await
}

pub async fn get_default_token_balance(db: &SqlitePool) -> Result<i64> {
    get_setting(db, DEFAULT_TOKEN_BALANCE)
        .await
        .map(|opt| opt.unwrap_or(FALLBACK_TOKEN_BALANCE))
}

/// Generic setting getter; NULL and missing rows are both `None`
pub async fn get_setting<T>(db: &SqlitePool, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let value: Option<Option<String>> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await?;

    match value.flatten() {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("Parse setting '{}' failed: {}", key, e))),
        None => Ok(None),
    }
}

/// Generic setting setter (upsert)
pub async fn set_setting<T>(db: &SqlitePool, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, CURRENT_TIMESTAMP)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qv_common::db::init_memory_database;

    #[tokio::test]
    async fn test_defaults_after_init() {
        let db = init_memory_database().await.unwrap();
        assert_eq!(get_theme(&db).await.unwrap(), "dark");
        assert!(get_auto_save(&db).await.unwrap());
        assert_eq!(get_default_token_balance(&db).await.unwrap(), 10_000);
    }

    #[tokio::test]
    async fn test_set_and_parse() {
        let db = init_memory_database().await.unwrap();
        set_setting(&db, AUTO_SAVE, false).await.unwrap();
        assert!(!get_auto_save(&db).await.unwrap());

        set_setting(&db, DEFAULT_TOKEN_BALANCE, "lots").await.unwrap();
        assert!(get_default_token_balance(&db).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let db = init_memory_database().await.unwrap();
        let value: Option<String> = get_setting(&db, "nope").await.unwrap();
        assert!(value.is_none());
    }
}
