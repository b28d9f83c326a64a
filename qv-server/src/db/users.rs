//! Users, sessions and token balances

use chrono::Duration;
use qv_common::db::User;
use qv_common::ids::{generate_id, generate_token, now, now_db, to_db_timestamp};
use qv_common::{Error, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Prefix of session bearer tokens
pub const SESSION_TOKEN_PREFIX: &str = "qvs";

/// Insert a new user; duplicate email (any case) is a conflict
pub async fn create_user(
    db: &SqlitePool,
    name: &str,
    email: &str,
    password_hash: &str,
    token_balance: i64,
) -> Result<User> {
    let id = generate_id("user");
    let ts = now_db();

    let inserted = sqlx::query(
        r#"
        INSERT INTO users (id, name, email, password_hash, plan, token_balance, created_at, updated_at)
        VALUES (?, ?, ?, ?, 'FREE', ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .bind(token_balance)
    .bind(&ts)
    .bind(&ts)
    .execute(db)
    .await
    .map_err(Error::Database);

    if let Err(e) = inserted {
        if e.is_unique_violation() {
            return Err(Error::Conflict("An account with this email already exists".to_string()));
        }
        return Err(e);
    }

    get_user(db, &id)
        .await?
        .ok_or_else(|| Error::Internal("User vanished after insert".to_string()))
}

pub async fn get_user(db: &SqlitePool, id: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(user)
}

/// Case-insensitive email lookup
pub async fn find_by_email(db: &SqlitePool, email: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ? COLLATE NOCASE")
        .bind(email.trim())
        .fetch_optional(db)
        .await?;
    Ok(user)
}

/// Create a session for `user_id` valid for `ttl_days`; returns the bearer token
pub async fn create_session(db: &SqlitePool, user_id: &str, ttl_days: i64) -> Result<String> {
    let token = generate_token(SESSION_TOKEN_PREFIX);
    let created = now();
    let expires = created + Duration::days(ttl_days.max(1));

    sqlx::query("INSERT INTO sessions (token, user_id, expires_at, created_at) VALUES (?, ?, ?, ?)")
        .bind(&token)
        .bind(user_id)
        .bind(to_db_timestamp(expires))
        .bind(to_db_timestamp(created))
        .execute(db)
        .await?;

    Ok(token)
}

/// Resolve a bearer token to its user
///
/// An expired session is deleted on sight and resolves to `None`.
pub async fn user_for_session(db: &SqlitePool, token: &str) -> Result<Option<User>> {
    let row: Option<(String, String)> =
        sqlx::query_as("SELECT user_id, expires_at FROM sessions WHERE token = ?")
            .bind(token)
            .fetch_optional(db)
            .await?;

    let Some((user_id, expires_at)) = row else {
        return Ok(None);
    };

    if expires_at <= now_db() {
        debug!(user_id = %user_id, "Purging expired session");
        delete_session(db, token).await?;
        return Ok(None);
    }

    get_user(db, &user_id).await
}

pub async fn delete_session(db: &SqlitePool, token: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM sessions WHERE token = ?")
        .bind(token)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Delete every expired session; returns how many were removed
pub async fn purge_expired_sessions(db: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
        .bind(now_db())
        .execute(db)
        .await?;
    Ok(result.rows_affected())
}

/// Subtract `amount` tokens, never going below zero; returns the new balance
pub async fn deduct_tokens(db: &SqlitePool, user_id: &str, amount: i64) -> Result<i64> {
    let balance: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE users
        SET token_balance = MAX(token_balance - ?, 0), updated_at = ?
        WHERE id = ?
        RETURNING token_balance
        "#,
    )
    .bind(amount.max(0))
    .bind(now_db())
    .bind(user_id)
    .fetch_optional(db)
    .await?;

    balance.ok_or_else(|| Error::NotFound(format!("User {}", user_id)))
}

pub async fn count_users(db: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(db)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use qv_common::db::init_memory_database;

    #[tokio::test]
    async fn test_duplicate_email_is_conflict() {
        let db = init_memory_database().await.unwrap();
        create_user(&db, "Ada", "ada@example.com", "h", 100).await.unwrap();

        let err = create_user(&db, "Ada 2", "ADA@example.com", "h", 100)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let db = init_memory_database().await.unwrap();
        let user = create_user(&db, "Ada", "ada@example.com", "h", 100).await.unwrap();

        let token = create_session(&db, &user.id, 7).await.unwrap();
        assert!(token.starts_with("qvs_"));
        let found = user_for_session(&db, &token).await.unwrap().unwrap();
        assert_eq!(found.id, user.id);

        assert!(delete_session(&db, &token).await.unwrap());
        assert!(user_for_session(&db, &token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_session_rejected_and_purged() {
        let db = init_memory_database().await.unwrap();
        let user = create_user(&db, "Ada", "ada@example.com", "h", 100).await.unwrap();
        let token = create_session(&db, &user.id, 7).await.unwrap();

        sqlx::query("UPDATE sessions SET expires_at = '2000-01-01T00:00:00.000Z'")
            .execute(&db)
            .await
            .unwrap();

        assert!(user_for_session(&db, &token).await.unwrap().is_none());
        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(&db)
            .await
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn test_deduct_tokens_floors_at_zero() {
        let db = init_memory_database().await.unwrap();
        let user = create_user(&db, "Ada", "ada@example.com", "h", 100).await.unwrap();

        assert_eq!(deduct_tokens(&db, &user.id, 40).await.unwrap(), 60);
        assert_eq!(deduct_tokens(&db, &user.id, 500).await.unwrap(), 0);
    }
}
