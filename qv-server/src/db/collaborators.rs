//! Collaborators and invites

use chrono::Duration;
use qv_common::db::{Collaborator, CollaboratorRole, Invite, InviteStatus};
use qv_common::ids::{generate_id, generate_token, now, now_db, to_db_timestamp};
use qv_common::{Error, Result};
use sqlx::SqlitePool;

/// Prefix of invite tokens
pub const INVITE_TOKEN_PREFIX: &str = "qvi";
/// Days an invite stays valid
pub const INVITE_TTL_DAYS: i64 = 7;

pub async fn collaborator_role(
    db: &SqlitePool,
    project_id: &str,
    user_id: &str,
) -> Result<Option<CollaboratorRole>> {
    let role: Option<String> =
        sqlx::query_scalar("SELECT role FROM collaborators WHERE project_id = ? AND user_id = ?")
            .bind(project_id)
            .bind(user_id)
            .fetch_optional(db)
            .await?;

    role.map(|r| r.parse()).transpose()
}

pub async fn list_collaborators(db: &SqlitePool, project_id: &str) -> Result<Vec<Collaborator>> {
    let collaborators = sqlx::query_as::<_, Collaborator>(
        r#"
        SELECT c.project_id, c.user_id, u.name, u.email, c.role, c.created_at
        FROM collaborators c
        JOIN users u ON u.id = c.user_id
        WHERE c.project_id = ?
        ORDER BY c.created_at
        "#,
    )
    .bind(project_id)
    .fetch_all(db)
    .await?;
    Ok(collaborators)
}

pub async fn remove_collaborator(db: &SqlitePool, project_id: &str, user_id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM collaborators WHERE project_id = ? AND user_id = ?")
        .bind(project_id)
        .bind(user_id)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Create a pending invite, revoking any earlier pending invite for the same email
pub async fn create_invite(
    db: &SqlitePool,
    project_id: &str,
    email: &str,
    role: CollaboratorRole,
    invited_by: &str,
) -> Result<Invite> {
    let mut tx = db.begin().await?;
    let created = now();
    let expires = created + Duration::days(INVITE_TTL_DAYS);

    sqlx::query(
        "UPDATE invites SET status = ? WHERE project_id = ? AND email = ? COLLATE NOCASE AND status = ?",
    )
    .bind(InviteStatus::Revoked.as_str())
    .bind(project_id)
    .bind(email)
    .bind(InviteStatus::Pending.as_str())
    .execute(&mut *tx)
    .await?;

    let invite = sqlx::query_as::<_, Invite>(
        r#"
        INSERT INTO invites (id, project_id, email, role, token, invited_by, status, created_at, expires_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(generate_id("inv"))
    .bind(project_id)
    .bind(email)
    .bind(role.as_str())
    .bind(generate_token(INVITE_TOKEN_PREFIX))
    .bind(invited_by)
    .bind(InviteStatus::Pending.as_str())
    .bind(to_db_timestamp(created))
    .bind(to_db_timestamp(expires))
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(invite)
}

pub async fn list_pending_invites(db: &SqlitePool, project_id: &str) -> Result<Vec<Invite>> {
    let invites = sqlx::query_as::<_, Invite>(
        "SELECT * FROM invites WHERE project_id = ? AND status = ? ORDER BY created_at DESC",
    )
    .bind(project_id)
    .bind(InviteStatus::Pending.as_str())
    .fetch_all(db)
    .await?;
    Ok(invites)
}

/// Mark a pending invite revoked; false when no such pending invite
pub async fn revoke_invite(db: &SqlitePool, project_id: &str, invite_id: &str) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE invites SET status = ? WHERE id = ? AND project_id = ? AND status = ?",
    )
    .bind(InviteStatus::Revoked.as_str())
    .bind(invite_id)
    .bind(project_id)
    .bind(InviteStatus::Pending.as_str())
    .execute(db)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_invite_by_token(db: &SqlitePool, token: &str) -> Result<Option<Invite>> {
    let invite = sqlx::query_as::<_, Invite>("SELECT * FROM invites WHERE token = ?")
        .bind(token)
        .fetch_optional(db)
        .await?;
    Ok(invite)
}

/// Accept an invite on behalf of `user_id` whose account email is `user_email`
///
/// The email is checked before the invite state. Errors: `NotFound` for an unknown token,
/// `Conflict` when the invite is no longer pending or has expired.
pub async fn accept_invite(
    db: &SqlitePool,
    token: &str,
    user_id: &str,
    user_email: &str,
) -> Result<AcceptOutcome> {
    let mut tx = db.begin().await?;

    let invite = sqlx::query_as::<_, Invite>("SELECT * FROM invites WHERE token = ?")
        .bind(token)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| Error::NotFound("Invite not found".to_string()))?;

    if !invite.email.eq_ignore_ascii_case(user_email.trim()) {
        return Ok(AcceptOutcome::EmailMismatch);
    }

    let status: InviteStatus = invite.status.parse()?;
    if status != InviteStatus::Pending {
        return Err(Error::Conflict(format!(
            "Invite is already {}",
            status.as_str().to_ascii_lowercase()
        )));
    }
    if invite.expires_at <= now_db() {
        return Err(Error::Conflict("Invite has expired".to_string()));
    }

    sqlx::query(
        r#"
        INSERT INTO collaborators (project_id, user_id, role, created_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(project_id, user_id) DO UPDATE SET role = excluded.role
        "#,
    )
    .bind(&invite.project_id)
    .bind(user_id)
    .bind(&invite.role)
    .bind(now_db())
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE invites SET status = ? WHERE id = ?")
        .bind(InviteStatus::Accepted.as_str())
        .bind(&invite.id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(AcceptOutcome::Accepted(invite))
}

#[derive(Debug)]
pub enum AcceptOutcome {
    Accepted(Invite),
    EmailMismatch,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::users::create_user;
    use qv_common::db::{init_memory_database, LOCAL_USER_ID};

    async fn setup() -> (SqlitePool, String) {
        let db = init_memory_database().await.unwrap();
        let ts = now_db();
        sqlx::query("INSERT INTO projects (id, name, user_id, created_at, updated_at) VALUES ('p1', 'P', ?, ?, ?)")
            .bind(LOCAL_USER_ID)
            .bind(&ts)
            .bind(&ts)
            .execute(&db)
            .await
            .unwrap();
        (db, "p1".to_string())
    }

    #[tokio::test]
    async fn test_new_invite_replaces_pending_one() {
        let (db, project) = setup().await;
        create_invite(&db, &project, "bob@example.com", CollaboratorRole::Viewer, LOCAL_USER_ID)
            .await
            .unwrap();
        let second = create_invite(&db, &project, "BOB@example.com", CollaboratorRole::Editor, LOCAL_USER_ID)
            .await
            .unwrap();

        let pending = list_pending_invites(&db, &project).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, second.id);
        assert!(second.token.starts_with("qvi_"));
    }

    #[tokio::test]
    async fn test_accept_then_reaccept_conflicts() {
        let (db, project) = setup().await;
        let bob = create_user(&db, "Bob", "bob@example.com", "h", 10).await.unwrap();
        let invite = create_invite(&db, &project, "bob@example.com", CollaboratorRole::Editor, LOCAL_USER_ID)
            .await
            .unwrap();

        let outcome = accept_invite(&db, &invite.token, &bob.id, &bob.email).await.unwrap();
        assert!(matches!(outcome, AcceptOutcome::Accepted(_)));
        assert_eq!(
            collaborator_role(&db, &project, &bob.id).await.unwrap(),
            Some(CollaboratorRole::Editor)
        );

        let again = accept_invite(&db, &invite.token, &bob.id, &bob.email).await;
        assert!(matches!(again, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_accept_with_other_email_is_mismatch() {
        let (db, project) = setup().await;
        let eve = create_user(&db, "Eve", "eve@example.com", "h", 10).await.unwrap();
        let invite = create_invite(&db, &project, "bob@example.com", CollaboratorRole::Viewer, LOCAL_USER_ID)
            .await
            .unwrap();

        let outcome = accept_invite(&db, &invite.token, &eve.id, &eve.email).await.unwrap();
        assert!(matches!(outcome, AcceptOutcome::EmailMismatch));
        assert!(collaborator_role(&db, &project, &eve.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_and_unknown_invites() {
        let (db, project) = setup().await;
        let bob = create_user(&db, "Bob", "bob@example.com", "h", 10).await.unwrap();
        let invite = create_invite(&db, &project, "bob@example.com", CollaboratorRole::Viewer, LOCAL_USER_ID)
            .await
            .unwrap();
        sqlx::query("UPDATE invites SET expires_at = '2000-01-01T00:00:00.000Z'")
            .execute(&db)
            .await
            .unwrap();

        let expired = accept_invite(&db, &invite.token, &bob.id, &bob.email).await;
        assert!(matches!(expired, Err(Error::Conflict(_))));

        let unknown = accept_invite(&db, "qvi_nope", &bob.id, &bob.email).await;
        assert!(matches!(unknown, Err(Error::NotFound(_))));
    }
}
