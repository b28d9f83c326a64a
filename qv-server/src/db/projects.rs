//! Projects: save/load/list/update/delete and access resolution

use qv_common::db::{CollaboratorRole, MessageRole, Project, ProjectSummary, Visibility};
use qv_common::ids::{generate_id, now_db};
use qv_common::{Error, Result};
use sqlx::types::Json;
use sqlx::{Sqlite, SqlitePool, Transaction};

use super::collaborators::collaborator_role;

/// What a user may do with a project
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectAccess {
    Owner,
    Editor,
    Viewer,
    /// Not a member, but the project is public
    Public,
    None,
}

impl ProjectAccess {
    pub fn can_read(self) -> bool {
        !matches!(self, ProjectAccess::None)
    }

    pub fn can_edit(self) -> bool {
        matches!(self, ProjectAccess::Owner | ProjectAccess::Editor)
    }

    pub fn is_owner(self) -> bool {
        matches!(self, ProjectAccess::Owner)
    }
}

/// Project list filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListScope {
    Owned,
    Shared,
    All,
}

impl std::str::FromStr for ListScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "owned" => Ok(ListScope::Owned),
            "shared" => Ok(ListScope::Shared),
            "all" => Ok(ListScope::All),
            other => Err(Error::InvalidInput(format!("Invalid scope: {}", other))),
        }
    }
}

/// Message as submitted in a save request
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Option<String>,
    pub role: MessageRole,
    pub content: String,
}

/// Full project state submitted by a save
#[derive(Debug, Clone)]
pub struct SaveProject {
    pub project_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub project_type: String,
    pub active_agents: Vec<String>,
    pub messages: Vec<NewMessage>,
    pub current_code: Option<String>,
    pub visibility: Option<Visibility>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Created(String),
    Updated(String),
    /// Project exists and the caller cannot edit it
    Forbidden,
}

/// Partial update; `None` fields are left untouched
#[derive(Debug, Clone, Default)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub visibility: Option<Visibility>,
    pub current_code: Option<String>,
    pub active_agents: Option<Vec<String>>,
}

pub async fn get_project(db: &SqlitePool, id: &str) -> Result<Option<Project>> {
    let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(project)
}

/// Resolve `user_id`'s access to `project` (anonymous when `None`)
pub async fn access_for(
    db: &SqlitePool,
    project: &Project,
    user_id: Option<&str>,
) -> Result<ProjectAccess> {
    if let Some(uid) = user_id {
        if project.user_id == uid {
            return Ok(ProjectAccess::Owner);
        }
        match collaborator_role(db, &project.id, uid).await? {
            Some(CollaboratorRole::Editor) => return Ok(ProjectAccess::Editor),
            Some(CollaboratorRole::Viewer) => return Ok(ProjectAccess::Viewer),
            None => {}
        }
    }

    if project.visibility == Visibility::Public.as_str() {
        Ok(ProjectAccess::Public)
    } else {
        Ok(ProjectAccess::None)
    }
}

async fn can_edit_in_tx(
    tx: &mut Transaction<'_, Sqlite>,
    project_id: &str,
    owner_id: &str,
    user_id: &str,
) -> Result<bool> {
    if owner_id == user_id {
        return Ok(true);
    }
    let role: Option<String> =
        sqlx::query_scalar("SELECT role FROM collaborators WHERE project_id = ? AND user_id = ?")
            .bind(project_id)
            .bind(user_id)
            .fetch_optional(&mut **tx)
            .await?;
    Ok(role.as_deref() == Some(CollaboratorRole::Editor.as_str()))
}

/// Create or update a project and replace its messages, all in one transaction
pub async fn save_project(db: &SqlitePool, user_id: &str, req: &SaveProject) -> Result<SaveOutcome> {
    let mut tx = db.begin().await?;
    let ts = now_db();
    let agents = Json(&req.active_agents);

    let existing_owner: Option<String> = match &req.project_id {
        Some(id) => {
            sqlx::query_scalar("SELECT user_id FROM projects WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?
        }
        None => None,
    };

    let outcome = match (&req.project_id, existing_owner) {
        (Some(id), Some(owner_id)) => {
            if !can_edit_in_tx(&mut tx, id, &owner_id, user_id).await? {
                return Ok(SaveOutcome::Forbidden);
            }

            sqlx::query(
                r#"
                UPDATE projects
                SET name = ?,
                    description = ?,
                    project_type = ?,
                    active_agents = ?,
                    current_code = ?,
                    visibility = COALESCE(?, visibility),
                    updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&req.name)
            .bind(&req.description)
            .bind(&req.project_type)
            .bind(&agents)
            .bind(&req.current_code)
            .bind(req.visibility.map(|v| v.as_str()))
            .bind(&ts)
            .bind(id)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM messages WHERE project_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;

            SaveOutcome::Updated(id.clone())
        }
        (requested_id, _) => {
            let id = requested_id.clone().unwrap_or_else(|| generate_id("proj"));

            sqlx::query(
                r#"
                INSERT INTO projects (id, name, description, project_type, active_agents,
                                      current_code, visibility, user_id, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(&req.name)
            .bind(&req.description)
            .bind(&req.project_type)
            .bind(&agents)
            .bind(&req.current_code)
            .bind(req.visibility.unwrap_or(Visibility::Private).as_str())
            .bind(user_id)
            .bind(&ts)
            .bind(&ts)
            .execute(&mut *tx)
            .await?;

            SaveOutcome::Created(id)
        }
    };

    let project_id = match &outcome {
        SaveOutcome::Created(id) | SaveOutcome::Updated(id) => id.clone(),
        SaveOutcome::Forbidden => return Ok(SaveOutcome::Forbidden),
    };

    for (position, message) in req.messages.iter().enumerate() {
        let message_id = message.id.clone().unwrap_or_else(|| generate_id("msg"));
        sqlx::query(
            r#"
            INSERT INTO messages (id, project_id, role, content, position, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&message_id)
        .bind(&project_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(position as i64)
        .bind(&ts)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(outcome)
}

/// Projects visible in the caller's workspace, most recently updated first
pub async fn list_projects(
    db: &SqlitePool,
    user_id: &str,
    scope: ListScope,
) -> Result<Vec<ProjectSummary>> {
    let filter = match scope {
        ListScope::Owned => "p.user_id = ?1",
        ListScope::Shared => "p.id IN (SELECT project_id FROM collaborators WHERE user_id = ?1)",
        ListScope::All => {
            "(p.user_id = ?1 OR p.id IN (SELECT project_id FROM collaborators WHERE user_id = ?1))"
        }
    };

    let sql = format!(
        r#"
        SELECT p.id, p.name, p.description, p.project_type, p.visibility, p.likes, p.forks,
               p.forked_from, p.user_id, u.name AS owner_name, p.created_at, p.updated_at
        FROM projects p
        JOIN users u ON u.id = p.user_id
        WHERE {}
        ORDER BY p.updated_at DESC, p.id DESC
        "#,
        filter
    );

    let projects = sqlx::query_as::<_, ProjectSummary>(&sql)
        .bind(user_id)
        .fetch_all(db)
        .await?;
    Ok(projects)
}

/// Apply a partial update; returns false when the project does not exist
pub async fn update_project(db: &SqlitePool, id: &str, update: &ProjectUpdate) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE projects
        SET name = COALESCE(?, name),
            description = COALESCE(?, description),
            visibility = COALESCE(?, visibility),
            current_code = COALESCE(?, current_code),
            active_agents = COALESCE(?, active_agents),
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&update.name)
    .bind(&update.description)
    .bind(update.visibility.map(|v| v.as_str()))
    .bind(&update.current_code)
    .bind(update.active_agents.as_ref().map(Json))
    .bind(now_db())
    .bind(id)
    .execute(db)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Replace the generated code of a project
pub async fn set_current_code(db: &SqlitePool, id: &str, code: &str) -> Result<()> {
    sqlx::query("UPDATE projects SET current_code = ?, updated_at = ? WHERE id = ?")
        .bind(code)
        .bind(now_db())
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

/// Delete a project; children go with it through ON DELETE CASCADE
pub async fn delete_project(db: &SqlitePool, id: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(id)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn count_projects(db: &SqlitePool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects")
        .fetch_one(db)
        .await?;
    Ok(count)
}
