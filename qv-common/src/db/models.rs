//! Database row models

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub image: Option<String>,
    pub plan: String,
    pub token_balance: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub expires_at: String,
    pub created_at: String,
}

/// Full project row including generated code
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub project_type: String,
    pub active_agents: Json<Vec<String>>,
    pub current_code: Option<String>,
    pub visibility: String,
    pub likes: i64,
    pub forks: i64,
    pub forked_from: Option<String>,
    pub user_id: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Project listing entry (no code, no messages)
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub project_type: String,
    pub visibility: String,
    pub likes: i64,
    pub forks: i64,
    pub forked_from: Option<String>,
    pub user_id: String,
    pub owner_name: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Message {
    pub id: String,
    pub project_id: String,
    pub role: String,
    pub content: String,
    pub position: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProjectFile {
    pub id: String,
    pub project_id: String,
    pub path: String,
    pub content: String,
    pub language: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Collaborator joined with the user's public fields
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Collaborator {
    pub project_id: String,
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Invite {
    pub id: String,
    pub project_id: String,
    pub email: String,
    pub role: String,
    pub token: String,
    pub invited_by: String,
    pub status: String,
    pub created_at: String,
    pub expires_at: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct StoredCredentials {
    pub api_key: String,
    pub email: Option<String>,
    pub subscription_tier: Option<String>,
    pub last_validated: Option<String>,
}

/// Chat message author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl FromStr for MessageRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            other => Err(Error::InvalidInput(format!("Invalid message role: {}", other))),
        }
    }
}

/// Collaborator permission level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CollaboratorRole {
    Editor,
    Viewer,
}

impl CollaboratorRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollaboratorRole::Editor => "EDITOR",
            CollaboratorRole::Viewer => "VIEWER",
        }
    }
}

impl FromStr for CollaboratorRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "EDITOR" => Ok(CollaboratorRole::Editor),
            "VIEWER" => Ok(CollaboratorRole::Viewer),
            _ => Err(Error::InvalidInput(format!("Invalid collaborator role: {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Visibility {
    Private,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "PRIVATE",
            Visibility::Public => "PUBLIC",
        }
    }
}

impl FromStr for Visibility {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PRIVATE" => Ok(Visibility::Private),
            "PUBLIC" => Ok(Visibility::Public),
            _ => Err(Error::InvalidInput(format!("Invalid visibility: {}", s))),
        }
    }
}

/// Invite lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteStatus {
    Pending,
    Accepted,
    Revoked,
}

impl InviteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InviteStatus::Pending => "PENDING",
            InviteStatus::Accepted => "ACCEPTED",
            InviteStatus::Revoked => "REVOKED",
        }
    }
}

impl fmt::Display for InviteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InviteStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(InviteStatus::Pending),
            "ACCEPTED" => Ok(InviteStatus::Accepted),
            "REVOKED" => Ok(InviteStatus::Revoked),
            other => Err(Error::Internal(format!("Unknown invite status: {}", other))),
        }
    }
}
