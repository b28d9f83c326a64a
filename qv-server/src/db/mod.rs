//! Repository functions over the shared SQLite pool

pub mod collaborators;
pub mod credentials;
pub mod discover;
pub mod files;
pub mod messages;
pub mod projects;
pub mod settings;
pub mod users;
