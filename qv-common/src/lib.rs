//! # QuickVibe Common Library
//!
//! Shared code for the QuickVibe service:
//! - Error type and result alias
//! - Bootstrap configuration (root folder, TOML file)
//! - Identifier and token generation
//! - Event bus and SSE helpers
//! - Database initialization, migrations and row models

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod ids;
pub mod sse;

pub use error::{Error, Result};
