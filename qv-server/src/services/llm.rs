//! LLM client abstraction
//!
//! Handlers and the orchestrator talk to [`LlmClient`]; production uses
//! [`super::anthropic::AnthropicClient`], tests substitute scripted clients.

use async_trait::async_trait;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;

use crate::error::ApiError;

#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("API key not configured")]
    MissingApiKey,
    #[error("invalid api key")]
    InvalidApiKey,
    #[error("rate limited by LLM provider")]
    RateLimited,
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("network error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("cancelled")]
    Cancelled,
}

impl LlmError {
    /// Transient failures worth another attempt
    pub fn should_retry(&self) -> bool {
        match self {
            Self::Transport(_) | Self::RateLimited => true,
            Self::Http { status, .. } => (500..=599).contains(status),
            _ => false,
        }
    }
}

impl From<LlmError> for ApiError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::MissingApiKey => ApiError::ApiKeyMissing,
            LlmError::InvalidApiKey => {
                ApiError::InvalidApiKey("The configured API key was rejected".to_string())
            }
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: LlmRole,
    pub content: String,
}

impl LlmMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: LlmRole::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub system: Option<String>,
    pub messages: Vec<LlmMessage>,
    /// Falls back to the client's configured limit
    pub max_tokens: Option<u32>,
}

impl LlmRequest {
    /// Single user turn with an optional system prompt
    pub fn prompt(system: Option<String>, prompt: impl Into<String>) -> Self {
        Self {
            system,
            messages: vec![LlmMessage::user(prompt)],
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, other: Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    pub usage: Usage,
    pub stop_reason: Option<String>,
}

/// Incremental events from a streamed completion
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Stream opened; prompt token count
    Start { input_tokens: u64 },
    /// Generated text chunk
    Text(String),
    /// Final output token count and stop reason
    Usage {
        output_tokens: u64,
        stop_reason: Option<String>,
    },
    /// Stream finished
    Done,
}

pub type LlmStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send>>;

#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Model identifier reported to clients
    fn model(&self) -> &str;

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    /// Open a streamed completion
    ///
    /// Errors returned here happen before any output; errors inside the
    /// stream happen after output started.
    async fn stream(&self, request: &LlmRequest) -> Result<LlmStream, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_retry() {
        assert!(LlmError::Transport("reset".into()).should_retry());
        assert!(LlmError::RateLimited.should_retry());
        assert!(LlmError::Http { status: 503, body: String::new() }.should_retry());
        assert!(!LlmError::Http { status: 400, body: String::new() }.should_retry());
        assert!(!LlmError::InvalidApiKey.should_retry());
        assert!(!LlmError::MissingApiKey.should_retry());
    }

    #[test]
    fn test_api_error_mapping() {
        assert!(matches!(ApiError::from(LlmError::MissingApiKey), ApiError::ApiKeyMissing));
        assert!(matches!(ApiError::from(LlmError::RateLimited), ApiError::Upstream(_)));
    }
}
