//! Anthropic API key validation
//!
//! A key is checked with a one-token completion request before it is stored.

use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::anthropic::{ANTHROPIC_API_BASE, ANTHROPIC_VERSION};

/// Required prefix of Anthropic API keys
pub const KEY_PREFIX: &str = "sk-ant-";

const VALIDATION_MODEL: &str = "claude-3-haiku-20240307";
const VALIDATION_TIMEOUT: Duration = Duration::from_secs(20);

/// API key validation outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Accepted by the API
    Valid,
    /// Rejected by the API (HTTP 401)
    Invalid,
    /// Validation could not be completed (network error, 5xx, unexpected status)
    Unavailable(String),
}

/// Cheap local shape check done before any network call
pub fn has_valid_format(key: &str) -> bool {
    let key = key.trim();
    key.starts_with(KEY_PREFIX) && key.len() > KEY_PREFIX.len()
}

#[derive(Clone)]
pub struct ApiKeyValidator {
    http: Client,
    base_url: String,
}

impl ApiKeyValidator {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
            base_url: ANTHROPIC_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Validate a key by performing a minimal completion
    pub async fn validate_key(&self, key: &str) -> ValidationResult {
        debug!(key_len = key.len(), "Validating Anthropic API key");

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", key.trim())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .timeout(VALIDATION_TIMEOUT)
            .json(&json!({
                "model": VALIDATION_MODEL,
                "max_tokens": 1,
                "messages": [{"role": "user", "content": "test"}]
            }))
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                warn!("API key validation request failed: {}", e);
                return ValidationResult::Unavailable(e.to_string());
            }
        };

        let status = response.status();
        debug!(status_code = status.as_u16(), "Anthropic validation response");

        if status.is_success() {
            info!("Anthropic API key is valid");
            ValidationResult::Valid
        } else if status.as_u16() == 401 {
            warn!("Anthropic API key is invalid (HTTP 401)");
            ValidationResult::Invalid
        } else {
            warn!(status_code = status.as_u16(), "Anthropic API key validation failed");
            ValidationResult::Unavailable(format!("Unexpected API response: {}", status))
        }
    }
}

impl Default for ApiKeyValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        assert!(has_valid_format("sk-ant-api03-abc"));
        assert!(has_valid_format("  sk-ant-x  "));
        assert!(!has_valid_format("sk-ant-"));
        assert!(!has_valid_format("sk-openai-123"));
        assert!(!has_valid_format(""));
    }

    #[tokio::test]
    async fn test_unreachable_host_is_unavailable() {
        let validator = ApiKeyValidator::new().with_base_url("http://127.0.0.1:1");
        let result = validator.validate_key("sk-ant-test").await;
        assert!(matches!(result, ValidationResult::Unavailable(_)));
    }
}
