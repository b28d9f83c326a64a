//! Business services: LLM access, generation helpers, orchestration, limits

pub mod agents;
pub mod anthropic;
pub mod api_key_validator;
pub mod code_extract;
pub mod llm;
pub mod metrics;
pub mod orchestrator;
pub mod password;
pub mod prompts;
pub mod rate_limiter;
pub mod title;

pub use anthropic::AnthropicClient;
pub use api_key_validator::{ApiKeyValidator, ValidationResult};
pub use llm::{LlmClient, LlmError, LlmMessage, LlmRequest, LlmResponse, LlmStream, StreamEvent, Usage};
pub use metrics::Metrics;
pub use orchestrator::Orchestrator;
pub use rate_limiter::UserRateLimiter;
