//! Anthropic Messages API client
//!
//! The API key is looked up on every call (database → environment → TOML) so
//! a key saved through `/api/credentials` takes effect without a restart.

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use eventsource_stream::Eventsource;
use futures::StreamExt;
use qv_common::config::{select_api_key, API_KEY_ENV};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use std::time::Duration;
use tracing::{debug, warn};

use super::llm::{
    LlmClient, LlmError, LlmMessage, LlmRequest, LlmResponse, LlmStream, StreamEvent, Usage,
};
use crate::db::credentials;

pub const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RETRIES: usize = 3;

pub struct AnthropicClient {
    http: Client,
    base_url: String,
    model: String,
    max_tokens: u32,
    db: SqlitePool,
    config_key: Option<String>,
}

impl AnthropicClient {
    pub fn new(
        db: SqlitePool,
        model: String,
        max_tokens: u32,
        config_key: Option<String>,
    ) -> Result<Self, LlmError> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("quickvibe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: ANTHROPIC_API_BASE.to_string(),
            model,
            max_tokens,
            db,
            config_key,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn resolve_key(&self) -> Result<String, LlmError> {
        let db_key = credentials::get_api_key(&self.db)
            .await
            .map_err(|e| LlmError::Provider(format!("credential lookup failed: {}", e)))?;
        let env_key = std::env::var(API_KEY_ENV).ok();

        select_api_key(db_key, env_key, self.config_key.clone())
            .map(|(key, source)| {
                debug!(source = source.as_str(), "Using Anthropic API key");
                key
            })
            .ok_or(LlmError::MissingApiKey)
    }

    fn body<'a>(&'a self, request: &'a LlmRequest, stream: bool) -> MessagesRequest<'a> {
        MessagesRequest {
            model: &self.model,
            max_tokens: request.max_tokens.unwrap_or(self.max_tokens),
            messages: &request.messages,
            system: request.system.as_deref(),
            stream,
        }
    }

    async fn send(
        &self,
        api_key: &str,
        body: &MessagesRequest<'_>,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, LlmError> {
        let mut builder = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;

        match response.status() {
            s if s.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED => Err(LlmError::InvalidApiKey),
            StatusCode::TOO_MANY_REQUESTS => Err(LlmError::RateLimited),
            s => {
                let status = s.as_u16();
                let body = response.text().await.unwrap_or_default();
                Err(LlmError::Http { status, body })
            }
        }
    }

    async fn complete_once(
        &self,
        api_key: &str,
        request: &LlmRequest,
    ) -> Result<LlmResponse, LlmError> {
        let response = self
            .send(api_key, &self.body(request, false), Some(REQUEST_TIMEOUT))
            .await?;

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Decode(e.to_string()))?;

        let text = parsed
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");

        Ok(LlmResponse {
            text,
            usage: Usage {
                input_tokens: parsed.usage.input_tokens,
                output_tokens: parsed.usage.output_tokens,
            },
            stop_reason: parsed.stop_reason,
        })
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let api_key = self.resolve_key().await?;

        (|| async { self.complete_once(&api_key, request).await })
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_secs(1))
                    .with_max_delay(Duration::from_secs(8))
                    .with_max_times(MAX_RETRIES),
            )
            .when(|e: &LlmError| e.should_retry())
            .notify(|e, dur| {
                warn!(
                    "Anthropic request failed, retrying after {:.2}s: {}",
                    dur.as_secs_f64(),
                    e
                )
            })
            .await
    }

    async fn stream(&self, request: &LlmRequest) -> Result<LlmStream, LlmError> {
        let api_key = self.resolve_key().await?;
        let response = self.send(&api_key, &self.body(request, true), None).await?;
        let mut events = response.bytes_stream().eventsource();

        let stream = async_stream::stream! {
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err(LlmError::Transport(e.to_string()));
                        return;
                    }
                };

                match map_frame(&event.event, &event.data) {
                    Ok(Some(StreamEvent::Done)) => {
                        yield Ok(StreamEvent::Done);
                        return;
                    }
                    Ok(Some(event)) => yield Ok(event),
                    Ok(None) => {}
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            yield Err(LlmError::Decode("stream ended before message_stop".to_string()));
        };

        Ok(Box::pin(stream))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Transport(format!("timeout: {}", e))
    } else {
        LlmError::Transport(e.to_string())
    }
}

/// Translate one Messages API stream frame
///
/// `ping` and unknown events map to `None`. Unnamed events (reported as
/// `message`) fall back to the `type` field of the payload.
pub fn map_frame(event: &str, data: &str) -> Result<Option<StreamEvent>, LlmError> {
    let data: Value = serde_json::from_str(data).map_err(|e| LlmError::Decode(e.to_string()))?;

    let kind = Some(event)
        .filter(|name| !name.is_empty() && *name != "message")
        .or_else(|| data.get("type").and_then(Value::as_str))
        .unwrap_or_default();

    let event = match kind {
        "message_start" => Some(StreamEvent::Start {
            input_tokens: data
                .pointer("/message/usage/input_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        }),
        "content_block_delta" => {
            let delta = data.get("delta");
            match delta.and_then(|d| d.get("type")).and_then(Value::as_str) {
                Some("text_delta") => delta
                    .and_then(|d| d.get("text"))
                    .and_then(Value::as_str)
                    .map(|text| StreamEvent::Text(text.to_string())),
                _ => None,
            }
        }
        "message_delta" => Some(StreamEvent::Usage {
            output_tokens: data
                .pointer("/usage/output_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            stop_reason: data
                .pointer("/delta/stop_reason")
                .and_then(Value::as_str)
                .map(String::from),
        }),
        "message_stop" => Some(StreamEvent::Done),
        "error" => {
            let message = data
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("unknown provider error");
            return Err(LlmError::Provider(message.to_string()));
        }
        _ => None,
    };

    Ok(event)
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: &'a [LlmMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: ResponseUsage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    input_tokens: u64,
    output_tokens: u64,
}
