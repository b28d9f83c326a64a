//! Test helpers shared by the qv-server integration tests
//!
//! A scripted LLM client and a router over an in-memory database.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, Response, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use qv_common::config::TomlConfig;
use qv_common::db::init_memory_database;
use qv_server::services::llm::{
    LlmClient, LlmError, LlmRequest, LlmResponse, LlmStream, StreamEvent, Usage,
};
use qv_server::services::ApiKeyValidator;
use qv_server::{build_router, AppState};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tower::util::ServiceExt;

pub const HTML_REPLY: &str =
    "Here is your app.\n```html\n<!DOCTYPE html>\n<html><body>Hello</body></html>\n```";

/// How the scripted client answers
#[derive(Clone)]
pub enum Script {
    /// Every call succeeds with this text
    Reply(String),
    /// Every call fails with a provider error
    Fail,
    /// Calls fail as if no API key were configured
    MissingKey,
    /// Streams emit some text, then fail
    FailMidStream,
    /// Like `Reply`, but streams pause after the first chunk and completions
    /// block until `gate` is notified
    Gated { text: String, gate: Arc<Notify> },
}

pub struct MockLlm {
    pub script: Script,
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl MockLlm {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: &str) -> Self {
        Self::new(Script::Reply(text.to_string()))
    }

    pub fn gated(text: &str) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let llm = Self::new(Script::Gated {
            text: text.to_string(),
            gate: gate.clone(),
        });
        (llm, gate)
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

const USAGE: Usage = Usage {
    input_tokens: 12,
    output_tokens: 30,
};

#[async_trait]
impl LlmClient for MockLlm {
    fn model(&self) -> &str {
        "mock-model"
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.script {
            Script::Reply(text) => Ok(LlmResponse {
                text: text.clone(),
                usage: USAGE,
                stop_reason: Some("end_turn".to_string()),
            }),
            Script::Gated { text, gate } => {
                gate.notified().await;
                Ok(LlmResponse {
                    text: text.clone(),
                    usage: USAGE,
                    stop_reason: Some("end_turn".to_string()),
                })
            }
            Script::MissingKey => Err(LlmError::MissingApiKey),
            Script::Fail | Script::FailMidStream => Err(LlmError::Provider("overloaded".to_string())),
        }
    }

    async fn stream(&self, request: &LlmRequest) -> Result<LlmStream, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let events: Vec<Result<StreamEvent, LlmError>> = match &self.script {
            Script::Reply(text) => {
                let (head, tail) = halves(text);
                vec![
                    Ok(StreamEvent::Start { input_tokens: USAGE.input_tokens }),
                    Ok(StreamEvent::Text(head)),
                    Ok(StreamEvent::Text(tail)),
                    Ok(StreamEvent::Usage {
                        output_tokens: USAGE.output_tokens,
                        stop_reason: Some("end_turn".to_string()),
                    }),
                    Ok(StreamEvent::Done),
                ]
            }
            Script::FailMidStream => vec![
                Ok(StreamEvent::Start { input_tokens: USAGE.input_tokens }),
                Ok(StreamEvent::Text("partial".to_string())),
                Err(LlmError::Provider("connection reset".to_string())),
            ],
            Script::Gated { text, gate } => {
                let (head, tail) = halves(text);
                let gate = gate.clone();
                let stream = async_stream::stream! {
                    yield Ok::<_, LlmError>(StreamEvent::Start { input_tokens: USAGE.input_tokens });
                    yield Ok(StreamEvent::Text(head));
                    gate.notified().await;
                    yield Ok(StreamEvent::Text(tail));
                    yield Ok(StreamEvent::Usage {
                        output_tokens: USAGE.output_tokens,
                        stop_reason: Some("end_turn".to_string()),
                    });
                    yield Ok(StreamEvent::Done);
                };
                return Ok(Box::pin(stream));
            }
            Script::MissingKey => return Err(LlmError::MissingApiKey),
            Script::Fail => return Err(LlmError::Http { status: 500, body: "boom".to_string() }),
        };
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

fn halves(text: &str) -> (String, String) {
    let mid = text.char_indices().nth(text.chars().count() / 2).map_or(0, |(i, _)| i);
    (text[..mid].to_string(), text[mid..].to_string())
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub llm: Arc<MockLlm>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with(TomlConfig::default(), MockLlm::replying(HTML_REPLY)).await
    }

    pub async fn with_llm(llm: MockLlm) -> Self {
        Self::with(TomlConfig::default(), llm).await
    }

    pub async fn with(config: TomlConfig, llm: MockLlm) -> Self {
        let db = init_memory_database().await.unwrap();
        let llm = Arc::new(llm);
        // Nothing listens on port 1, so key validation is always unavailable
        let state = AppState::new(db, config, llm.clone())
            .with_key_validator(ApiKeyValidator::new().with_base_url("http://127.0.0.1:1"));
        let router = build_router(state.clone());
        Self { router, state, llm }
    }

    /// Send a request; returns status and the body parsed as JSON (Null if empty)
    pub async fn call(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let (status, text) = self.call_raw(method, uri, token, body).await;
        let json = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        (status, json)
    }

    /// Send a request; returns status and the raw body text
    pub async fn call_raw(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, String) {
        let response = self.open(method, uri, token, body).await;
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    /// Send a request; the body is left unread
    pub async fn open(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        self.router.clone().oneshot(request).await.unwrap()
    }

    /// Create an account; returns `(token, user_id)`
    pub async fn signup(&self, name: &str, email: &str) -> (String, String) {
        let (status, body) = self
            .call(
                "POST",
                "/api/auth/signup",
                None,
                Some(json!({ "name": name, "email": email, "password": "password123" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "signup failed: {}", body);
        (
            body["token"].as_str().unwrap().to_string(),
            body["user"]["id"].as_str().unwrap().to_string(),
        )
    }

    /// Save a new project with `n` messages; returns its id
    pub async fn create_project(&self, token: &str, name: &str, n: usize) -> String {
        let messages: Vec<Value> = (0..n)
            .map(|i| {
                json!({
                    "role": if i % 2 == 0 { "user" } else { "assistant" },
                    "content": format!("message {}", i),
                })
            })
            .collect();
        let (status, body) = self
            .call(
                "POST",
                "/api/projects/save",
                Some(token),
                Some(json!({
                    "name": name,
                    "project_type": "web",
                    "active_agents": ["ui-designer"],
                    "messages": messages,
                    "current_code": "<html></html>",
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "save failed: {}", body);
        body["project_id"].as_str().unwrap().to_string()
    }
}

/// Read body frames until `marker` shows up; returns the text read so far
pub async fn read_until(body: &mut Body, marker: &str) -> String {
    let mut text = String::new();
    let read = async {
        while !text.contains(marker) {
            let frame = body.frame().await.expect("body ended").unwrap();
            if let Ok(data) = frame.into_data() {
                text.push_str(&String::from_utf8_lossy(&data));
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .expect("marker not seen in time");
    text
}

/// Poll `check` until it yields a value or five seconds pass
pub async fn eventually<T, F, Fut>(mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    for _ in 0..100 {
        if let Some(value) = check().await {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition not reached in time");
}

/// Split an SSE body into `(event name, JSON data)` pairs, skipping comments
pub fn parse_sse(body: &str) -> Vec<(String, Value)> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut name = None;
            let mut data = Vec::new();
            for line in block.lines() {
                if let Some(v) = line.strip_prefix("event:") {
                    name = Some(v.trim().to_string());
                } else if let Some(v) = line.strip_prefix("data:") {
                    data.push(v.strip_prefix(' ').unwrap_or(v).to_string());
                }
            }
            let name = name?;
            let data = data.join("\n");
            let value = serde_json::from_str(&data).unwrap_or(Value::String(data));
            Some((name, value))
        })
        .collect()
}
