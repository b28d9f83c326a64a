//! Anthropic client against a local stand-in for the Messages API

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use futures::StreamExt;
use qv_common::db::init_memory_database;
use qv_server::services::llm::{LlmClient, LlmError, LlmRequest, StreamEvent};
use qv_server::services::AnthropicClient;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Status codes answered before the stand-in starts succeeding
#[derive(Clone)]
struct Stub {
    calls: Arc<AtomicUsize>,
    failures: Vec<u16>,
}

const STREAM_CHUNKS: &[&str] = &[
    "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"usage\":{\"input_tokens\":7}}}\n\n",
    "event: ping\ndata: {\"type\":\"ping\"}\n\nevent: content_block_delta\nda",
    "ta: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hel\"}}\n\n",
    "event: content_block_delta\r\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"lo\"}}\r\n\r\n",
    "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":3}}\n\n",
    "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
];

async fn messages(State(stub): State<Stub>, Json(body): Json<Value>) -> Response {
    let call = stub.calls.fetch_add(1, Ordering::SeqCst);
    if let Some(status) = stub.failures.get(call) {
        let status = StatusCode::from_u16(*status).unwrap();
        return (status, "upstream trouble").into_response();
    }

    if body["stream"] == json!(true) {
        let chunks = STREAM_CHUNKS.iter().map(|chunk| Ok::<_, std::io::Error>(chunk.to_string()));
        return Response::builder()
            .header(header::CONTENT_TYPE, "text/event-stream")
            .body(Body::from_stream(futures::stream::iter(chunks)))
            .unwrap();
    }

    Json(json!({
        "content": [{"type": "text", "text": "pong"}],
        "stop_reason": "end_turn",
        "usage": {"input_tokens": 5, "output_tokens": 2}
    }))
    .into_response()
}

async fn client_for(failures: Vec<u16>) -> (AnthropicClient, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let stub = Stub {
        calls: calls.clone(),
        failures,
    };
    let app = Router::new()
        .route("/v1/messages", post(messages))
        .with_state(stub);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let db = init_memory_database().await.unwrap();
    let client = AnthropicClient::new(
        db,
        "claude-test".to_string(),
        256,
        Some("sk-ant-test".to_string()),
    )
    .unwrap()
    .with_base_url(format!("http://{}", addr));
    (client, calls)
}

#[tokio::test]
async fn test_stream_decodes_split_frames() {
    let (client, calls) = client_for(Vec::new()).await;
    let request = LlmRequest::prompt(None, "hello");

    let events: Vec<StreamEvent> = client
        .stream(&request)
        .await
        .unwrap()
        .map(|event| event.unwrap())
        .collect()
        .await;

    assert_eq!(
        events,
        vec![
            StreamEvent::Start { input_tokens: 7 },
            StreamEvent::Text("Hel".to_string()),
            StreamEvent::Text("lo".to_string()),
            StreamEvent::Usage {
                output_tokens: 3,
                stop_reason: Some("end_turn".to_string()),
            },
            StreamEvent::Done,
        ]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_complete_retries_server_errors() {
    let (client, calls) = client_for(vec![503]).await;

    let response = client
        .complete(&LlmRequest::prompt(None, "ping"))
        .await
        .unwrap();

    assert_eq!(response.text, "pong");
    assert_eq!(response.usage.total(), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_complete_does_not_retry_client_errors() {
    let (client, calls) = client_for(vec![400]).await;

    let err = client
        .complete(&LlmRequest::prompt(None, "ping"))
        .await
        .unwrap_err();

    assert!(matches!(err, LlmError::Http { status: 400, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
