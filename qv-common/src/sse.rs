//! Server-Sent Events (SSE) utilities

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde::Serialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::events::EventBus;

/// Heartbeat interval for long-lived streams
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Build a named SSE event with a JSON payload
///
/// Serialization failures produce an `error` event instead of panicking.
pub fn json_event<T: Serialize>(name: &str, payload: &T) -> Event {
    match serde_json::to_string(payload) {
        Ok(data) => Event::default().event(name).data(data),
        Err(e) => {
            warn!("SSE: failed to serialize {} payload: {}", name, e);
            Event::default()
                .event("error")
                .data(format!(r#"{{"message":"serialization failed: {}"}}"#, e))
        }
    }
}

/// Forward bus events belonging to `user_id` to an SSE client
///
/// Sends an initial `ConnectionStatus` event, then bus events, with a
/// heartbeat comment every 15 seconds. Lagged receivers skip the dropped
/// events and continue.
pub fn user_event_stream(
    bus: &EventBus,
    user_id: String,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(user_id = %user_id, "New SSE client connected to event stream");
    let mut rx = bus.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("ConnectionStatus").data("connected"));

        loop {
            tokio::select! {
                _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                    debug!("SSE: Sending heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }
                received = rx.recv() => {
                    match received {
                        Ok(event) => {
                            if event.user_id() == user_id {
                                yield Ok(json_event(event.event_type(), &event));
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("SSE: client lagged, skipped {} events", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT_INTERVAL).text("heartbeat"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Delta {
        text: String,
    }

    #[test]
    fn test_json_event_builds() {
        // Event has no public accessors; building without panic is the contract
        let _ = json_event("delta", &Delta { text: "hi".to_string() });
    }
}
