//! Chat handler: runs the relay pipeline for one message and streams its events as SSE.
//!
//! Each relay event becomes one `data:` line holding a JSON object (`{token}`, `{blocked,
//! message}`, `{error}` or `{done}`). Dropping the response stream (client disconnect) drops
//! the event receiver, which stops the pipeline and releases the model stream.

use crate::AppState;
use axum::extract::{Json, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use relay_core::UserMessage;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
}

/// POST /api/chat – streaming relay over Server-Sent Events.
pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Sse<impl futures_util::Stream<Item = Result<Event, Infallible>> + Send + 'static> {
    use async_stream::stream;

    let request_id = uuid::Uuid::new_v4();
    tracing::info!(
        target: "relay::stream",
        request_id = %request_id,
        message_len = req.message.len(),
        "Chat request received"
    );
    let mut events = state.services.relay.spawn(UserMessage::new(req.message));

    let stream = stream! {
        let mut sent = 0usize;
        while let Some(event) = events.recv().await {
            sent += 1;
            let terminal = event.is_terminal();
            yield Ok(Event::default()
                .json_data(&event)
                .unwrap_or_else(|_| Event::default().data("{}")));
            if terminal {
                break;
            }
        }
        tracing::debug!(target: "relay::stream", request_id = %request_id, events = sent, "Chat stream closed");
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}
