use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::header;
use repochat::emitter::emit;
use repochat::models::message::Message;
use repochat::protocol::{encode, ChatRequest, ChatTurn};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use crate::state::AppState;

const HEARTBEAT: Duration = Duration::from_millis(500);

/// Event stream body: one `data:` record per item
pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> Response {
        (
            [
                (header::CONTENT_TYPE, "text/event-stream"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::CONNECTION, "keep-alive"),
            ],
            Body::from_stream(self),
        )
            .into_response()
    }
}

// Only plain user and assistant text is taken from the client
fn convert_messages(incoming: Vec<ChatTurn>) -> Vec<Message> {
    let mut messages = Vec::new();
    for turn in incoming {
        match turn.role.as_str() {
            "user" => messages.push(Message::user().with_text(turn.content)),
            "assistant" => {
                if !turn.content.is_empty() {
                    messages.push(Message::assistant().with_text(turn.content));
                }
            }
            _ => {
                tracing::warn!("Ignoring message with unknown role: {}", turn.role);
            }
        }
    }
    messages
}

async fn handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<SseResponse, StatusCode> {
    let messages = convert_messages(request.messages);
    if messages.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let request_id = Uuid::new_v4();
    tracing::info!(%request_id, messages = messages.len(), "chat request");

    let (tx, rx) = mpsc::channel(100);
    let agent = state.agent();

    tokio::spawn(async move {
        let mut events = emit(agent.reply(&messages));
        loop {
            match timeout(HEARTBEAT, events.next()).await {
                Ok(Some(event)) => {
                    let record = match encode(&event) {
                        Ok(record) => record,
                        Err(e) => {
                            tracing::error!(%request_id, "Failed to encode event: {}", e);
                            break;
                        }
                    };
                    if tx.send(record).await.is_err() {
                        tracing::info!(%request_id, "client went away");
                        break;
                    }
                }
                Ok(None) => break,
                // heartbeat, stops the reply once the client has disconnected
                Err(_) => {
                    if tx.is_closed() {
                        tracing::info!(%request_id, "client went away");
                        break;
                    }
                }
            }
        }
        tracing::debug!(%request_id, "chat stream finished");
    });

    Ok(SseResponse::new(ReceiverStream::new(rx)))
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(handler))
        .with_state(state)
}
