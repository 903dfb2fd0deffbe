//! Event stream and inbound message endpoints.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, KeepAliveStream, Sse};
use axum::Json;
use bytes::Bytes;
use futures_util::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{parse_body, parse_id, AppState};
use crate::models::event::Event;
use crate::session::SessionRegistry;
use crate::Result;

/// Interval between SSE keep-alive comments.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Query parameters of `GET /api/stream`.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Session to reattach to.
    pub session: Option<String>,
    /// Project to bind a new session to.
    pub project: Option<String>,
}

/// Reports the transport's disconnect to the registry when dropped.
struct DisconnectGuard {
    registry: Arc<SessionRegistry>,
    session_id: u64,
    generation: u64,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        debug!(
            session_id = self.session_id,
            generation = self.generation,
            "event stream closed"
        );
        self.registry
            .handle_disconnect(self.session_id, self.generation);
    }
}

/// Receiving half of a session transport, framed as SSE events.
pub struct TransportStream {
    rx: mpsc::UnboundedReceiver<Event>,
    _guard: DisconnectGuard,
}

impl Stream for TransportStream {
    type Item = std::result::Result<SseEvent, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx
            .poll_recv(cx)
            .map(|event| event.map(|event| Ok(to_sse(&event))))
    }
}

fn to_sse(event: &Event) -> SseEvent {
    match serde_json::to_string(event) {
        Ok(json) => SseEvent::default().data(json),
        Err(err) => {
            warn!(%err, "failed to serialise event");
            SseEvent::default().comment("unserialisable event")
        }
    }
}

/// `GET /api/stream?session=<id>&project=<id>`
pub async fn open(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Sse<KeepAliveStream<TransportStream>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let (supervisor, generation) = state.registry.open_stream(
        parse_id(query.session.as_deref()),
        parse_id(query.project.as_deref()),
        tx,
    );

    let stream = TransportStream {
        rx,
        _guard: DisconnectGuard {
            registry: Arc::clone(&state.registry),
            session_id: supervisor.id(),
            generation,
        },
    };
    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL))
}

/// Body of `POST /api/message`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    /// Target session.
    pub session_id: u64,
    /// User turn.
    #[serde(default)]
    pub message: MessageBody,
}

/// User turn as sent by the client; `content` wins over `prompt`.
#[derive(Debug, Default, Deserialize)]
pub struct MessageBody {
    /// Turn content.
    #[serde(default)]
    pub content: Option<Value>,
    /// Alternative spelling of `content`.
    #[serde(default)]
    pub prompt: Option<Value>,
}

impl MessageBody {
    /// The content forwarded to the agent; empty string when neither field
    /// carries a value.
    #[must_use]
    pub fn into_content(self) -> Value {
        [self.content, self.prompt]
            .into_iter()
            .flatten()
            .find(|value| {
                !matches!(value, Value::Null | Value::Bool(false)) && value.as_str() != Some("")
            })
            .unwrap_or_else(|| Value::String(String::new()))
    }
}

/// `POST /api/message`
pub async fn message(State(state): State<AppState>, body: Bytes) -> Result<Json<Value>> {
    let request: MessageRequest = parse_body(&body)?;
    state
        .registry
        .route_message(request.session_id, request.message.into_content())?;
    Ok(Json(json!({ "success": true })))
}
