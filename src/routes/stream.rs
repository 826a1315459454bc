use std::convert::Infallible;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures::Stream;
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt as _;

use crate::chat::bridge::{self, BridgeSettings, StreamEvent};
use crate::chat::{gate, ChatScope};
use crate::error::{AppError, AppResult};
use crate::extractors::MemberSession;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/chat-stream", get(chat_stream))
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(rename = "type")]
    pub scope: Option<String>,
}

/// SSE feed of new messages for one scope: `connected`, then `update`
/// batches, until the connection reaches its lifetime ceiling.
async fn chat_stream(
    State(state): State<AppState>,
    session: MemberSession,
    Query(query): Query<StreamQuery>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let scope = query
        .scope
        .as_deref()
        .and_then(ChatScope::parse)
        .ok_or_else(|| AppError::BadRequest("Invalid chat type".to_string()))?;

    {
        let conn = state.db.get()?;
        gate::authorize(&conn, scope, &session)?;
    }

    let reconnect = state.config.stream.reconnect_delay();
    let rx = bridge::spawn(
        state.cache.clone(),
        scope,
        BridgeSettings::from(&state.config.stream),
    );
    tracing::debug!(scope = %scope, email = %session.email, "Chat stream connected");

    let stream = ReceiverStream::new(rx).map(move |event| Ok(to_sse(&event, reconnect)));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn to_sse(event: &StreamEvent, reconnect: std::time::Duration) -> Event {
    let data = match serde_json::to_string(event) {
        Ok(data) => data,
        Err(e) => {
            tracing::error!("Failed to encode stream event: {}", e);
            return Event::default().comment("encode-error");
        }
    };

    match event {
        // Tell the client how long to wait before reconnecting.
        StreamEvent::Connected => Event::default().retry(reconnect).data(data),
        StreamEvent::Update { .. } => Event::default().data(data),
    }
}
