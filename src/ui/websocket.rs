//! `/ws`: live session events as JSON text frames

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use crate::session::SessionEvent;
use crate::ui::server::{AppState, TrustedOrigins};

pub async fn events_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Extension(origins): Extension<TrustedOrigins>,
    State(state): State<Arc<AppState>>,
) -> Response {
    // Browsers do not apply CORS to websocket handshakes
    if !origins.allows(&headers) {
        warn!("Rejected control panel socket from {:?}", headers.get("origin"));
        return StatusCode::FORBIDDEN.into_response();
    }
    ws.on_upgrade(move |socket| stream_events(socket, state))
}

async fn stream_events(socket: WebSocket, state: Arc<AppState>) {
    info!("Control panel client connected");
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the snapshot so no edge falls between the two
    let mut events = state.events.subscribe();
    let current = SessionEvent::StateChanged {
        state: state.controller.state(),
    };
    if send_event(&mut sender, &current).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Control panel client lagged; skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Control panel socket error: {}", e);
                    break;
                }
            },
        }
    }

    let _ = sender.send(Message::Close(None)).await;
    info!("Control panel client disconnected");
}

async fn send_event<S>(sender: &mut S, event: &SessionEvent) -> Result<(), ()>
where
    S: futures_util::Sink<Message> + Unpin,
{
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize session event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(json)).await.map_err(|_| ())
}
