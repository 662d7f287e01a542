//! Live analytics over WebSocket.
//!
//! Each subscriber gets the snapshot (summary plus recent decisions) first,
//! then the live stream. A subscriber that falls behind loses its oldest
//! pending events and keeps going; publishers never wait.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};

use ratelimit_core::events::StreamMessage;

use crate::app::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| stream_events(socket, state))
}

async fn stream_events(mut socket: WebSocket, state: AppState) {
    let (snapshot, mut rx) = state.engine.hub().subscribe();
    info!("analytics subscriber connected");
    if send(&mut socket, &snapshot).await.is_err() {
        return;
    }
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(message) => {
                    if send(&mut socket, &message).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    debug!(missed, "analytics subscriber lagged, events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                // inbound messages only keep the connection alive
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }
    info!("analytics subscriber disconnected");
}

async fn send(socket: &mut WebSocket, message: &StreamMessage) -> Result<(), axum::Error> {
    match serde_json::to_string(message) {
        Ok(text) => socket.send(Message::Text(text)).await,
        Err(e) => {
            debug!(error = %e, "failed to encode analytics message");
            Ok(())
        }
    }
}
