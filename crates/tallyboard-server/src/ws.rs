//! `WebSocket` transport for the live stream.
//!
//! Clients connect to `GET /ws/stream` and receive one text frame per hub
//! message, encoded as `{"type": ..., "data": ...}`. The first frame is
//! always `stats`. Messages from the client other than ping and close are
//! ignored.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use tracing::debug;

use crate::hub::Subscription;
use crate::state::AppState;

/// Upgrade an HTTP request to a `WebSocket` connection and begin
/// streaming hub messages.
///
/// # Route
///
/// `GET /ws/stream`
pub async fn ws_stream(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    // Authorization is decided from the upgrade request's headers.
    let subscription = state.subscribe(&headers).await;
    ws.on_upgrade(move |socket| handle_ws(socket, subscription))
}

/// Forward hub frames until either side goes away. Returning drops the
/// subscription, which unregisters it from the hub.
async fn handle_ws(mut socket: WebSocket, mut subscription: Subscription) {
    debug!(?subscription, "WebSocket client connected");

    loop {
        tokio::select! {
            frame = subscription.recv() => {
                let Some(frame) = frame else {
                    debug!("Hub dropped subscriber, closing WebSocket");
                    let _ = socket.send(Message::Close(None)).await;
                    return;
                };
                let msg = Message::Text(frame.envelope.as_str().into());
                if socket.send(msg).await.is_err() {
                    debug!("WebSocket client disconnected (send failed)");
                    return;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client disconnected");
                        return;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!("WebSocket client disconnected (pong failed)");
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {e}");
                        return;
                    }
                    _ => {}
                }
            }
        }
    }
}
