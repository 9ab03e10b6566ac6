//! WebSocket Connection Handler
//!
//! Event-loop adapter between an axum WebSocket and the session state machine.

use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        RawQuery, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::time::interval;

use super::registry::{Outbound, SocketHandle};
use super::session::{ConnectParams, HandshakeOutcome, Session};
use crate::startup::AppState;

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    RawQuery(query): RawQuery,
    State(state): State<AppState>,
) -> Response {
    // identity problems are answered by closing the upgraded socket, never by a 400
    let params = ConnectParams::from_query(query.as_deref());
    let limits = &state.settings.websocket;
    ws.max_message_size(limits.max_message_size)
        .max_frame_size(limits.max_frame_size)
        .on_upgrade(move |socket| handle_socket(socket, params, state))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, params: ConnectParams, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (handle, mut rx) = SocketHandle::channel();
    let socket_id = handle.id();
    let mut session = Session::new(state.registry.clone(), handle);

    tracing::debug!(socket_id = %socket_id, "New WebSocket connection");

    // Forward queued frames to the socket
    let mut sender_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            match outbound {
                Outbound::Text(text) => {
                    if sender.send(Message::Text(text.as_ref().into())).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    if session.handshake(&params) == HandshakeOutcome::Rejected {
        let _ = sender_task.await;
        return;
    }

    let idle_timeout = Duration::from_millis(state.settings.websocket.idle_timeout_ms);
    let mut idle_check = interval(idle_check_period(idle_timeout));
    idle_check.tick().await; // Skip first immediate tick

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => session.on_text(text.as_str()),
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::debug!(socket_id = %socket_id, "Connection closed");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::debug!(socket_id = %socket_id, error = %e, "WebSocket error");
                        break;
                    }
                    // Protocol-level pings are answered by axum
                    Some(Ok(_)) => {}
                }
            }

            // Writer stopped: socket replaced or transport failed
            _ = &mut sender_task => {
                tracing::debug!(socket_id = %socket_id, "Writer finished");
                break;
            }

            _ = idle_check.tick() => {
                if session.is_idle(idle_timeout) {
                    tracing::info!(
                        socket_id = %socket_id,
                        user_id = session.user_id().unwrap_or_default(),
                        "Heartbeat timeout, closing connection"
                    );
                    break;
                }
            }
        }
    }

    let user_id = session.user_id().map(str::to_string);
    session.terminate();
    sender_task.abort();

    tracing::info!(
        user_id = user_id.as_deref().unwrap_or_default(),
        socket_id = %socket_id,
        "User disconnected"
    );
}

/// How often to test for idleness; a silent socket lives at most
/// `idle_timeout` plus one period.
fn idle_check_period(idle_timeout: Duration) -> Duration {
    (idle_timeout / 4).max(Duration::from_millis(25))
}
