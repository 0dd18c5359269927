//! WebSocket endpoint of the Event Bus.
//!
//! Each upgraded connection gets a server-assigned [`ConnectionId`], is
//! greeted with [`BusMessage::Welcome`], and then drives the bus with
//! `Join`, `Leave` and `Publish` frames. The connection is removed from the
//! bus when either side closes.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use taskboard_proto::bus::{self, BusMessage};
use taskboard_proto::codec::{self, CodecError};
use tokio::sync::mpsc;

use crate::bus::ConnectionId;
use crate::server::AppState;

/// axum handler that upgrades an HTTP request to a bus connection.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drives one bus connection until it closes.
///
/// 1. Register the connection and send `Welcome`.
/// 2. Spawn a writer task draining the connection's channel.
/// 3. Read frames and dispatch them to the bus.
/// 4. On close or error, disconnect from the bus.
pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let connection = ConnectionId::new();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state.bus.register(&connection, tx).await;

    let welcome = BusMessage::Welcome {
        connection_id: connection.to_string(),
    };
    if let Err(e) = send_bus_msg(&mut ws_sender, &welcome).await {
        tracing::error!(connection = %connection, error = %e, "failed to send Welcome");
        state.bus.disconnect(&connection).await;
        return;
    }
    tracing::info!(connection = %connection, "bus connection opened");

    let writer_connection = connection.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(connection = %writer_connection, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_connection = connection.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_binary_message(&reader_connection, &data, &reader_state).await;
                }
                Message::Close(_) => {
                    tracing::info!(connection = %reader_connection, "received close frame");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.bus.disconnect(&connection).await;
    tracing::info!(connection = %connection, "bus connection closed");
}

/// Handles one binary frame from a connection.
async fn handle_binary_message(connection: &ConnectionId, data: &[u8], state: &AppState) {
    let msg = match codec::decode_bounded::<BusMessage>(data, state.max_payload_size) {
        Ok(m) => m,
        Err(CodecError::FrameTooLarge { size, max }) => {
            tracing::warn!(connection = %connection, size, max, "frame exceeds size limit");
            reply_error(state, connection, format!("payload too large: {size} bytes (max {max})"))
                .await;
            return;
        }
        Err(e) => {
            tracing::warn!(connection = %connection, error = %e, "failed to decode frame");
            return;
        }
    };

    match msg {
        BusMessage::Join { workspace_id } => {
            if let Err(e) = workspace_id.validate() {
                reply_error(state, connection, e.to_string()).await;
                return;
            }
            match state.bus.join(connection, &workspace_id).await {
                Ok(added) => {
                    tracing::info!(
                        connection = %connection,
                        workspace = %workspace_id,
                        added,
                        "joined workspace"
                    );
                    state
                        .bus
                        .send_to(connection, &BusMessage::Joined { workspace_id })
                        .await;
                }
                Err(e) => {
                    tracing::warn!(connection = %connection, error = %e, "join failed");
                }
            }
        }
        BusMessage::Leave { workspace_id } => {
            let removed = state.bus.leave(connection, &workspace_id).await;
            tracing::info!(
                connection = %connection,
                workspace = %workspace_id,
                removed,
                "left workspace"
            );
        }
        BusMessage::Publish {
            workspace_id,
            event,
        } => {
            if let Err(e) = workspace_id.validate().and_then(|()| event.validate()) {
                tracing::warn!(
                    connection = %connection,
                    workspace = %workspace_id,
                    error = %e,
                    "rejected invalid event"
                );
                reply_error(state, connection, format!("invalid event: {e}")).await;
                return;
            }
            if let Err(e) = state.bus.publish(connection, &workspace_id, event).await {
                tracing::error!(connection = %connection, error = %e, "publish failed");
            }
        }
        other => {
            tracing::warn!(
                connection = %connection,
                msg = ?other,
                "unexpected message type from client"
            );
        }
    }
}

async fn reply_error(state: &AppState, connection: &ConnectionId, reason: String) {
    state
        .bus
        .send_to(connection, &BusMessage::Error { reason })
        .await;
}

/// Encodes and sends a bus frame directly on a WebSocket sender.
async fn send_bus_msg(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    msg: &BusMessage,
) -> Result<(), String> {
    let bytes = bus::encode(msg).map_err(|e| e.to_string())?;
    ws_sender
        .send(Message::Binary(bytes.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}
