//! Event Bus: workspace rooms over WebSocket connections.
//!
//! Connections are grouped into rooms, one per workspace. A published
//! [`TaskChangeEvent`] is relayed to every member of the room except the
//! publisher. Delivery is best-effort and fire-and-forget: nothing is queued
//! for absent subscribers and a failed send to one subscriber never affects
//! the others.
//!
//! Room membership is ephemeral and lost on restart. The bus is an explicit
//! instance owned by [`crate::server::AppState`]; there is no global.

use std::collections::{HashMap, HashSet};
use std::fmt;

use axum::extract::ws::Message;
use taskboard_proto::bus::{self, BusMessage};
use taskboard_proto::codec::CodecError;
use taskboard_proto::event::TaskChangeEvent;
use taskboard_proto::task::WorkspaceId;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

/// Server-assigned identifier of one WebSocket connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Creates a new time-ordered connection id (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors returned by bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The connection was never registered or has already disconnected.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),
    /// Failed to encode the outbound frame.
    #[error("encoding failed: {0}")]
    Encoding(#[from] CodecError),
}

/// Outcome of a single [`EventBus::publish`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Subscribers the frame was handed to.
    pub delivered: usize,
    /// Subscribers whose channel was broken; they have been disconnected.
    pub failed: usize,
}

/// Room-based publish/subscribe relay.
///
/// Thread-safe via [`RwLock`]. The two tables are never locked at the same
/// time, so there is no lock ordering to get wrong.
pub struct EventBus {
    /// Outbound channel of every live connection.
    connections: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<Message>>>,
    /// Room -> member connections.
    rooms: RwLock<HashMap<WorkspaceId, HashSet<ConnectionId>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Records the outbound channel of a new connection.
    ///
    /// Returns the previous sender if the id was already registered.
    pub async fn register(
        &self,
        connection: &ConnectionId,
        sender: mpsc::UnboundedSender<Message>,
    ) -> Option<mpsc::UnboundedSender<Message>> {
        let mut conns = self.connections.write().await;
        conns.insert(connection.clone(), sender)
    }

    /// Subscribes a connection to a room.
    ///
    /// Returns `true` if the connection was newly added, `false` if it was
    /// already a member. No capacity limit and no authorization check.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnknownConnection`] if the connection is not registered.
    pub async fn join(
        &self,
        connection: &ConnectionId,
        room: &WorkspaceId,
    ) -> Result<bool, BusError> {
        if !self.connections.read().await.contains_key(connection) {
            return Err(BusError::UnknownConnection(connection.clone()));
        }
        let mut rooms = self.rooms.write().await;
        let added = rooms
            .entry(room.clone())
            .or_default()
            .insert(connection.clone());
        drop(rooms);
        Ok(added)
    }

    /// Unsubscribes a connection from one room.
    ///
    /// Returns `true` if the connection was a member.
    pub async fn leave(&self, connection: &ConnectionId, room: &WorkspaceId) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(room) else {
            return false;
        };
        let removed = members.remove(connection);
        if members.is_empty() {
            rooms.remove(room);
        }
        removed
    }

    /// Relays `event` to every member of `room` except `from`.
    ///
    /// Each subscriber is sent to independently. A subscriber whose channel
    /// is closed is logged, counted as failed and disconnected; the rest of
    /// the room still receives the event. The publisher does not need to be
    /// a member of the room.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Encoding`] if the frame cannot be encoded, in
    /// which case nothing is delivered.
    pub async fn publish(
        &self,
        from: &ConnectionId,
        room: &WorkspaceId,
        event: TaskChangeEvent,
    ) -> Result<DeliveryReport, BusError> {
        let kind = event.kind();
        let recipients: Vec<ConnectionId> = {
            let rooms = self.rooms.read().await;
            let Some(members) = rooms.get(room) else {
                tracing::debug!(from = %from, room = %room, event = %kind, "publish to empty room");
                return Ok(DeliveryReport::default());
            };
            if !members.contains(from) {
                tracing::debug!(from = %from, room = %room, "publisher is not a room member");
            }
            members.iter().filter(|c| *c != from).cloned().collect()
        };

        let frame = bus::encode(&BusMessage::Event {
            workspace_id: room.clone(),
            event,
        })?;
        let message = Message::Binary(frame.into());

        let mut report = DeliveryReport::default();
        let mut broken = Vec::new();
        {
            let conns = self.connections.read().await;
            for recipient in &recipients {
                let sent = conns
                    .get(recipient)
                    .is_some_and(|sender| sender.send(message.clone()).is_ok());
                if sent {
                    report.delivered += 1;
                } else {
                    tracing::warn!(
                        to = %recipient,
                        room = %room,
                        event = %kind,
                        "delivery to subscriber failed, dropping connection"
                    );
                    report.failed += 1;
                    broken.push(recipient.clone());
                }
            }
        }

        for connection in &broken {
            self.disconnect(connection).await;
        }

        tracing::debug!(
            from = %from,
            room = %room,
            event = %kind,
            delivered = report.delivered,
            failed = report.failed,
            "published event"
        );
        Ok(report)
    }

    /// Sends a protocol frame to one connection.
    ///
    /// Returns `false` if the connection is unknown, its channel is closed,
    /// or the frame cannot be encoded.
    pub async fn send_to(&self, connection: &ConnectionId, msg: &BusMessage) -> bool {
        let bytes = match bus::encode(msg) {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode bus frame");
                return false;
            }
        };
        let conns = self.connections.read().await;
        conns
            .get(connection)
            .is_some_and(|sender| sender.send(Message::Binary(bytes.into())).is_ok())
    }

    /// Removes a connection from every room and from the connection table.
    ///
    /// Idempotent: returns `false` if the connection was already gone.
    pub async fn disconnect(&self, connection: &ConnectionId) -> bool {
        let existed = self.connections.write().await.remove(connection).is_some();
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(connection);
            !members.is_empty()
        });
        drop(rooms);
        existed
    }

    /// Returns the members of a room.
    pub async fn members(&self, room: &WorkspaceId) -> Vec<ConnectionId> {
        let rooms = self.rooms.read().await;
        rooms
            .get(room)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Sends a WebSocket Close frame to every connection.
    ///
    /// Each connection's writer task forwards the frame and the client sees
    /// the disconnect. Used on graceful shutdown.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (connection, sender) in conns.iter() {
            tracing::info!(connection = %connection, "sending close frame");
            let _ = sender.send(Message::Close(None));
        }
    }
}
