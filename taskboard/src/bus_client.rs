//! WebSocket client for the Event Bus.
//!
//! [`BusClient::connect`] upgrades to the server's `/ws` endpoint, waits for
//! the `Welcome` frame, and spawns a background reader. The reader applies
//! every validated `Event` frame for a joined workspace straight to the
//! [`ClientCache`]; replies to `Join` are handed back to [`BusClient::join`].
//!
//! Outbound frames share the write half behind an async mutex, so
//! publishes from concurrent mutations are serialized per connection.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use taskboard_proto::bus::BusMessage;
use taskboard_proto::codec::{self, CodecError};
use taskboard_proto::event::TaskChangeEvent;
use taskboard_proto::task::WorkspaceId;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::cache::ClientCache;
use crate::mutation::EventPublisher;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WsSender = futures_util::stream::SplitSink<WsStream, Message>;
type WsReader = futures_util::stream::SplitStream<WsStream>;

/// Default timeout for the WebSocket upgrade plus `Welcome`.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a `Joined` acknowledgment.
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest inbound frame accepted from the server.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Errors from the bus connection.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Connect, welcome, or join acknowledgment took too long.
    #[error("timed out waiting for the event bus")]
    Timeout,
    /// The connection is gone.
    #[error("event bus connection closed")]
    ConnectionClosed,
    /// The WebSocket upgrade failed.
    #[error("failed to connect to event bus: {0}")]
    Connect(String),
    /// The server sent something out of protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The server answered with an `Error` frame.
    #[error("rejected by server: {0}")]
    Rejected(String),
}

/// Timeouts and limits for a [`BusClient`].
#[derive(Debug, Clone, Copy)]
pub struct BusOptions {
    /// Timeout for the upgrade plus `Welcome`.
    pub connect_timeout: Duration,
    /// Timeout for a `Joined` acknowledgment.
    pub join_timeout: Duration,
    /// Largest inbound frame accepted.
    pub max_frame_size: usize,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Replies the reader routes back to a waiting `join`.
#[derive(Debug)]
enum Reply {
    Joined(WorkspaceId),
    Error(String),
}

/// A live connection to the Event Bus.
pub struct BusClient {
    connection_id: String,
    url: String,
    options: BusOptions,
    ws_sender: Arc<Mutex<WsSender>>,
    replies: Mutex<mpsc::Receiver<Reply>>,
    joined: Arc<parking_lot::Mutex<HashSet<WorkspaceId>>>,
    connected: Arc<watch::Sender<bool>>,
    reader_handle: tokio::task::JoinHandle<()>,
}

impl BusClient {
    /// Connects with default options.
    ///
    /// # Errors
    ///
    /// See [`BusClient::connect_with`].
    pub async fn connect(url: &str, cache: Arc<ClientCache>) -> Result<Self, BusError> {
        Self::connect_with(url, cache, BusOptions::default()).await
    }

    /// Connects to `url` (e.g. `ws://127.0.0.1:3000/ws`).
    ///
    /// Events received for joined workspaces are applied to `cache`.
    ///
    /// # Errors
    ///
    /// - [`BusError::Timeout`] if the upgrade or `Welcome` takes too long.
    /// - [`BusError::Connect`] if the upgrade fails.
    /// - [`BusError::Protocol`] if the first frame is not `Welcome`.
    pub async fn connect_with(
        url: &str,
        cache: Arc<ClientCache>,
        options: BusOptions,
    ) -> Result<Self, BusError> {
        let (ws_sender, mut ws_reader) =
            tokio::time::timeout(options.connect_timeout, async {
                let (stream, _response) = connect_async(url).await.map_err(|e| {
                    tracing::warn!(url, error = %e, "event bus connect failed");
                    BusError::Connect(e.to_string())
                })?;
                Ok::<_, BusError>(stream.split())
            })
            .await
            .map_err(|_| {
                tracing::warn!(url, "event bus connect timed out");
                BusError::Timeout
            })??;

        let connection_id = tokio::time::timeout(
            options.connect_timeout,
            read_welcome(&mut ws_reader, options.max_frame_size),
        )
        .await
        .map_err(|_| BusError::Timeout)??;
        tracing::info!(url, connection_id = %connection_id, "connected to event bus");

        let (reply_tx, reply_rx) = mpsc::channel(16);
        let (connected, _) = watch::channel(true);
        let connected = Arc::new(connected);
        let joined = Arc::new(parking_lot::Mutex::new(HashSet::new()));

        let reader_handle = tokio::spawn(reader_loop(ReaderContext {
            ws_reader,
            cache,
            replies: reply_tx,
            joined: Arc::clone(&joined),
            connected: Arc::clone(&connected),
            max_frame_size: options.max_frame_size,
        }));

        Ok(Self {
            connection_id,
            url: url.to_string(),
            options,
            ws_sender: Arc::new(Mutex::new(ws_sender)),
            replies: Mutex::new(reply_rx),
            joined,
            connected,
            reader_handle,
        })
    }

    /// Server-assigned id from the `Welcome` frame.
    #[must_use]
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// The bus URL this client connected to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the reader still sees an open connection.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Watch channel that flips to `false` when the connection drops.
    #[must_use]
    pub fn disconnected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Joins a workspace room and waits for the server's `Joined`.
    ///
    /// # Errors
    ///
    /// - [`BusError::Rejected`] if the server answers with `Error`.
    /// - [`BusError::Timeout`] if no answer arrives in time.
    /// - [`BusError::ConnectionClosed`] if the connection is gone.
    pub async fn join(&self, workspace: &WorkspaceId) -> Result<(), BusError> {
        let mut replies = self.replies.lock().await;
        // Errors answering earlier publishes are not about this join.
        while let Ok(stale) = replies.try_recv() {
            tracing::debug!(?stale, "discarding unclaimed bus reply");
        }
        // Start accepting events before the ack so none published right
        // after it are dropped by the reader.
        self.joined.lock().insert(workspace.clone());
        let result = async {
            self.send(&BusMessage::Join {
                workspace_id: workspace.clone(),
            })
            .await?;
            tokio::time::timeout(self.options.join_timeout, async {
                loop {
                    match replies.recv().await {
                        Some(Reply::Joined(ws)) if &ws == workspace => return Ok(()),
                        Some(Reply::Joined(ws)) => {
                            tracing::debug!(workspace = %ws, "ignoring stale join ack");
                        }
                        Some(Reply::Error(reason)) => return Err(BusError::Rejected(reason)),
                        None => return Err(BusError::ConnectionClosed),
                    }
                }
            })
            .await
            .map_err(|_| BusError::Timeout)?
        }
        .await;
        match &result {
            Ok(()) => tracing::info!(workspace = %workspace, "joined workspace"),
            Err(e) => {
                self.joined.lock().remove(workspace);
                tracing::warn!(workspace = %workspace, error = %e, "join failed");
            }
        }
        result
    }

    /// Leaves a workspace room. Events for it are ignored from now on.
    ///
    /// # Errors
    ///
    /// [`BusError::ConnectionClosed`] if the frame cannot be sent.
    pub async fn leave(&self, workspace: &WorkspaceId) -> Result<(), BusError> {
        self.joined.lock().remove(workspace);
        self.send(&BusMessage::Leave {
            workspace_id: workspace.clone(),
        })
        .await
    }

    /// Workspaces currently joined.
    #[must_use]
    pub fn joined(&self) -> Vec<WorkspaceId> {
        self.joined.lock().iter().cloned().collect()
    }

    /// Sends a close frame and stops the reader.
    pub async fn close(&self) {
        let mut sender = self.ws_sender.lock().await;
        if let Err(e) = sender.send(Message::Close(None)).await {
            tracing::debug!(error = %e, "close frame not sent");
        }
        drop(sender);
        self.reader_handle.abort();
        self.connected.send_replace(false);
    }

    async fn send(&self, msg: &BusMessage) -> Result<(), BusError> {
        if !self.is_connected() {
            return Err(BusError::ConnectionClosed);
        }
        let bytes = codec::encode(msg)?;
        let mut sender = self.ws_sender.lock().await;
        sender
            .send(Message::Binary(bytes.into()))
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "event bus send failed");
                self.connected.send_replace(false);
                BusError::ConnectionClosed
            })
    }
}

impl Drop for BusClient {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

impl EventPublisher for BusClient {
    async fn publish(&self, workspace: &WorkspaceId, event: TaskChangeEvent) -> Result<(), BusError> {
        let kind = event.kind();
        self.send(&BusMessage::Publish {
            workspace_id: workspace.clone(),
            event,
        })
        .await?;
        tracing::debug!(workspace = %workspace, event = %kind, "published event");
        Ok(())
    }
}

async fn read_welcome(ws_reader: &mut WsReader, max_frame_size: usize) -> Result<String, BusError> {
    loop {
        match ws_reader.next().await {
            Some(Ok(Message::Binary(data))) => {
                return match codec::decode_bounded::<BusMessage>(&data, max_frame_size)? {
                    BusMessage::Welcome { connection_id } => Ok(connection_id),
                    other => Err(BusError::Protocol(format!(
                        "expected Welcome, got {other:?}"
                    ))),
                };
            }
            Some(Ok(Message::Close(_))) | None => return Err(BusError::ConnectionClosed),
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(BusError::Connect(e.to_string())),
        }
    }
}

struct ReaderContext {
    ws_reader: WsReader,
    cache: Arc<ClientCache>,
    replies: mpsc::Sender<Reply>,
    joined: Arc<parking_lot::Mutex<HashSet<WorkspaceId>>>,
    connected: Arc<watch::Sender<bool>>,
    max_frame_size: usize,
}

/// Reads frames until the connection ends.
///
/// Malformed frames and invalid events are logged and skipped; only a
/// close or read error ends the loop.
async fn reader_loop(mut ctx: ReaderContext) {
    while let Some(frame) = ctx.ws_reader.next().await {
        match frame {
            Ok(Message::Binary(data)) => {
                match codec::decode_bounded::<BusMessage>(&data, ctx.max_frame_size) {
                    Ok(msg) => handle_message(&ctx, msg).await,
                    Err(e) => tracing::warn!(error = %e, "malformed bus frame, skipping"),
                }
            }
            Ok(Message::Close(_)) => {
                tracing::info!("event bus closed by server");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "event bus read error");
                break;
            }
        }
    }
    ctx.connected.send_replace(false);
    tracing::info!("event bus reader exiting");
}

async fn handle_message(ctx: &ReaderContext, msg: BusMessage) {
    match msg {
        BusMessage::Event {
            workspace_id,
            event,
        } => {
            let is_joined = ctx.joined.lock().contains(&workspace_id);
            if !is_joined {
                tracing::debug!(workspace = %workspace_id, "event for unjoined workspace, skipping");
                return;
            }
            if let Err(e) = event.validate() {
                tracing::warn!(workspace = %workspace_id, error = %e, "invalid event, skipping");
                return;
            }
            let changed = ctx.cache.apply_event(&workspace_id, &event);
            tracing::debug!(
                workspace = %workspace_id,
                event = %event.kind(),
                task_id = %event.task_id(),
                changed,
                "applied remote event"
            );
        }
        BusMessage::Joined { workspace_id } => {
            let _ = ctx.replies.send(Reply::Joined(workspace_id)).await;
        }
        BusMessage::Error { reason } => {
            tracing::warn!(reason = %reason, "event bus error");
            // Nobody waits outside a join; the reply is dropped then.
            let _ = ctx.replies.try_send(Reply::Error(reason));
        }
        other => tracing::debug!(?other, "unexpected bus message"),
    }
}
