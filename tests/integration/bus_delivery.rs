// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! Event Bus delivery over raw WebSocket connections.
//!
//! These tests speak the postcard wire protocol directly, without the client
//! library, to pin down what the server guarantees: delivery to every other
//! member of a room, never to the publisher, never across rooms, and no
//! collateral damage when one subscriber goes away.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use taskboard_proto::bus::BusMessage;
use taskboard_proto::codec;
use taskboard_proto::event::TaskChangeEvent;
use taskboard_proto::task::{Task, TaskDraft, TaskId, WorkspaceId};
use taskboard_server::auth::{DEFAULT_TOKEN_TTL, TokenIssuer};
use taskboard_server::server::{AppState, start_server_with_state};
use taskboard_server::store::JsonStore;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Ws = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Helpers
// =============================================================================

async fn start_server() -> (String, Arc<AppState>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonStore::open(dir.path()).await.unwrap();
    let state = Arc::new(AppState::new(
        store,
        TokenIssuer::new(b"integration-secret", DEFAULT_TOKEN_TTL),
    ));
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start server");
    (format!("ws://{addr}/ws"), state, dir)
}

fn ws(id: &str) -> WorkspaceId {
    WorkspaceId::parse(id).unwrap()
}

fn created(id: &str, title: &str) -> TaskChangeEvent {
    TaskChangeEvent::Created {
        task: Task::from_draft(TaskId::from(id), &TaskDraft::new(title), "u1", 1),
    }
}

async fn send(conn: &mut Ws, msg: &BusMessage) {
    let bytes = codec::encode(msg).unwrap();
    conn.send(Message::Binary(bytes.into())).await.unwrap();
}

/// Next bus message, skipping non-binary frames.
async fn recv(conn: &mut Ws) -> BusMessage {
    tokio::time::timeout(RECV_TIMEOUT, async {
        loop {
            match conn.next().await {
                Some(Ok(Message::Binary(data))) => return codec::decode(&data).unwrap(),
                Some(Ok(_)) => {}
                other => panic!("connection ended: {other:?}"),
            }
        }
    })
    .await
    .expect("timed out waiting for a bus message")
}

/// Asserts that nothing arrives within a short window.
async fn assert_silent(conn: &mut Ws) {
    let result = tokio::time::timeout(Duration::from_millis(200), conn.next()).await;
    assert!(result.is_err(), "unexpected frame: {result:?}");
}

/// Connects, consumes `Welcome`, and joins `workspace`.
async fn member(url: &str, workspace: &str) -> (Ws, String) {
    let (mut conn, _) = connect_async(url).await.unwrap();
    let BusMessage::Welcome { connection_id } = recv(&mut conn).await else {
        panic!("first frame was not Welcome");
    };
    send(&mut conn, &BusMessage::Join {
        workspace_id: ws(workspace),
    })
    .await;
    assert_eq!(recv(&mut conn).await, BusMessage::Joined {
        workspace_id: ws(workspace)
    });
    (conn, connection_id)
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn event_reaches_every_other_member_only() {
    let (url, _state, _dir) = start_server().await;
    let (mut a, _) = member(&url, "W1").await;
    let (mut b, _) = member(&url, "W1").await;
    let (mut c, _) = member(&url, "W1").await;
    let (mut outsider, _) = member(&url, "W2").await;

    let event = created("t1", "hello");
    send(&mut a, &BusMessage::Publish {
        workspace_id: ws("W1"),
        event: event.clone(),
    })
    .await;

    let expected = BusMessage::Event {
        workspace_id: ws("W1"),
        event,
    };
    assert_eq!(recv(&mut b).await, expected);
    assert_eq!(recv(&mut c).await, expected);
    assert_silent(&mut a).await;
    assert_silent(&mut outsider).await;
}

#[tokio::test]
async fn joining_twice_keeps_one_membership() {
    let (url, state, _dir) = start_server().await;
    let (mut a, a_id) = member(&url, "W1").await;
    let (mut b, _) = member(&url, "W1").await;

    send(&mut a, &BusMessage::Join {
        workspace_id: ws("W1"),
    })
    .await;
    assert_eq!(recv(&mut a).await, BusMessage::Joined {
        workspace_id: ws("W1")
    });
    let members = state.bus.members(&ws("W1")).await;
    assert_eq!(members.iter().filter(|m| m.as_str() == a_id).count(), 1);

    send(&mut b, &BusMessage::Publish {
        workspace_id: ws("W1"),
        event: created("t1", "once"),
    })
    .await;
    assert!(matches!(recv(&mut a).await, BusMessage::Event { .. }));
    assert_silent(&mut a).await;
}

#[tokio::test]
async fn vanished_subscriber_does_not_block_the_rest() {
    let (url, state, _dir) = start_server().await;
    let (mut a, _) = member(&url, "W1").await;
    let (gone, _) = member(&url, "W1").await;
    let (mut c, _) = member(&url, "W1").await;

    drop(gone);
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while state.bus.connection_count().await != 2 {
        assert!(tokio::time::Instant::now() < deadline, "dropped connection never removed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    for i in 0..3 {
        send(&mut a, &BusMessage::Publish {
            workspace_id: ws("W1"),
            event: created(&format!("t{i}"), "after"),
        })
        .await;
        assert!(matches!(recv(&mut c).await, BusMessage::Event { .. }));
    }
    assert_eq!(state.bus.members(&ws("W1")).await.len(), 2);
}

#[tokio::test]
async fn events_from_one_publisher_arrive_in_order() {
    let (url, _state, _dir) = start_server().await;
    let (mut a, _) = member(&url, "W1").await;
    let (mut b, _) = member(&url, "W1").await;

    for i in 0..20 {
        send(&mut a, &BusMessage::Publish {
            workspace_id: ws("W1"),
            event: created(&format!("t{i}"), "seq"),
        })
        .await;
    }
    for i in 0..20 {
        let BusMessage::Event { event, .. } = recv(&mut b).await else {
            panic!("expected Event");
        };
        assert_eq!(event.task_id().as_str(), format!("t{i}"));
    }
}

#[tokio::test]
async fn invalid_event_is_answered_and_not_relayed() {
    let (url, _state, _dir) = start_server().await;
    let (mut a, _) = member(&url, "W1").await;
    let (mut b, _) = member(&url, "W1").await;

    send(&mut a, &BusMessage::Publish {
        workspace_id: ws("W1"),
        event: TaskChangeEvent::Deleted {
            task_id: TaskId::pending(),
        },
    })
    .await;

    let BusMessage::Error { reason } = recv(&mut a).await else {
        panic!("expected Error");
    };
    assert!(reason.starts_with("invalid event"), "reason: {reason}");
    assert_silent(&mut b).await;
}

#[tokio::test]
async fn leave_stops_delivery() {
    let (url, state, _dir) = start_server().await;
    let (mut a, _) = member(&url, "W1").await;
    let (mut b, _) = member(&url, "W1").await;

    send(&mut b, &BusMessage::Leave {
        workspace_id: ws("W1"),
    })
    .await;
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while state.bus.members(&ws("W1")).await.len() != 1 {
        assert!(tokio::time::Instant::now() < deadline, "leave never applied");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    send(&mut a, &BusMessage::Publish {
        workspace_id: ws("W1"),
        event: created("t1", "nobody"),
    })
    .await;
    assert_silent(&mut b).await;
}
