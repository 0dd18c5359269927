// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! Optimistic mutations rejected by the real REST API.
//!
//! A rejected mutation must leave the caller's cache exactly as it was before
//! the attempt and must not publish anything to the workspace.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use taskboard::bus_client::{BusClient, BusOptions};
use taskboard::cache::ClientCache;
use taskboard::mutation::{MutationCoordinator, MutationError};
use taskboard::remote::{HttpTaskStore, RemoteError};
use taskboard::session::{SessionConfig, WorkspaceSession};
use taskboard_proto::api::RegisterRequest;
use taskboard_proto::task::{Task, TaskDraft, TaskId, TaskPatch, TaskPriority, WorkspaceId};
use taskboard_server::auth::{DEFAULT_TOKEN_TTL, MIN_HASH_COST, TokenIssuer};
use taskboard_server::server::{AppState, start_server_with_state};
use taskboard_server::store::JsonStore;

// =============================================================================
// Helpers
// =============================================================================

struct Server {
    addr: std::net::SocketAddr,
    _dir: tempfile::TempDir,
}

impl Server {
    async fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::open(dir.path()).await.unwrap();
        let state = Arc::new(AppState::new(
            store,
            TokenIssuer::new(b"integration-secret", DEFAULT_TOKEN_TTL),
        )
        .with_hash_cost(MIN_HASH_COST));
        let (addr, _handle) = start_server_with_state("127.0.0.1:0", state)
            .await
            .expect("failed to start server");
        Self { addr, _dir: dir }
    }

    fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn bus_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    async fn register(&self, email: &str) -> (HttpTaskStore, String) {
        let mut store = HttpTaskStore::new(&self.http_url()).unwrap();
        let resp = store
            .register(&RegisterRequest {
                name: "Tester".to_string(),
                email: email.to_string(),
                password: "secret1".to_string(),
            })
            .await
            .unwrap();
        (store, resp.user.id)
    }

    async fn open(&self, email: &str) -> WorkspaceSession {
        let (store, user_id) = self.register(email).await;
        WorkspaceSession::open(store, SessionConfig {
            bus_url: self.bus_url(),
            workspace: ws("W1"),
            user_id,
            bus: BusOptions::default(),
        })
        .await
        .unwrap()
    }
}

fn ws(id: &str) -> WorkspaceId {
    WorkspaceId::parse(id).unwrap()
}

async fn wait_for_rows(session: &WorkspaceSession, len: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while session.tasks().len() != len {
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {len} rows, have {:?}",
            session.tasks()
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn assert_api_status(result: Result<impl std::fmt::Debug, MutationError>, status: StatusCode) {
    match result {
        Err(MutationError::Remote(e)) => assert_eq!(e.status(), Some(status), "error: {e}"),
        other => panic!("expected remote {status}, got {other:?}"),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn forbidden_update_rolls_back_and_publishes_nothing() {
    let server = Server::start().await;
    let owner = server.open("owner@example.com").await;
    let other = server.open("other@example.com").await;

    let task = owner.create(TaskDraft::new("Mine")).await.unwrap();
    wait_for_rows(&other, 1).await;
    let before = other.tasks();

    let patch = TaskPatch {
        title: Some("Hijacked".to_string()),
        priority: Some(TaskPriority::High),
        ..TaskPatch::default()
    };
    assert_api_status(other.update(&task.id, patch).await, StatusCode::FORBIDDEN);
    assert_eq!(other.tasks(), before);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(owner.tasks(), vec![task]);
}

#[tokio::test]
async fn forbidden_delete_restores_the_row() {
    let server = Server::start().await;
    let owner = server.open("owner@example.com").await;
    let other = server.open("other@example.com").await;

    let task = owner.create(TaskDraft::new("Keep me")).await.unwrap();
    wait_for_rows(&other, 1).await;

    assert_api_status(other.delete(&task.id).await, StatusCode::FORBIDDEN);
    assert_eq!(other.tasks(), vec![task.clone()]);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(owner.tasks(), vec![task]);
}

#[tokio::test]
async fn delete_of_unknown_task_restores_the_row() {
    let server = Server::start().await;
    let session = server.open("ada@example.com").await;
    let ghost = Task::from_draft(TaskId::from("ghost"), &TaskDraft::new("Ghost"), "u1", 1);
    session.cache().apply_create(session.workspace(), ghost.clone());

    assert_api_status(session.delete(&ghost.id).await, StatusCode::NOT_FOUND);
    assert_eq!(session.tasks(), vec![ghost]);
}

#[tokio::test]
async fn rejected_create_leaves_no_pending_row() {
    let server = Server::start().await;
    let watcher = server.open("watcher@example.com").await;

    let cache = Arc::new(ClientCache::new());
    let existing = Task::from_draft(TaskId::from("t1"), &TaskDraft::new("Existing"), "u1", 1);
    cache.apply_create(&ws("W1"), existing.clone());
    let bus = BusClient::connect(&server.bus_url(), Arc::clone(&cache))
        .await
        .unwrap();
    bus.join(&ws("W1")).await.unwrap();
    let store = HttpTaskStore::new(&server.http_url())
        .unwrap()
        .with_token("not-a-real-token");
    let coordinator = MutationCoordinator::new(Arc::clone(&cache), store, bus);

    let result = coordinator.create(&ws("W1"), TaskDraft::new("Doomed")).await;
    assert_api_status(result, StatusCode::UNAUTHORIZED);
    assert_eq!(cache.tasks(&ws("W1")), vec![existing]);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(watcher.tasks().is_empty());
}

#[tokio::test]
async fn invalid_draft_is_refused_before_any_request() {
    let server = Server::start().await;
    let session = server.open("ada@example.com").await;
    let mut changes = session.cache().subscribe();

    let result = session.create(TaskDraft::new("")).await;
    assert!(matches!(result, Err(MutationError::Validation(_))));
    assert!(changes.try_recv().is_err());
    assert!(session.tasks().is_empty());
}

#[tokio::test]
async fn store_unreachable_surfaces_transport_error() {
    let server = Server::start().await;
    let session_cache = Arc::new(ClientCache::new());
    let bus = BusClient::connect(&server.bus_url(), Arc::clone(&session_cache))
        .await
        .unwrap();
    let store = HttpTaskStore::new("http://127.0.0.1:1")
        .unwrap()
        .with_token("t");
    let coordinator = MutationCoordinator::new(Arc::clone(&session_cache), store, bus);

    let result = coordinator
        .update(&ws("W1"), &TaskId::from("t1"), TaskPatch {
            title: Some("x".to_string()),
            ..TaskPatch::default()
        })
        .await;
    assert!(matches!(
        result,
        Err(MutationError::Remote(RemoteError::Transport(_)))
    ));
    assert!(session_cache.tasks(&ws("W1")).is_empty());
}
