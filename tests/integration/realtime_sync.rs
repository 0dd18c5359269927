// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::future_not_send,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::missing_docs_in_private_items
)]

//! End-to-end sync between workspace sessions.
//!
//! Each test starts an in-process server (REST + Event Bus) on
//! `127.0.0.1:0` backed by a temporary data directory, then opens real
//! sessions through `HttpTaskStore` and `BusClient`.
//!
//! ## Disconnect simulation
//!
//! The reconnect test routes one session's bus connection through a TCP
//! proxy. Killing the proxy tears down that connection without touching the
//! server, exactly like a dropped network link.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use taskboard::bus_client::{BusClient, BusOptions};
use taskboard::cache::ClientCache;
use taskboard::mutation::EventPublisher;
use taskboard::remote::HttpTaskStore;
use taskboard::session::{SessionConfig, WorkspaceSession};
use taskboard_proto::api::{LoginRequest, RegisterRequest};
use taskboard_proto::event::TaskChangeEvent;
use taskboard_proto::task::{Task, TaskDraft, TaskId, TaskPatch, TaskStatus, WorkspaceId};
use taskboard_server::auth::{DEFAULT_TOKEN_TTL, MIN_HASH_COST, TokenIssuer};
use taskboard_server::server::{AppState, start_server_with_state};
use taskboard_server::store::JsonStore;

// =============================================================================
// Helpers
// =============================================================================

struct Server {
    addr: std::net::SocketAddr,
    _dir: tempfile::TempDir,
    _handle: tokio::task::JoinHandle<()>,
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
        let (addr, handle) = start_server_with_state("127.0.0.1:0", state)
            .await
            .expect("failed to start server");
        Self {
            addr,
            _dir: dir,
            _handle: handle,
        }
    }

    fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn bus_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Registers `email` and returns a logged-in store plus the user id.
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

    /// A second device for an existing account.
    async fn login(&self, email: &str) -> HttpTaskStore {
        let mut store = HttpTaskStore::new(&self.http_url()).unwrap();
        store
            .login(&LoginRequest {
                email: email.to_string(),
                password: "secret1".to_string(),
            })
            .await
            .unwrap();
        store
    }
}

fn ws(id: &str) -> WorkspaceId {
    WorkspaceId::parse(id).unwrap()
}

fn session_config(bus_url: String, workspace: &str, user_id: &str) -> SessionConfig {
    SessionConfig {
        bus_url,
        workspace: ws(workspace),
        user_id: user_id.to_string(),
        bus: BusOptions::default(),
    }
}

/// Polls `pred` against the session's task list for up to five seconds.
async fn wait_until(session: &WorkspaceSession, what: &str, pred: impl Fn(&[Task]) -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if pred(&session.tasks()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}; tasks: {:?}", session.tasks());
}

/// Opens two sessions of one account on workspace `W1`.
async fn two_devices(server: &Server) -> (WorkspaceSession, WorkspaceSession) {
    let (store_a, user_id) = server.register("ada@example.com").await;
    let store_b = server.login("ada@example.com").await;
    let a = WorkspaceSession::open(store_a, session_config(server.bus_url(), "W1", &user_id))
        .await
        .unwrap();
    let b = WorkspaceSession::open(store_b, session_config(server.bus_url(), "W1", &user_id))
        .await
        .unwrap();
    (a, b)
}

// =============================================================================
// TCP proxy
// =============================================================================

/// Forwards one port to the server; `kill()` severs every proxied stream.
struct TcpProxy {
    port: u16,
    accept_handle: tokio::task::JoinHandle<()>,
    conn_handles: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl TcpProxy {
    async fn start(port: u16, backend: std::net::SocketAddr) -> Self {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .unwrap_or_else(|e| panic!("proxy: failed to bind port {port}: {e}"));
        let port = listener.local_addr().unwrap().port();
        let conn_handles: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>> =
            Arc::new(Mutex::new(Vec::new()));
        let tracked = Arc::clone(&conn_handles);

        let accept_handle = tokio::spawn(async move {
            while let Ok((mut client, _)) = listener.accept().await {
                let conn = tokio::spawn(async move {
                    let Ok(mut upstream) = tokio::net::TcpStream::connect(backend).await else {
                        return;
                    };
                    let _ = tokio::io::copy_bidirectional(&mut client, &mut upstream).await;
                });
                tracked.lock().push(conn);
            }
        });

        Self {
            port,
            accept_handle,
            conn_handles,
        }
    }

    fn bus_url(&self) -> String {
        format!("ws://127.0.0.1:{}/ws", self.port)
    }

    fn kill(self) {
        self.accept_handle.abort();
        for h in self.conn_handles.lock().iter() {
            h.abort();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn create_in_one_session_appears_in_the_other() {
    let server = Server::start().await;
    let (a, b) = two_devices(&server).await;

    let created = a.create(TaskDraft::new("Write docs")).await.unwrap();
    assert!(!created.id.is_pending());
    assert_eq!(a.tasks(), vec![created.clone()]);

    wait_until(&b, "created task", |tasks| tasks == [created.clone()]).await;
}

#[tokio::test]
async fn update_and_delete_propagate() {
    let server = Server::start().await;
    let (a, b) = two_devices(&server).await;

    let task = a.create(TaskDraft::new("Ship it")).await.unwrap();
    wait_until(&b, "created task", |tasks| tasks.len() == 1).await;

    let patch = TaskPatch {
        status: Some(TaskStatus::Completed),
        ..TaskPatch::default()
    };
    let updated = b.update(&task.id, patch).await.unwrap();
    assert_eq!(updated.status, TaskStatus::Completed);
    wait_until(&a, "updated task", |tasks| {
        tasks.len() == 1 && tasks[0].status == TaskStatus::Completed
    })
    .await;

    a.delete(&task.id).await.unwrap();
    assert!(a.tasks().is_empty());
    wait_until(&b, "deleted task", <[Task]>::is_empty).await;
}

#[tokio::test]
async fn other_workspaces_see_nothing() {
    let server = Server::start().await;
    let (store_a, user_id) = server.register("ada@example.com").await;
    let store_c = server.login("ada@example.com").await;
    let a = WorkspaceSession::open(store_a, session_config(server.bus_url(), "W1", &user_id))
        .await
        .unwrap();
    let c = WorkspaceSession::open(store_c, session_config(server.bus_url(), "W2", &user_id))
        .await
        .unwrap();

    a.create(TaskDraft::new("Only for W1")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(c.tasks().is_empty());
    assert!(c.cache().tasks(&ws("W1")).is_empty());
}

#[tokio::test]
async fn update_for_unknown_task_leaves_peer_unchanged() {
    let server = Server::start().await;
    let (a, b) = two_devices(&server).await;
    let task = a.create(TaskDraft::new("Known")).await.unwrap();
    wait_until(&b, "created task", |tasks| tasks.len() == 1).await;

    let outsider = BusClient::connect(&server.bus_url(), Arc::new(ClientCache::new()))
        .await
        .unwrap();
    outsider.join(&ws("W1")).await.unwrap();
    let mut ghost = task.clone();
    ghost.id = TaskId::from("no-such-task");
    ghost.title = "Ghost".to_string();
    outsider
        .publish(&ws("W1"), TaskChangeEvent::Updated { task: ghost })
        .await
        .unwrap();

    // Frames from one connection arrive in order: once the delete has
    // emptied the list, the ghost update was already handled without
    // inserting anything.
    outsider
        .publish(&ws("W1"), TaskChangeEvent::Deleted {
            task_id: task.id.clone(),
        })
        .await
        .unwrap();
    wait_until(&b, "delete after ghost update", <[Task]>::is_empty).await;
}

#[tokio::test]
async fn initial_fetch_loads_existing_tasks() {
    let server = Server::start().await;
    let (store, user_id) = server.register("ada@example.com").await;
    let writer = WorkspaceSession::open(store, session_config(server.bus_url(), "W1", &user_id))
        .await
        .unwrap();
    writer.create(TaskDraft::new("one")).await.unwrap();
    writer.create(TaskDraft::new("two")).await.unwrap();
    writer.close().await;

    let store = server.login("ada@example.com").await;
    let reader = WorkspaceSession::open(store, session_config(server.bus_url(), "W1", &user_id))
        .await
        .unwrap();
    let titles: Vec<String> = reader.tasks().into_iter().map(|t| t.title).collect();
    assert_eq!(titles, vec!["one", "two"]);
}

#[tokio::test]
async fn every_device_resolves_the_same_owner_from_its_token() {
    let server = Server::start().await;
    let (registered, user_id) = server.register("ada@example.com").await;
    let logged_in = server.login("ada@example.com").await;
    let from_config = HttpTaskStore::new(&server.http_url())
        .unwrap()
        .with_token(logged_in.token().unwrap());

    assert_eq!(registered.user_id().as_deref(), Some(user_id.as_str()));
    assert_eq!(logged_in.user_id().as_deref(), Some(user_id.as_str()));
    assert_eq!(from_config.user_id().as_deref(), Some(user_id.as_str()));

    let session = WorkspaceSession::open(
        from_config,
        session_config(server.bus_url(), "W1", &user_id),
    )
    .await
    .unwrap();
    let task = session.create(TaskDraft::new("Mine")).await.unwrap();
    assert_eq!(task.user_id, user_id);
    session.close().await;
}

#[tokio::test]
async fn reconnect_refetches_missed_changes() {
    let server = Server::start().await;
    let (store_a, user_id) = server.register("ada@example.com").await;
    let store_b = server.login("ada@example.com").await;

    let proxy = TcpProxy::start(0, server.addr).await;
    let port = proxy.port;
    let a = WorkspaceSession::open(store_a, session_config(server.bus_url(), "W1", &user_id))
        .await
        .unwrap();
    let b = WorkspaceSession::open(store_b, session_config(proxy.bus_url(), "W1", &user_id))
        .await
        .unwrap();
    let epoch_before = b.cache().epoch();

    let mut link = b.disconnected();
    proxy.kill();
    tokio::time::timeout(Duration::from_secs(5), link.wait_for(|up| !*up))
        .await
        .expect("disconnect not detected")
        .unwrap();

    // Missed by b: its bus link is down.
    let missed = a.create(TaskDraft::new("While offline")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(b.tasks().is_empty());

    let proxy = TcpProxy::start(port, server.addr).await;
    b.reconnect().await.unwrap();
    assert!(b.cache().epoch() > epoch_before);
    assert_eq!(b.tasks(), vec![missed]);

    // Live again after the reconnect.
    let live = a.create(TaskDraft::new("After reconnect")).await.unwrap();
    wait_until(&b, "live event after reconnect", |tasks| tasks.len() == 2).await;
    assert_eq!(b.tasks()[1], live);
    proxy.kill();
}
