//! Shared server state, router and startup.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tokio::task::JoinHandle;

use crate::api;
use crate::auth::TokenIssuer;
use crate::bus::EventBus;
use crate::store::JsonStore;
use crate::ws;

/// Default maximum allowed bus frame size in bytes (64 KB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// State shared by every handler.
pub struct AppState {
    /// Room relay for task change events.
    pub bus: EventBus,
    /// Authoritative store for users and tasks.
    pub store: JsonStore,
    /// Bearer token issuer/verifier.
    pub tokens: TokenIssuer,
    /// Largest accepted bus frame in bytes.
    pub max_payload_size: usize,
    /// bcrypt cost for new password hashes.
    pub hash_cost: u32,
}

impl AppState {
    /// Creates the state with an empty bus and the default frame limit.
    #[must_use]
    pub fn new(store: JsonStore, tokens: TokenIssuer) -> Self {
        Self {
            bus: EventBus::new(),
            store,
            tokens,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            hash_cost: crate::auth::DEFAULT_HASH_COST,
        }
    }

    /// Overrides the bus frame size limit.
    #[must_use]
    pub const fn with_max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }

    /// Overrides the bcrypt cost for new password hashes.
    #[must_use]
    pub const fn with_hash_cost(mut self, hash_cost: u32) -> Self {
        self.hash_cost = hash_cost;
        self
    }
}

/// Builds the HTTP router: REST API, bus endpoint and health check.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/ws", get(ws::ws_handler))
        .route("/api/auth/register", axum::routing::post(api::register))
        .route("/api/auth/login", axum::routing::post(api::login))
        .route(
            "/api/tasks",
            get(api::list_tasks).post(api::create_task),
        )
        .route(
            "/api/tasks/{id}",
            get(api::get_task)
                .put(api::update_task)
                .delete(api::delete_task),
        )
        .with_state(state)
}

/// Binds `addr` and serves the router in a background task.
///
/// Returns the bound address (useful with port `0`) and the server task.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<AppState>,
) -> Result<(SocketAddr, JoinHandle<()>), Box<dyn std::error::Error + Send + Sync>> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "server error");
        }
    });

    Ok((bound_addr, handle))
}

/// In-process server on `127.0.0.1:0` backed by a temporary data directory.
#[cfg(test)]
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<AppState>,
    pub handle: JoinHandle<()>,
    _dir: tempfile::TempDir,
}

#[cfg(test)]
pub async fn start_test_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonStore::open(dir.path()).await.unwrap();
    let tokens = TokenIssuer::new(b"test-secret", crate::auth::DEFAULT_TOKEN_TTL);
    let state = Arc::new(AppState::new(store, tokens).with_hash_cost(crate::auth::MIN_HASH_COST));
    let (addr, handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .unwrap();
    TestServer {
        addr,
        state,
        handle,
        _dir: dir,
    }
}
