//! One open workspace: cache, store client, bus connection and coordinator.
//!
//! [`WorkspaceSession::open`] joins the workspace room *before* the initial
//! fetch so no event published in between is missed. [`WorkspaceSession::reconnect`]
//! resets the cache (bumping its epoch, which invalidates every in-flight
//! continuation), dials a fresh bus connection, rejoins, and refetches.

use std::sync::Arc;

use taskboard_proto::event::TaskChangeEvent;
use taskboard_proto::task::{Task, TaskDraft, TaskId, TaskPatch, WorkspaceId};
use tokio::sync::watch;

use crate::bus_client::{BusClient, BusError, BusOptions};
use crate::cache::ClientCache;
use crate::mutation::{EventPublisher, MutationCoordinator, MutationError};
use crate::remote::HttpTaskStore;

/// Errors from opening or reconnecting a session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The bus connection or join failed.
    #[error(transparent)]
    Bus(#[from] BusError),
    /// The initial fetch failed.
    #[error(transparent)]
    Fetch(#[from] MutationError),
}

/// Parameters for [`WorkspaceSession::open`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Event Bus URL (`ws://host/ws`).
    pub bus_url: String,
    /// Workspace to open.
    pub workspace: WorkspaceId,
    /// Owner recorded on optimistic rows.
    pub user_id: String,
    /// Bus timeouts and limits.
    pub bus: BusOptions,
}

/// The current bus connection, swappable on reconnect.
pub struct SharedBus {
    current: parking_lot::RwLock<Arc<BusClient>>,
}

impl SharedBus {
    fn new(client: BusClient) -> Self {
        Self {
            current: parking_lot::RwLock::new(Arc::new(client)),
        }
    }

    /// The live connection.
    #[must_use]
    pub fn current(&self) -> Arc<BusClient> {
        Arc::clone(&self.current.read())
    }

    fn swap(&self, client: BusClient) -> Arc<BusClient> {
        std::mem::replace(&mut *self.current.write(), Arc::new(client))
    }
}

impl EventPublisher for SharedBus {
    async fn publish(&self, workspace: &WorkspaceId, event: TaskChangeEvent) -> Result<(), BusError> {
        let client = self.current();
        client.publish(workspace, event).await
    }
}

/// A workspace opened for reading and optimistic editing.
pub struct WorkspaceSession {
    config: SessionConfig,
    cache: Arc<ClientCache>,
    bus: Arc<SharedBus>,
    coordinator: MutationCoordinator<Arc<HttpTaskStore>, Arc<SharedBus>>,
}

impl WorkspaceSession {
    /// Connects to the bus, joins the workspace, and fetches its tasks.
    ///
    /// # Errors
    ///
    /// [`SessionError::Bus`] if the bus is unreachable or refuses the join;
    /// [`SessionError::Fetch`] if the task list cannot be loaded.
    pub async fn open(store: HttpTaskStore, config: SessionConfig) -> Result<Self, SessionError> {
        let cache = Arc::new(ClientCache::new());
        let client = connect_and_join(&config, Arc::clone(&cache)).await?;
        let bus = Arc::new(SharedBus::new(client));
        let coordinator =
            MutationCoordinator::new(Arc::clone(&cache), Arc::new(store), Arc::clone(&bus))
                .with_user_id(config.user_id.clone());
        let session = Self {
            config,
            cache,
            bus,
            coordinator,
        };
        let tasks = session.refresh().await?;
        tracing::info!(
            workspace = %session.config.workspace,
            count = tasks.len(),
            "workspace session opened"
        );
        Ok(session)
    }

    /// The open workspace.
    #[must_use]
    pub const fn workspace(&self) -> &WorkspaceId {
        &self.config.workspace
    }

    /// The session's cache.
    #[must_use]
    pub const fn cache(&self) -> &Arc<ClientCache> {
        &self.cache
    }

    /// Current task list of the workspace.
    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        self.cache.tasks(&self.config.workspace)
    }

    /// Server-assigned id of the live bus connection.
    #[must_use]
    pub fn connection_id(&self) -> String {
        self.bus.current().connection_id().to_string()
    }

    /// Watch channel that flips to `false` when the live connection drops.
    #[must_use]
    pub fn disconnected(&self) -> watch::Receiver<bool> {
        self.bus.current().disconnected()
    }

    /// Optimistically creates a task.
    ///
    /// # Errors
    ///
    /// See [`MutationCoordinator::create`].
    pub async fn create(&self, draft: TaskDraft) -> Result<Task, MutationError> {
        self.coordinator.create(&self.config.workspace, draft).await
    }

    /// Optimistically updates a task.
    ///
    /// # Errors
    ///
    /// See [`MutationCoordinator::update`].
    pub async fn update(&self, id: &TaskId, patch: TaskPatch) -> Result<Task, MutationError> {
        self.coordinator
            .update(&self.config.workspace, id, patch)
            .await
    }

    /// Optimistically deletes a task.
    ///
    /// # Errors
    ///
    /// See [`MutationCoordinator::delete`].
    pub async fn delete(&self, id: &TaskId) -> Result<(), MutationError> {
        self.coordinator.delete(&self.config.workspace, id).await
    }

    /// Refetches the workspace's task list.
    ///
    /// # Errors
    ///
    /// See [`MutationCoordinator::refresh`].
    pub async fn refresh(&self) -> Result<Vec<Task>, MutationError> {
        self.coordinator.refresh(&self.config.workspace).await
    }

    /// Drops cached state, opens a new bus connection, and refetches.
    ///
    /// Mutations still pending against the old epoch finish without
    /// touching the rebuilt cache.
    ///
    /// # Errors
    ///
    /// [`SessionError::Bus`] if the new connection fails; the old one stays
    /// installed. [`SessionError::Fetch`] if the refetch fails.
    pub async fn reconnect(&self) -> Result<(), SessionError> {
        let epoch = self.cache.reset();
        let client = connect_and_join(&self.config, Arc::clone(&self.cache)).await?;
        let old = self.bus.swap(client);
        old.close().await;
        let tasks = self.refresh().await?;
        tracing::info!(
            workspace = %self.config.workspace,
            epoch,
            count = tasks.len(),
            "workspace session reconnected"
        );
        Ok(())
    }

    /// Leaves the workspace and closes the bus connection.
    pub async fn close(self) {
        let client = self.bus.current();
        if let Err(e) = client.leave(&self.config.workspace).await {
            tracing::debug!(error = %e, "leave not sent");
        }
        client.close().await;
        tracing::info!(workspace = %self.config.workspace, "workspace session closed");
    }
}

async fn connect_and_join(
    config: &SessionConfig,
    cache: Arc<ClientCache>,
) -> Result<BusClient, BusError> {
    let client = BusClient::connect_with(&config.bus_url, cache, config.bus).await?;
    client.join(&config.workspace).await?;
    Ok(client)
}
