//! Mutation Coordinator: optimistic local edits backed by the remote store.
//!
//! Every user mutation runs as one [`MutationAttempt`]:
//!
//! 1. **Idle → Pending**: snapshot the workspace's cache entry (as a value),
//!    record the cache epoch, apply the optimistic change.
//! 2. Await the remote store.
//! 3. **Pending → Committed**: swap in the authoritative result, then
//!    publish the matching [`TaskChangeEvent`] to the workspace.
//!    **Pending → RolledBack**: restore the snapshot, or for a create remove
//!    just the placeholder row; nothing is published.
//!
//! Terminal transitions consume the attempt, so an attempt cannot settle
//! twice. If the cache epoch moved while the attempt was pending (session
//! reset or reconnect), the continuation leaves the cache alone. A committed
//! stale attempt still publishes: the remote write happened.

use std::future::Future;
use std::sync::Arc;

use taskboard_proto::event::TaskChangeEvent;
use taskboard_proto::task::{
    Task, TaskDraft, TaskId, TaskPatch, ValidationError, WorkspaceId, now_ms,
};

use crate::bus_client::BusError;
use crate::cache::{CacheSnapshot, ClientCache};
use crate::remote::RemoteError;

/// Authoritative task store as seen by the coordinator.
pub trait TaskStore: Send + Sync {
    /// Creates a task; the store assigns id and timestamps.
    fn create(&self, draft: &TaskDraft) -> impl Future<Output = Result<Task, RemoteError>> + Send;

    /// Applies a partial update and returns the stored task.
    fn update(
        &self,
        id: &TaskId,
        patch: &TaskPatch,
    ) -> impl Future<Output = Result<Task, RemoteError>> + Send;

    /// Deletes a task.
    fn delete(&self, id: &TaskId) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Lists every task visible to the caller.
    fn list(&self) -> impl Future<Output = Result<Vec<Task>, RemoteError>> + Send;
}

/// Outbound side of the Event Bus.
pub trait EventPublisher: Send + Sync {
    /// Announces a change to the other sessions of `workspace`.
    fn publish(
        &self,
        workspace: &WorkspaceId,
        event: TaskChangeEvent,
    ) -> impl Future<Output = Result<(), BusError>> + Send;
}

impl<T: TaskStore> TaskStore for Arc<T> {
    fn create(&self, draft: &TaskDraft) -> impl Future<Output = Result<Task, RemoteError>> + Send {
        (**self).create(draft)
    }

    fn update(
        &self,
        id: &TaskId,
        patch: &TaskPatch,
    ) -> impl Future<Output = Result<Task, RemoteError>> + Send {
        (**self).update(id, patch)
    }

    fn delete(&self, id: &TaskId) -> impl Future<Output = Result<(), RemoteError>> + Send {
        (**self).delete(id)
    }

    fn list(&self) -> impl Future<Output = Result<Vec<Task>, RemoteError>> + Send {
        (**self).list()
    }
}

impl<T: EventPublisher> EventPublisher for Arc<T> {
    fn publish(
        &self,
        workspace: &WorkspaceId,
        event: TaskChangeEvent,
    ) -> impl Future<Output = Result<(), BusError>> + Send {
        (**self).publish(workspace, event)
    }
}

/// Errors returned to the caller of a mutation.
#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    /// Input rejected before any cache change.
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),
    /// The store call failed; the optimistic change has been rolled back.
    #[error("remote store failed: {0}")]
    Remote(#[from] RemoteError),
}

/// Lifecycle state of a [`MutationAttempt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    /// Not started.
    Idle,
    /// Optimistic change applied; waiting on the store.
    Pending,
    /// Store confirmed; authoritative result reconciled.
    Committed,
    /// Store failed; optimistic change undone.
    RolledBack,
}

/// The optimistic change an attempt applies on entering Pending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Optimistic {
    /// Insert a placeholder row with a pending id.
    Create {
        /// The placeholder row.
        pending: Task,
    },
    /// Merge a patch into the row with this id.
    Update {
        /// Target row.
        id: TaskId,
        /// Fields to merge.
        patch: TaskPatch,
    },
    /// Remove the row with this id.
    Delete {
        /// Target row.
        id: TaskId,
    },
}

/// What the store confirmed for a pending attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmed {
    /// The created task, with its authoritative id.
    Created(Task),
    /// The task after the update.
    Updated(Task),
    /// The deleted task's id.
    Deleted(TaskId),
}

impl Confirmed {
    fn into_event(self) -> TaskChangeEvent {
        match self {
            Self::Created(task) => TaskChangeEvent::Created { task },
            Self::Updated(task) => TaskChangeEvent::Updated { task },
            Self::Deleted(task_id) => TaskChangeEvent::Deleted { task_id },
        }
    }
}

/// How an attempt settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settled {
    /// [`MutationState::Committed`] or [`MutationState::RolledBack`].
    pub state: MutationState,
    /// `true` if no cache write was made: the cache epoch had moved, or the
    /// attempt never left Idle.
    pub stale: bool,
}

/// One optimistic mutation, from Idle through Pending to a terminal state.
#[derive(Debug)]
pub struct MutationAttempt {
    workspace: WorkspaceId,
    op: Optimistic,
    snapshot: Option<CacheSnapshot>,
    state: MutationState,
}

impl MutationAttempt {
    /// An Idle attempt; the cache is untouched until [`Self::begin`].
    #[must_use]
    pub fn new(workspace: WorkspaceId, op: Optimistic) -> Self {
        Self {
            workspace,
            op,
            snapshot: None,
            state: MutationState::Idle,
        }
    }

    /// Idle → Pending: snapshots the entry, then applies the optimistic
    /// change under the same lock.
    ///
    /// Does nothing unless the attempt is Idle.
    pub fn begin(&mut self, cache: &ClientCache) {
        if self.state != MutationState::Idle {
            return;
        }
        let op = &self.op;
        let snapshot = cache.snapshot_then(&self.workspace, |rows| match op {
            Optimistic::Create { pending } => {
                rows.upsert(pending.clone());
                true
            }
            Optimistic::Update { id, patch } => rows.merge_patch(id, patch),
            Optimistic::Delete { id } => rows.remove(id),
        });
        tracing::debug!(workspace = %self.workspace, epoch = snapshot.epoch(), "mutation pending");
        self.snapshot = Some(snapshot);
        self.state = MutationState::Pending;
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> MutationState {
        self.state
    }

    /// Workspace the attempt applies to.
    #[must_use]
    pub const fn workspace(&self) -> &WorkspaceId {
        &self.workspace
    }

    /// Pending → Committed: reconciles the authoritative result.
    ///
    /// Returns how the attempt settled and the event to publish.
    pub fn commit(mut self, cache: &ClientCache, confirmed: Confirmed) -> (Settled, TaskChangeEvent) {
        let written = self.snapshot.as_ref().and_then(|snapshot| {
            cache.write_at(snapshot.epoch(), &self.workspace, |rows| {
                match (&self.op, &confirmed) {
                    (Optimistic::Create { pending }, Confirmed::Created(task)) => {
                        rows.reconcile_created(&pending.id, task.clone())
                    }
                    (_, Confirmed::Updated(task)) => rows.replace(task.clone()),
                    // The optimistic removal already is the final state.
                    (_, Confirmed::Deleted(_)) => false,
                    (_, Confirmed::Created(task)) => {
                        rows.upsert(task.clone());
                        true
                    }
                }
            })
        });
        self.state = MutationState::Committed;
        let settled = Settled {
            state: self.state,
            stale: written.is_none(),
        };
        tracing::debug!(
            workspace = %self.workspace,
            stale = settled.stale,
            "mutation committed"
        );
        (settled, confirmed.into_event())
    }

    /// Pending → RolledBack: undoes the optimistic change.
    ///
    /// A create removes only its placeholder row, so rows that arrived while
    /// it was pending survive. Update and delete reinstate the snapshot
    /// exactly.
    pub fn roll_back(mut self, cache: &ClientCache) -> Settled {
        let written = self.snapshot.take().and_then(|snapshot| match &self.op {
            Optimistic::Create { pending } => {
                cache.write_at(snapshot.epoch(), &self.workspace, |rows| rows.remove(&pending.id))
            }
            Optimistic::Update { .. } | Optimistic::Delete { .. } => {
                cache.restore(snapshot).then_some(true)
            }
        });
        self.state = MutationState::RolledBack;
        let stale = written.is_none();
        tracing::debug!(workspace = %self.workspace, stale, "mutation rolled back");
        Settled {
            state: self.state,
            stale,
        }
    }
}

/// Runs optimistic mutations for one user against a store and the bus.
pub struct MutationCoordinator<S, P> {
    cache: Arc<ClientCache>,
    store: S,
    publisher: P,
    user_id: String,
}

impl<S: TaskStore, P: EventPublisher> MutationCoordinator<S, P> {
    /// Creates a coordinator writing to `cache`.
    pub const fn new(cache: Arc<ClientCache>, store: S, publisher: P) -> Self {
        Self {
            cache,
            store,
            publisher,
            user_id: String::new(),
        }
    }

    /// Owner recorded on placeholder rows.
    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// The cache this coordinator writes to.
    pub const fn cache(&self) -> &Arc<ClientCache> {
        &self.cache
    }

    /// The underlying store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Optimistically creates a task.
    ///
    /// A placeholder row with a pending id appears immediately and is
    /// swapped for the authoritative task once the store confirms.
    ///
    /// # Errors
    ///
    /// [`MutationError::Validation`] before any cache change, or
    /// [`MutationError::Remote`] after the placeholder was removed again.
    pub async fn create(
        &self,
        workspace: &WorkspaceId,
        draft: TaskDraft,
    ) -> Result<Task, MutationError> {
        draft.validate()?;
        let pending = Task::from_draft(TaskId::pending(), &draft, &self.user_id, now_ms());
        let mut attempt = MutationAttempt::new(workspace.clone(), Optimistic::Create { pending });
        attempt.begin(&self.cache);
        match self.store.create(&draft).await {
            Ok(task) => {
                self.settle(attempt, Confirmed::Created(task.clone())).await;
                Ok(task)
            }
            Err(e) => Err(self.fail(attempt, e)),
        }
    }

    /// Optimistically merges `patch` into a task.
    ///
    /// # Errors
    ///
    /// [`MutationError::Validation`] before any cache change, or
    /// [`MutationError::Remote`] after the previous list was restored.
    pub async fn update(
        &self,
        workspace: &WorkspaceId,
        id: &TaskId,
        patch: TaskPatch,
    ) -> Result<Task, MutationError> {
        patch.validate()?;
        if id.is_pending() {
            return Err(ValidationError::PendingId(id.to_string()).into());
        }
        let mut attempt = MutationAttempt::new(
            workspace.clone(),
            Optimistic::Update {
                id: id.clone(),
                patch: patch.clone(),
            },
        );
        attempt.begin(&self.cache);
        match self.store.update(id, &patch).await {
            Ok(task) => {
                self.settle(attempt, Confirmed::Updated(task.clone())).await;
                Ok(task)
            }
            Err(e) => Err(self.fail(attempt, e)),
        }
    }

    /// Optimistically deletes a task.
    ///
    /// # Errors
    ///
    /// [`MutationError::Validation`] for pending ids, or
    /// [`MutationError::Remote`] after the row was restored.
    pub async fn delete(&self, workspace: &WorkspaceId, id: &TaskId) -> Result<(), MutationError> {
        if id.is_pending() {
            return Err(ValidationError::PendingId(id.to_string()).into());
        }
        let mut attempt = MutationAttempt::new(workspace.clone(), Optimistic::Delete { id: id.clone() });
        attempt.begin(&self.cache);
        match self.store.delete(id).await {
            Ok(()) => {
                self.settle(attempt, Confirmed::Deleted(id.clone())).await;
                Ok(())
            }
            Err(e) => Err(self.fail(attempt, e)),
        }
    }

    /// Refetches the task list and rebuilds the workspace's cache entry.
    ///
    /// Skipped (returns the fetched list without writing) if the cache is
    /// reset while the request is in flight.
    ///
    /// # Errors
    ///
    /// [`MutationError::Remote`] if the list call fails; the cache is untouched.
    pub async fn refresh(&self, workspace: &WorkspaceId) -> Result<Vec<Task>, MutationError> {
        let epoch = self.cache.epoch();
        let tasks = self.store.list().await?;
        let written = self.cache.write_at(epoch, workspace, |rows| {
            *rows = crate::cache::TaskRows::new(tasks.clone());
            true
        });
        tracing::debug!(
            workspace = %workspace,
            count = tasks.len(),
            stale = written.is_none(),
            "refreshed task list"
        );
        Ok(tasks)
    }

    async fn settle(&self, attempt: MutationAttempt, confirmed: Confirmed) -> Settled {
        let workspace = attempt.workspace().clone();
        let (settled, event) = attempt.commit(&self.cache, confirmed);
        let kind = event.kind();
        if let Err(e) = self.publisher.publish(&workspace, event).await {
            tracing::warn!(workspace = %workspace, event = %kind, error = %e, "failed to publish event");
        }
        settled
    }

    fn fail(&self, attempt: MutationAttempt, error: RemoteError) -> MutationError {
        let workspace = attempt.workspace().clone();
        attempt.roll_back(&self.cache);
        tracing::warn!(workspace = %workspace, error = %error, "mutation rolled back");
        MutationError::Remote(error)
    }
}
