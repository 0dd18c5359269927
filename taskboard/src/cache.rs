//! Client Cache: per-workspace task lists held in memory.
//!
//! Each workspace has one ordered list of tasks ([`TaskRows`]); order is
//! render order. The list is written by two parties only: the mutation
//! coordinator (optimistic edits, reconciliation, rollback) and the bus
//! client (events from other sessions). All writes are short synchronous
//! critical sections under one [`RwLock`], so readers never observe a
//! partially applied change.
//!
//! The cache carries an epoch counter. [`ClientCache::reset`] clears every
//! entry and bumps the epoch; a continuation that captured an older epoch
//! uses [`ClientCache::write_at`] and finds its write refused.

use std::collections::HashMap;

use parking_lot::RwLock;
use taskboard_proto::event::TaskChangeEvent;
use taskboard_proto::task::{Task, TaskId, TaskPatch, WorkspaceId};
use tokio::sync::broadcast;

/// Capacity of the change notification channel.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Ordered task list of one workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskRows(Vec<Task>);

impl TaskRows {
    /// Wraps an existing list.
    #[must_use]
    pub const fn new(tasks: Vec<Task>) -> Self {
        Self(tasks)
    }

    /// The tasks in render order.
    #[must_use]
    pub fn as_slice(&self) -> &[Task] {
        &self.0
    }

    fn position(&self, id: &TaskId) -> Option<usize> {
        self.0.iter().position(|t| &t.id == id)
    }

    /// Appends `task`, or replaces the row with the same id in place.
    pub fn upsert(&mut self, task: Task) {
        match self.position(&task.id) {
            Some(i) => self.0[i] = task,
            None => self.0.push(task),
        }
    }

    /// Replaces the row with the same id. Returns `false` if absent.
    pub fn replace(&mut self, task: Task) -> bool {
        let Some(i) = self.position(&task.id) else {
            return false;
        };
        self.0[i] = task;
        true
    }

    /// Removes the row with this id. Returns `false` if absent.
    pub fn remove(&mut self, id: &TaskId) -> bool {
        let Some(i) = self.position(id) else {
            return false;
        };
        self.0.remove(i);
        true
    }

    /// Merges `patch` into the row with this id. Returns `false` if absent.
    pub fn merge_patch(&mut self, id: &TaskId, patch: &TaskPatch) -> bool {
        let Some(i) = self.position(id) else {
            return false;
        };
        patch.apply_to(&mut self.0[i]);
        true
    }

    /// Swaps the pending row for the authoritative one, keeping its position.
    ///
    /// If a row with the authoritative id is already present (a refetch got
    /// there first) the pending row is dropped and that row is replaced.
    /// Returns `false` if the pending row is gone.
    pub fn reconcile_created(&mut self, pending_id: &TaskId, task: Task) -> bool {
        let Some(i) = self.position(pending_id) else {
            return false;
        };
        if let Some(existing) = self.position(&task.id) {
            self.0[existing] = task;
            self.0.remove(i);
        } else {
            self.0[i] = task;
        }
        true
    }

    /// Applies a change announced by another session.
    ///
    /// `Created` upserts, `Updated` replaces if present, `Deleted` removes if
    /// present. Returns `true` if the list changed.
    pub fn apply_event(&mut self, event: &TaskChangeEvent) -> bool {
        match event {
            TaskChangeEvent::Created { task } => {
                self.upsert(task.clone());
                true
            }
            TaskChangeEvent::Updated { task } => self.replace(task.clone()),
            TaskChangeEvent::Deleted { task_id } => self.remove(task_id),
        }
    }
}

/// Value-type capture of one workspace's list.
///
/// Independent of later cache changes; restoring it reinstates the list
/// exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSnapshot {
    workspace: WorkspaceId,
    epoch: u64,
    rows: TaskRows,
}

impl CacheSnapshot {
    /// Workspace the snapshot was taken of.
    #[must_use]
    pub const fn workspace(&self) -> &WorkspaceId {
        &self.workspace
    }

    /// Cache epoch at capture time.
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// The captured tasks.
    #[must_use]
    pub fn tasks(&self) -> &[Task] {
        self.rows.as_slice()
    }
}

struct Inner {
    epoch: u64,
    entries: HashMap<WorkspaceId, TaskRows>,
}

/// In-memory materialized view of every workspace the client has opened.
pub struct ClientCache {
    inner: RwLock<Inner>,
    changes: broadcast::Sender<WorkspaceId>,
}

impl Default for ClientCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientCache {
    /// Creates an empty cache at epoch 0.
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner {
                epoch: 0,
                entries: HashMap::new(),
            }),
            changes,
        }
    }

    /// Current epoch.
    pub fn epoch(&self) -> u64 {
        self.inner.read().epoch
    }

    /// Subscribes to change notifications. Each message names the workspace
    /// whose list changed.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkspaceId> {
        self.changes.subscribe()
    }

    /// Clone of the workspace's list; creates an empty entry on first use.
    pub fn tasks(&self, workspace: &WorkspaceId) -> Vec<Task> {
        if let Some(rows) = self.inner.read().entries.get(workspace) {
            return rows.as_slice().to_vec();
        }
        self.inner
            .write()
            .entries
            .entry(workspace.clone())
            .or_default()
            .as_slice()
            .to_vec()
    }

    /// Runs `f` on the workspace's rows if the cache is still at `epoch`.
    ///
    /// Returns `None` without touching the cache when the epoch has moved on.
    /// `f` returns whether it changed anything; subscribers are notified only
    /// if it did.
    pub fn write_at(
        &self,
        epoch: u64,
        workspace: &WorkspaceId,
        f: impl FnOnce(&mut TaskRows) -> bool,
    ) -> Option<bool> {
        self.write(Some(epoch), workspace, f)
    }

    fn write(
        &self,
        expected_epoch: Option<u64>,
        workspace: &WorkspaceId,
        f: impl FnOnce(&mut TaskRows) -> bool,
    ) -> Option<bool> {
        let mut inner = self.inner.write();
        if let Some(expected) = expected_epoch
            && expected != inner.epoch
        {
            tracing::debug!(
                workspace = %workspace,
                expected,
                current = inner.epoch,
                "stale cache write skipped"
            );
            return None;
        }
        let changed = f(inner.entries.entry(workspace.clone()).or_default());
        drop(inner);
        if changed {
            let _ = self.changes.send(workspace.clone());
        }
        Some(changed)
    }

    /// Appends the task, or replaces it in place if the id is present.
    pub fn apply_create(&self, workspace: &WorkspaceId, task: Task) {
        self.write(None, workspace, |rows| {
            rows.upsert(task);
            true
        });
    }

    /// Replaces the task by id. Returns `false` (and changes nothing) if absent.
    pub fn apply_update(&self, workspace: &WorkspaceId, task: Task) -> bool {
        self.write(None, workspace, |rows| rows.replace(task))
            .unwrap_or(false)
    }

    /// Removes the task by id. Returns `false` if absent.
    pub fn apply_delete(&self, workspace: &WorkspaceId, id: &TaskId) -> bool {
        self.write(None, workspace, |rows| rows.remove(id))
            .unwrap_or(false)
    }

    /// Merges a patch into the task with this id. Returns `false` if absent.
    pub fn merge_patch(&self, workspace: &WorkspaceId, id: &TaskId, patch: &TaskPatch) -> bool {
        self.write(None, workspace, |rows| rows.merge_patch(id, patch))
            .unwrap_or(false)
    }

    /// Swaps a pending row for its authoritative task.
    pub fn reconcile_created(&self, workspace: &WorkspaceId, pending_id: &TaskId, task: Task) -> bool {
        self.write(None, workspace, |rows| rows.reconcile_created(pending_id, task))
            .unwrap_or(false)
    }

    /// Applies an event from another session. Returns `true` if the list changed.
    pub fn apply_event(&self, workspace: &WorkspaceId, event: &TaskChangeEvent) -> bool {
        self.write(None, workspace, |rows| rows.apply_event(event))
            .unwrap_or(false)
    }

    /// Captures the workspace's list as a value.
    pub fn snapshot(&self, workspace: &WorkspaceId) -> CacheSnapshot {
        let inner = self.inner.read();
        CacheSnapshot {
            workspace: workspace.clone(),
            epoch: inner.epoch,
            rows: inner.entries.get(workspace).cloned().unwrap_or_default(),
        }
    }

    /// Captures the workspace's list, then runs `f` on it under the same lock.
    ///
    /// No other write can land between the capture and `f`.
    pub fn snapshot_then(
        &self,
        workspace: &WorkspaceId,
        f: impl FnOnce(&mut TaskRows) -> bool,
    ) -> CacheSnapshot {
        let mut inner = self.inner.write();
        let epoch = inner.epoch;
        let rows = inner.entries.entry(workspace.clone()).or_default();
        let snapshot = CacheSnapshot {
            workspace: workspace.clone(),
            epoch,
            rows: rows.clone(),
        };
        let changed = f(rows);
        drop(inner);
        if changed {
            let _ = self.changes.send(workspace.clone());
        }
        snapshot
    }

    /// Reinstates a snapshot exactly.
    ///
    /// Refused (returns `false`) if the cache was reset since the snapshot
    /// was taken.
    pub fn restore(&self, snapshot: CacheSnapshot) -> bool {
        let CacheSnapshot {
            workspace,
            epoch,
            rows,
        } = snapshot;
        self.write(Some(epoch), &workspace, |current| {
            *current = rows;
            true
        })
        .is_some()
    }

    /// Rebuilds the workspace's list from a full refetch.
    pub fn replace(&self, workspace: &WorkspaceId, tasks: Vec<Task>) {
        self.write(None, workspace, |rows| {
            *rows = TaskRows::new(tasks);
            true
        });
    }

    /// Drops every entry and bumps the epoch. Returns the new epoch.
    pub fn reset(&self) -> u64 {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.epoch += 1;
        let epoch = inner.epoch;
        drop(inner);
        tracing::debug!(epoch, "cache reset");
        epoch
    }
}
