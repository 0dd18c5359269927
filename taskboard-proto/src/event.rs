//! Task change events relayed between sessions of a workspace.
//!
//! Events are transient: no sequence number, no acknowledgment, no retry.
//! `Created`/`Updated` carry a full task snapshot, `Deleted` only the id.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::task::{Task, TaskId, ValidationError};

/// A change to one task, as broadcast on the Event Bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskChangeEvent {
    /// A task was created.
    Created {
        /// Authoritative snapshot of the new task.
        task: Task,
    },
    /// A task was updated.
    Updated {
        /// Authoritative snapshot after the update.
        task: Task,
    },
    /// A task was deleted.
    Deleted {
        /// Id of the removed task.
        task_id: TaskId,
    },
}

/// Discriminant of a [`TaskChangeEvent`], used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// See [`TaskChangeEvent::Created`].
    Created,
    /// See [`TaskChangeEvent::Updated`].
    Updated,
    /// See [`TaskChangeEvent::Deleted`].
    Deleted,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "TASK_CREATED"),
            Self::Updated => write!(f, "TASK_UPDATED"),
            Self::Deleted => write!(f, "TASK_DELETED"),
        }
    }
}

impl TaskChangeEvent {
    /// Returns the event's discriminant.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Created { .. } => EventKind::Created,
            Self::Updated { .. } => EventKind::Updated,
            Self::Deleted { .. } => EventKind::Deleted,
        }
    }

    /// Returns the id of the affected task.
    #[must_use]
    pub const fn task_id(&self) -> &TaskId {
        match self {
            Self::Created { task } | Self::Updated { task } => &task.id,
            Self::Deleted { task_id } => task_id,
        }
    }

    /// Validates the payload at the boundary.
    ///
    /// Snapshots must satisfy [`Task::validate`], and no event may reference
    /// a pending (client-local) id.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Created { task } | Self::Updated { task } => task.validate()?,
            Self::Deleted { task_id } => {
                if task_id.as_str().is_empty() {
                    return Err(ValidationError::EmptyId("task id"));
                }
            }
        }
        let id = self.task_id();
        if id.is_pending() {
            return Err(ValidationError::PendingId(id.to_string()));
        }
        Ok(())
    }
}
