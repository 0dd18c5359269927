//! Event Bus wire protocol.
//!
//! Defines the [`BusMessage`] enum that is postcard-encoded and sent over
//! WebSocket binary frames between bus clients and the server.

use serde::{Deserialize, Serialize};

use crate::codec::{self, CodecError};
use crate::event::TaskChangeEvent;
use crate::task::WorkspaceId;

/// Messages exchanged between bus clients and the server.
///
/// The protocol is deliberately small: a client joins workspace rooms and
/// publishes task change events; the server relays each event to every
/// other member of the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusMessage {
    /// Server greets a freshly upgraded connection with its id.
    ///
    /// Always the first frame the server sends.
    Welcome {
        /// Server-assigned connection identifier.
        connection_id: String,
    },

    /// Client subscribes to a workspace room.
    Join {
        /// Room to join.
        workspace_id: WorkspaceId,
    },

    /// Server confirms a `Join`.
    Joined {
        /// Room that was joined (echoed back).
        workspace_id: WorkspaceId,
    },

    /// Client unsubscribes from a workspace room.
    Leave {
        /// Room to leave.
        workspace_id: WorkspaceId,
    },

    /// Client publishes an event to a room.
    Publish {
        /// Target room.
        workspace_id: WorkspaceId,
        /// The change being announced.
        event: TaskChangeEvent,
    },

    /// Server delivers an event published by another connection.
    Event {
        /// Room the event was published to.
        workspace_id: WorkspaceId,
        /// The change.
        event: TaskChangeEvent,
    },

    /// Server reports an error condition for the last frame.
    Error {
        /// Human-readable error description.
        reason: String,
    },
}

/// Encodes a [`BusMessage`] into bytes.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if serialization fails.
pub fn encode(msg: &BusMessage) -> Result<Vec<u8>, CodecError> {
    codec::encode(msg)
}

/// Decodes a [`BusMessage`] from bytes.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if the bytes are not a valid frame.
pub fn decode(bytes: &[u8]) -> Result<BusMessage, CodecError> {
    codec::decode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Task, TaskDraft, TaskId};

    fn workspace(id: &str) -> WorkspaceId {
        WorkspaceId::parse(id).unwrap()
    }

    #[test]
    fn round_trip_publish_created() {
        let task = Task::from_draft(TaskId::from("42"), &TaskDraft::new("A"), "user-1", 1000);
        let msg = BusMessage::Publish {
            workspace_id: workspace("W1"),
            event: TaskChangeEvent::Created { task },
        };
        let bytes = encode(&msg).unwrap();
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn round_trip_event_deleted() {
        let msg = BusMessage::Event {
            workspace_id: workspace("W1"),
            event: TaskChangeEvent::Deleted {
                task_id: TaskId::from("42"),
            },
        };
        let bytes = encode(&msg).unwrap();
        assert_eq!(decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn decode_corrupted_bytes_fails() {
        let result = decode(&[0xFF, 0xFE, 0xFD, 0xFC]);
        assert!(result.is_err());
    }

    #[test]
    fn decode_empty_bytes_fails() {
        let result = decode(&[]);
        assert!(result.is_err());
    }
}
