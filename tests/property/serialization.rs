//! Property-based wire format tests.
//!
//! Uses proptest to verify:
//! 1. Any valid `BusMessage` survives encode → decode.
//! 2. Random bytes never cause a panic in `decode` (returns `Err` gracefully).
//! 3. Event validation agrees with task title validation.
//! 4. Status and priority text forms parse back to the same value.

use proptest::prelude::*;
use taskboard_proto::bus::{self, BusMessage};
use taskboard_proto::event::TaskChangeEvent;
use taskboard_proto::task::{
    MAX_TASK_TITLE_LENGTH, Task, TaskId, TaskPriority, TaskStatus, WorkspaceId,
};

// --- Strategies ---

fn arb_status() -> impl Strategy<Value = TaskStatus> {
    prop_oneof![
        Just(TaskStatus::Todo),
        Just(TaskStatus::InProgress),
        Just(TaskStatus::Completed),
    ]
}

fn arb_priority() -> impl Strategy<Value = TaskPriority> {
    prop_oneof![
        Just(TaskPriority::Low),
        Just(TaskPriority::Medium),
        Just(TaskPriority::High),
    ]
}

fn arb_task_id() -> impl Strategy<Value = TaskId> {
    "[0-9a-f]{1,40}".prop_map(TaskId::from)
}

fn arb_workspace() -> impl Strategy<Value = WorkspaceId> {
    "[A-Za-z0-9_-]{1,32}".prop_map(|s| WorkspaceId::parse(s).unwrap_or_else(|_| unreachable!()))
}

fn arb_task() -> impl Strategy<Value = Task> {
    (
        arb_task_id(),
        "[^\x00]{1,128}",
        proptest::option::of("[^\x00]{0,256}"),
        arb_status(),
        arb_priority(),
        "[a-z0-9]{1,16}",
        any::<u64>(),
        any::<u64>(),
    )
        .prop_map(
            |(id, title, description, status, priority, user_id, created_at, updated_at)| Task {
                id,
                title,
                description,
                status,
                priority,
                user_id,
                created_at,
                updated_at,
            },
        )
}

fn arb_event() -> impl Strategy<Value = TaskChangeEvent> {
    prop_oneof![
        arb_task().prop_map(|task| TaskChangeEvent::Created { task }),
        arb_task().prop_map(|task| TaskChangeEvent::Updated { task }),
        arb_task_id().prop_map(|task_id| TaskChangeEvent::Deleted { task_id }),
    ]
}

fn arb_bus_message() -> impl Strategy<Value = BusMessage> {
    prop_oneof![
        "[a-f0-9-]{1,36}".prop_map(|connection_id| BusMessage::Welcome { connection_id }),
        arb_workspace().prop_map(|workspace_id| BusMessage::Join { workspace_id }),
        arb_workspace().prop_map(|workspace_id| BusMessage::Joined { workspace_id }),
        arb_workspace().prop_map(|workspace_id| BusMessage::Leave { workspace_id }),
        (arb_workspace(), arb_event())
            .prop_map(|(workspace_id, event)| BusMessage::Publish {
                workspace_id,
                event
            }),
        (arb_workspace(), arb_event()).prop_map(|(workspace_id, event)| BusMessage::Event {
            workspace_id,
            event
        }),
        ".*".prop_map(|reason| BusMessage::Error { reason }),
    ]
}

// --- Properties ---

proptest! {
    #[test]
    fn bus_message_round_trips(msg in arb_bus_message()) {
        let bytes = bus::encode(&msg).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let decoded = bus::decode(&bytes).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(msg, decoded);
    }

    #[test]
    fn random_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = bus::decode(&bytes);
    }

    #[test]
    fn event_validation_tracks_title_rules(task in arb_task(), title in "[^\x00]{0,300}") {
        let mut task = task;
        task.title = title.clone();
        let event = TaskChangeEvent::Updated { task };
        let title_ok = !title.trim().is_empty() && title.chars().count() <= MAX_TASK_TITLE_LENGTH;
        prop_assert_eq!(event.validate().is_ok(), title_ok);
    }

    #[test]
    fn status_and_priority_text_forms_parse_back(status in arb_status(), priority in arb_priority()) {
        prop_assert_eq!(status.to_string().parse::<TaskStatus>().ok(), Some(status));
        prop_assert_eq!(priority.to_string().parse::<TaskPriority>().ok(), Some(priority));
    }
}
