//! Shared data model and wire protocol for Taskboard.

pub mod api;
pub mod bus;
pub mod codec;
pub mod event;
pub mod task;
