//! Taskboard client: optimistic task editing with real-time workspace sync.

pub mod bus_client;
pub mod cache;
pub mod config;
pub mod mutation;
pub mod remote;
pub mod session;
pub mod view;
