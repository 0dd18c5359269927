//! Taskboard server library.
//!
//! Exposes the server for use in tests and embedding: the Event Bus that
//! relays task change events between sessions of a workspace, the JSON-file
//! store, token auth and the REST API.

pub mod api;
pub mod auth;
pub mod bus;
pub mod config;
pub mod server;
pub mod store;
pub mod ws;
