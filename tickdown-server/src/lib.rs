//! tickdown sync server library.
//!
//! Exposes the WebSocket sync server for use in tests and embedding.
//! The server holds per-user task collections, applies client mutations,
//! and pushes full task-list snapshots to subscribed connections.

pub mod collections;
pub mod config;
pub mod server;
