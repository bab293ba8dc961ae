//! tickdown — to-do list with per-task countdown timers, library side.

pub mod auth;
pub mod cache;
pub mod config;
pub mod session;
pub mod store;
pub mod timer;
pub mod ui;
pub mod weather;
