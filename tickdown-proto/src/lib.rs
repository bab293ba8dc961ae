//! Shared model and wire protocol definitions for Tickdown.

pub mod codec;
pub mod task;
pub mod wire;
