//! Remote task store abstraction for Tickdown.
//!
//! Defines the [`TaskStore`] trait that all store adapters must satisfy.
//! Concrete implementations include:
//! - [`memory::MemoryStore`] — in-process store for tests and offline use
//! - [`remote::WsStore`] — WebSocket client for the tickdown-server sync server

pub mod memory;
pub mod remote;

use tickdown_proto::codec::CodecError;
use tickdown_proto::task::{Task, TaskFields, TaskId, TaskPatch, UserId};
use tokio::sync::mpsc;

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The targeted document does not exist.
    #[error("task {0} not found")]
    NotFound(TaskId),

    /// The store refused the operation (collection limits, invalid fields).
    #[error("store rejected operation: {0}")]
    Rejected(String),

    /// The connection to the sync server has been closed.
    #[error("store connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("store operation timed out")]
    Timeout,

    /// Could not establish a connection to the sync server.
    #[error("failed to connect to sync server: {0}")]
    Connect(String),

    /// A wire frame could not be encoded or decoded.
    #[error("wire codec error: {0}")]
    Codec(#[from] CodecError),
}

/// A live snapshot subscription to one user's task collection.
///
/// Yields the full ordered task list on every remote change (and once
/// immediately after subscribing). Dropping the handle — or calling
/// [`Subscription::cancel`] — unregisters it from the store; snapshots
/// stop arriving and the stream ends.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Vec<Task>>,
    on_cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Builds a subscription from a snapshot receiver and a cancel hook.
    ///
    /// The hook runs exactly once, on drop or explicit cancel, and must
    /// unregister the paired sender from the store.
    #[must_use]
    pub fn new(
        rx: mpsc::UnboundedReceiver<Vec<Task>>,
        on_cancel: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            rx,
            on_cancel: Some(Box::new(on_cancel)),
        }
    }

    /// Waits for the next snapshot.
    ///
    /// Returns `None` once the store side has gone away (connection lost or
    /// subscription cancelled); the last delivered snapshot remains the
    /// caller's stale-but-consistent view.
    pub async fn next(&mut self) -> Option<Vec<Task>> {
        self.rx.recv().await
    }

    /// Cancels the subscription explicitly (equivalent to dropping it).
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hook) = self.on_cancel.take() {
            hook();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Async document store holding one task collection per user.
///
/// The store is the durable owner of record. Mutations never return the
/// written document — callers observe their effect through the snapshot
/// subscription, which pushes the full ordered list after every change.
/// `delete` is idempotent (removing an absent document succeeds); `update`
/// on an absent document is an error.
pub trait TaskStore: Send + Sync {
    /// Open a snapshot subscription for `user`'s collection.
    ///
    /// The current list is delivered immediately as the first snapshot.
    fn subscribe(
        &self,
        user: UserId,
    ) -> impl std::future::Future<Output = Result<Subscription, StoreError>> + Send;

    /// Create a task document; the store assigns the id and the monotonic
    /// order token.
    fn create(
        &self,
        user: UserId,
        fields: TaskFields,
    ) -> impl std::future::Future<Output = Result<TaskId, StoreError>> + Send;

    /// Merge a partial update into an existing document.
    fn update(
        &self,
        user: UserId,
        id: TaskId,
        patch: TaskPatch,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Remove a document permanently. Succeeds even if it is already gone.
    fn delete(
        &self,
        user: UserId,
        id: TaskId,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Remove every document with `completed == true`; returns how many were
    /// removed (zero matches is a success).
    fn delete_completed(
        &self,
        user: UserId,
    ) -> impl std::future::Future<Output = Result<u32, StoreError>> + Send;
}
