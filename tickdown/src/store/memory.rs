//! In-process task store.
//!
//! Backs the full [`TaskStore`] contract with plain shared memory: per-user
//! collections behind a [`parking_lot::Mutex`], store-assigned ids and
//! monotonic order tokens, and snapshot push over unbounded channels.
//! Cloned handles share state, so two handles behave like two devices
//! signed into the same account — one handle's mutations arrive on the
//! other's subscription.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tickdown_proto::task::{self, Task, TaskFields, TaskId, TaskPatch, UserId};
use tokio::sync::mpsc;

use super::{StoreError, Subscription, TaskStore};

/// In-process store backed by shared memory and snapshot channels.
///
/// Intended for tests and offline use; [`remote::WsStore`](super::remote)
/// is the networked equivalent with identical semantics.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    collections: HashMap<UserId, Collection>,
    next_subscriber: u64,
}

#[derive(Default)]
struct Collection {
    tasks: HashMap<TaskId, Task>,
    last_order: u64,
    subscribers: Vec<Subscriber>,
}

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<Vec<Task>>,
}

impl Collection {
    /// Full list ordered by creation token, oldest first.
    fn snapshot(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.order);
        tasks
    }

    /// Assigns the next creation token: wall-clock milliseconds, bumped to
    /// stay strictly increasing even when two creates land in the same
    /// millisecond.
    fn next_order(&mut self) -> u64 {
        let order = now_millis().max(self.last_order + 1);
        self.last_order = order;
        order
    }

    /// Delivers the current snapshot to every live subscriber, dropping the
    /// ones whose receiving side has gone away.
    fn push_snapshot(&mut self) {
        let snapshot = self.snapshot();
        self.subscribers
            .retain(|sub| sub.tx.send(snapshot.clone()).is_ok());
    }
}

/// Milliseconds since the Unix epoch.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks currently stored for `user`.
    #[must_use]
    pub fn task_count(&self, user: UserId) -> usize {
        self.inner
            .state
            .lock()
            .collections
            .get(&user)
            .map_or(0, |col| col.tasks.len())
    }

    /// Number of live snapshot subscriptions for `user`.
    #[must_use]
    pub fn subscriber_count(&self, user: UserId) -> usize {
        self.inner
            .state
            .lock()
            .collections
            .get(&user)
            .map_or(0, |col| col.subscribers.len())
    }
}

impl TaskStore for MemoryStore {
    async fn subscribe(&self, user: UserId) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();

        let subscriber_id = {
            let mut state = self.inner.state.lock();
            let subscriber_id = state.next_subscriber;
            state.next_subscriber += 1;

            let col = state.collections.entry(user).or_default();
            // Initial snapshot lands in the channel before the handle is
            // returned, so the subscriber always starts from current state.
            let _ = tx.send(col.snapshot());
            col.subscribers.push(Subscriber {
                id: subscriber_id,
                tx,
            });
            subscriber_id
        };

        let inner = Arc::clone(&self.inner);
        Ok(Subscription::new(rx, move || {
            let mut state = inner.state.lock();
            if let Some(col) = state.collections.get_mut(&user) {
                col.subscribers.retain(|sub| sub.id != subscriber_id);
            }
        }))
    }

    async fn create(&self, user: UserId, fields: TaskFields) -> Result<TaskId, StoreError> {
        fields
            .validate()
            .map_err(|e| StoreError::Rejected(e.to_string()))?;

        let mut state = self.inner.state.lock();
        let col = state.collections.entry(user).or_default();
        let id = TaskId::new();
        let order = col.next_order();
        col.tasks.insert(id, fields.into_task(id, order));
        col.push_snapshot();
        Ok(id)
    }

    async fn update(&self, user: UserId, id: TaskId, patch: TaskPatch) -> Result<(), StoreError> {
        if let Some(text) = &patch.text {
            task::validate_text(text).map_err(|e| StoreError::Rejected(e.to_string()))?;
        }

        let mut state = self.inner.state.lock();
        let col = state
            .collections
            .get_mut(&user)
            .ok_or(StoreError::NotFound(id))?;
        let task = col.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        patch.apply(task);
        col.push_snapshot();
        Ok(())
    }

    async fn delete(&self, user: UserId, id: TaskId) -> Result<(), StoreError> {
        let mut state = self.inner.state.lock();
        if let Some(col) = state.collections.get_mut(&user) {
            if col.tasks.remove(&id).is_some() {
                col.push_snapshot();
            }
        }
        Ok(())
    }

    async fn delete_completed(&self, user: UserId) -> Result<u32, StoreError> {
        let mut state = self.inner.state.lock();
        let Some(col) = state.collections.get_mut(&user) else {
            return Ok(0);
        };
        let before = col.tasks.len();
        col.tasks.retain(|_, task| !task.completed);
        let removed = before - col.tasks.len();
        if removed > 0 {
            col.push_snapshot();
        }
        Ok(u32::try_from(removed).unwrap_or(u32::MAX))
    }
}
