//! In-memory per-user task collections for the sync server.
//!
//! [`TaskCollections`] is the server's source of truth: one collection per
//! user, each a set of task documents keyed by [`TaskId`] and ordered by a
//! server-assigned creation token. Mutations validate input and enforce the
//! per-user task cap, reporting failures as wire-level [`RejectReason`]s.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tickdown_proto::task::{self, Task, TaskFields, TaskId, TaskPatch, UserId};
use tickdown_proto::wire::RejectReason;
use tokio::sync::RwLock;

/// Default maximum number of tasks per user collection.
const DEFAULT_MAX_TASKS_PER_USER: u32 = 500;

/// One user's tasks plus the high-water mark for creation tokens.
#[derive(Default)]
struct Collection {
    tasks: HashMap<TaskId, Task>,
    last_order: u64,
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
}

/// Milliseconds since the Unix epoch.
fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Thread-safe registry of per-user task collections.
///
/// Each user has an independent collection capped at a configurable maximum
/// number of tasks; a create beyond the cap is rejected, never evicted.
pub struct TaskCollections {
    collections: RwLock<HashMap<UserId, Collection>>,
    max_tasks_per_user: u32,
}

impl Default for TaskCollections {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskCollections {
    /// Creates an empty registry with the default per-user task cap.
    #[must_use]
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            max_tasks_per_user: DEFAULT_MAX_TASKS_PER_USER,
        }
    }

    /// Creates an empty registry with a custom per-user task cap.
    #[must_use]
    pub fn with_max_tasks(max_tasks_per_user: u32) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            max_tasks_per_user,
        }
    }

    /// Adds a task to `user`'s collection, assigning its id and creation
    /// token.
    ///
    /// # Errors
    ///
    /// [`RejectReason::Invalid`] if the fields fail validation,
    /// [`RejectReason::TooManyTasks`] if the collection is at its cap.
    pub async fn create(&self, user: UserId, fields: TaskFields) -> Result<TaskId, RejectReason> {
        fields
            .validate()
            .map_err(|e| RejectReason::Invalid(e.to_string()))?;

        let mut collections = self.collections.write().await;
        let collection = collections.entry(user).or_default();
        if collection.tasks.len() >= self.max_tasks_per_user as usize {
            return Err(RejectReason::TooManyTasks(self.max_tasks_per_user));
        }

        let id = TaskId::new();
        let order = collection.next_order();
        collection.tasks.insert(id, fields.into_task(id, order));
        Ok(id)
    }

    /// Applies a partial update to one of `user`'s tasks.
    ///
    /// # Errors
    ///
    /// [`RejectReason::NotFound`] if the task does not exist,
    /// [`RejectReason::Invalid`] if the patched text fails validation.
    pub async fn update(
        &self,
        user: UserId,
        id: TaskId,
        patch: &TaskPatch,
    ) -> Result<(), RejectReason> {
        if let Some(text) = &patch.text {
            task::validate_text(text).map_err(|e| RejectReason::Invalid(e.to_string()))?;
        }

        let mut collections = self.collections.write().await;
        let task = collections
            .get_mut(&user)
            .and_then(|c| c.tasks.get_mut(&id))
            .ok_or(RejectReason::NotFound(id))?;
        patch.apply(task);
        Ok(())
    }

    /// Removes one of `user`'s tasks, returning whether it existed.
    ///
    /// Deleting an unknown task is not an error; the caller acknowledges it
    /// either way.
    pub async fn delete(&self, user: UserId, id: TaskId) -> bool {
        let mut collections = self.collections.write().await;
        collections
            .get_mut(&user)
            .is_some_and(|c| c.tasks.remove(&id).is_some())
    }

    /// Removes every completed task in `user`'s collection, returning how
    /// many were removed.
    #[allow(clippy::cast_possible_truncation)]
    pub async fn delete_completed(&self, user: UserId) -> u32 {
        let mut collections = self.collections.write().await;
        let Some(collection) = collections.get_mut(&user) else {
            return 0;
        };
        let before = collection.tasks.len();
        collection.tasks.retain(|_, t| !t.completed);
        // Safe: collection size is capped well within u32 range.
        (before - collection.tasks.len()) as u32
    }

    /// Returns `user`'s tasks ordered by creation token, oldest first.
    pub async fn snapshot(&self, user: UserId) -> Vec<Task> {
        let collections = self.collections.read().await;
        collections.get(&user).map_or_else(Vec::new, Collection::snapshot)
    }

    /// Number of tasks currently in `user`'s collection.
    pub async fn task_count(&self, user: UserId) -> usize {
        let collections = self.collections.read().await;
        collections.get(&user).map_or(0, |c| c.tasks.len())
    }
}
