//! Local task cache.
//!
//! In-memory mirror of the signed-in user's task list: the last snapshot the
//! store pushed, replaced wholesale on every push (never patched
//! incrementally, so it can never drift through a missed update). The list
//! keeps the store's creation order and is never re-sorted here.
//!
//! Two writers exist by contract: snapshot installation ([`TaskCache::install`]
//! / [`TaskCache::clear`]) and the timer engine, which goes through the named
//! countdown accessors below so every tick reads the latest shared value
//! rather than a frozen copy. A concurrent snapshot replace always wins — it
//! installs a wholly new list — and the next tick observes it.

use parking_lot::RwLock;
use tickdown_proto::task::{Task, TaskId};

/// What a countdown tick found in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The task is no longer present (deleted here or remotely); the
    /// countdown process should end quietly.
    Gone,
    /// The task is marked completed; the countdown should stop through the
    /// normal stop path.
    Completed,
    /// Decrement applied; carries the new remaining seconds.
    Ticked(u32),
}

/// Shared, lock-guarded mirror of the current user's ordered task list.
#[derive(Default)]
pub struct TaskCache {
    tasks: RwLock<Vec<Task>>,
}

impl TaskCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the entire list with a freshly pushed snapshot.
    pub fn install(&self, snapshot: Vec<Task>) {
        *self.tasks.write() = snapshot;
    }

    /// Empties the cache (sign-out teardown).
    pub fn clear(&self) {
        self.tasks.write().clear();
    }

    /// Clones the current list in display order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Task> {
        self.tasks.read().clone()
    }

    /// Looks up a single task by id.
    #[must_use]
    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.tasks.read().iter().find(|t| t.id == id).cloned()
    }

    /// Number of cached tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    /// True when no tasks are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    /// Latest known remaining seconds for a task, if it exists.
    #[must_use]
    pub fn time_remaining(&self, id: TaskId) -> Option<u32> {
        self.tasks
            .read()
            .iter()
            .find(|t| t.id == id)
            .map(|t| t.time_remaining)
    }

    /// One countdown step: re-reads the latest remaining value under the
    /// write lock, decrements it by one (saturating), and writes it back.
    ///
    /// The read-modify-write is atomic with respect to snapshot installs,
    /// so an edit that landed between ticks is decremented, not overwritten.
    pub fn tick(&self, id: TaskId) -> TickOutcome {
        let mut tasks = self.tasks.write();
        let Some(task) = tasks.iter_mut().find(|t| t.id == id) else {
            return TickOutcome::Gone;
        };
        if task.completed {
            return TickOutcome::Completed;
        }
        task.time_remaining = task.time_remaining.saturating_sub(1);
        TickOutcome::Ticked(task.time_remaining)
    }

    /// Flips the cached timer flag; returns false when the task is absent.
    pub fn set_timer_active(&self, id: TaskId, active: bool) -> bool {
        let mut tasks = self.tasks.write();
        match tasks.iter_mut().find(|t| t.id == id) {
            Some(task) => {
                task.timer_active = active;
                true
            }
            None => false,
        }
    }

    /// Winds the countdown back to the configured limit; returns the new
    /// remaining value, or `None` when the task is absent.
    pub fn reset_to_limit(&self, id: TaskId) -> Option<u32> {
        let mut tasks = self.tasks.write();
        let task = tasks.iter_mut().find(|t| t.id == id)?;
        task.time_remaining = task.time_limit;
        Some(task.time_remaining)
    }
}
