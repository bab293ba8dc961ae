//! Countdown timer engine.
//!
//! Owns one tick process per actively counting task. A process is a spawned
//! tokio task driving a one-second interval: each tick re-reads the latest
//! remaining value from the shared [`TaskCache`] (never a frozen copy),
//! decrements it, and pushes a display event. Durable writes are deliberately
//! sparse — only every fifth remaining value is checkpointed, plus one write
//! at stop — and always fire-and-forget: a slow or failed write never stalls
//! the next tick, it is logged and abandoned.
//!
//! The process registry is the per-session truth for "is this timer
//! running"; the `timer_active` field in stored documents is advisory
//! display state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tickdown_proto::task::{TaskId, TaskPatch, UserId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cache::{TaskCache, TickOutcome};
use crate::store::TaskStore;
use crate::ui::UiEvent;

/// A checkpoint write fires whenever the decremented remaining value is a
/// multiple of this.
pub const CHECKPOINT_INTERVAL: u32 = 5;

/// Rejected timer start requests.
///
/// Starting an already-running timer is not among these: that is an
/// idempotent no-op by contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TimerError {
    /// No such task in the cache.
    #[error("task {0} not found")]
    UnknownTask(TaskId),

    /// Completed tasks cannot count down.
    #[error("task {0} is completed")]
    TaskCompleted(TaskId),

    /// Zero-limit tasks are checklist items with no timer affordance.
    #[error("task {0} has no timer")]
    NoTimer(TaskId),

    /// Nothing left to count down; reset first.
    #[error("task {0} has no time remaining")]
    NothingRemaining(TaskId),
}

/// Per-session countdown engine.
///
/// All methods are synchronous: starting spawns the tick process, stopping
/// aborts it, and every durable write is spawned fire-and-forget.
pub struct TimerEngine<S> {
    user: UserId,
    cache: Arc<TaskCache>,
    store: Arc<S>,
    events: mpsc::Sender<UiEvent>,
    tick_interval: Duration,
    processes: Arc<Mutex<HashMap<TaskId, JoinHandle<()>>>>,
}

impl<S: TaskStore + 'static> TimerEngine<S> {
    /// Creates an engine for one signed-in user.
    ///
    /// `tick_interval` is one second in production; tests shrink it or run
    /// under a paused clock.
    #[must_use]
    pub fn new(
        user: UserId,
        cache: Arc<TaskCache>,
        store: Arc<S>,
        events: mpsc::Sender<UiEvent>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            user,
            cache,
            store,
            events,
            tick_interval,
            processes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Starts the countdown for a task.
    ///
    /// No-op if a process is already running for this id. Marks the cached
    /// task active and persists `timer_active = true` fire-and-forget.
    ///
    /// # Errors
    ///
    /// Returns a [`TimerError`] when the task is missing, completed, has a
    /// zero limit, or has nothing remaining.
    pub fn start(&self, id: TaskId) -> Result<(), TimerError> {
        let mut processes = self.processes.lock();
        if processes.contains_key(&id) {
            tracing::debug!(task = %id, "countdown already running; start ignored");
            return Ok(());
        }

        let task = self.cache.get(id).ok_or(TimerError::UnknownTask(id))?;
        if task.completed {
            return Err(TimerError::TaskCompleted(id));
        }
        if !task.has_timer() {
            return Err(TimerError::NoTimer(id));
        }
        if task.time_remaining == 0 {
            return Err(TimerError::NothingRemaining(id));
        }

        self.cache.set_timer_active(id, true);
        self.persist(
            id,
            TaskPatch {
                timer_active: Some(true),
                ..TaskPatch::default()
            },
            "start",
        );

        let handle = tokio::spawn(run_countdown(
            id,
            self.user,
            Arc::clone(&self.cache),
            Arc::clone(&self.store),
            self.events.clone(),
            self.tick_interval,
            Arc::clone(&self.processes),
        ));
        processes.insert(id, handle);
        tracing::debug!(task = %id, remaining = task.time_remaining, "countdown started");
        Ok(())
    }

    /// Stops the countdown for a task, if one is running.
    ///
    /// Cancels the tick process, clears the cached active flag, and persists
    /// `timer_active = false` plus the current remaining value. Returns
    /// whether a process was actually running.
    pub fn stop(&self, id: TaskId) -> bool {
        if !self.abort_process(id) {
            return false;
        }
        if let Some(remaining) = self.cache.time_remaining(id) {
            self.persist(
                id,
                TaskPatch {
                    timer_active: Some(false),
                    time_remaining: Some(remaining),
                    ..TaskPatch::default()
                },
                "stop",
            );
        }
        tracing::debug!(task = %id, "countdown stopped");
        true
    }

    /// Aborts the tick process for a task without any store write.
    ///
    /// For tasks about to be deleted: a stop write would race the delete.
    /// Returns whether a process was actually running.
    pub fn cancel(&self, id: TaskId) -> bool {
        if !self.abort_process(id) {
            return false;
        }
        tracing::debug!(task = %id, "countdown cancelled");
        true
    }

    /// Stops any countdown and winds the task back to its full limit.
    ///
    /// Persists `time_remaining = time_limit` and `timer_active = false`;
    /// never auto-restarts. Returns the restored value, or `None` when the
    /// task is not in the cache.
    pub fn reset(&self, id: TaskId) -> Option<u32> {
        self.stop(id);
        let remaining = self.cache.reset_to_limit(id)?;
        let _ = self.events.try_send(UiEvent::CountdownTick { id, remaining });
        self.persist(
            id,
            TaskPatch {
                time_remaining: Some(remaining),
                timer_active: Some(false),
                ..TaskPatch::default()
            },
            "reset",
        );
        Some(remaining)
    }

    /// Aborts every tick process with no per-task persistence.
    ///
    /// Sign-out teardown: seconds counted since the last checkpoint are
    /// deliberately lost. Returns how many processes were cancelled.
    pub fn stop_all(&self) -> usize {
        let handles: Vec<(TaskId, JoinHandle<()>)> = self.processes.lock().drain().collect();
        let count = handles.len();
        for (id, handle) in handles {
            handle.abort();
            tracing::debug!(task = %id, "countdown cancelled at teardown");
        }
        count
    }

    /// Whether a tick process is currently registered for this id.
    #[must_use]
    pub fn is_running(&self, id: TaskId) -> bool {
        self.processes.lock().contains_key(&id)
    }

    /// Number of currently running countdowns.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.processes.lock().len()
    }

    /// Spawns a fire-and-forget store write; failure is logged, never
    /// retried.
    fn persist(&self, id: TaskId, patch: TaskPatch, op: &'static str) {
        spawn_persist(Arc::clone(&self.store), self.user, id, patch, op);
    }

    /// Removes and aborts the tick process, clearing the cached active flag.
    fn abort_process(&self, id: TaskId) -> bool {
        let Some(handle) = self.processes.lock().remove(&id) else {
            return false;
        };
        handle.abort();
        self.cache.set_timer_active(id, false);
        true
    }
}

impl<S> Drop for TimerEngine<S> {
    fn drop(&mut self) {
        for (_, handle) in self.processes.lock().drain() {
            handle.abort();
        }
    }
}

fn spawn_persist<S: TaskStore + 'static>(
    store: Arc<S>,
    user: UserId,
    id: TaskId,
    patch: TaskPatch,
    op: &'static str,
) {
    tokio::spawn(async move {
        if let Err(e) = store.update(user, id, patch).await {
            tracing::warn!(task = %id, op, error = %e, "store write failed; countdown unaffected");
        }
    });
}

/// Body of one tick process.
///
/// Decrements once per interval until the task reaches zero, vanishes, or
/// turns completed; removes itself from the registry on every exit path.
async fn run_countdown<S: TaskStore + 'static>(
    id: TaskId,
    user: UserId,
    cache: Arc<TaskCache>,
    store: Arc<S>,
    events: mpsc::Sender<UiEvent>,
    tick_interval: Duration,
    processes: Arc<Mutex<HashMap<TaskId, JoinHandle<()>>>>,
) {
    let mut interval = tokio::time::interval(tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first interval tick completes immediately; consume it so the first
    // decrement lands one full interval after start.
    interval.tick().await;

    loop {
        interval.tick().await;
        match cache.tick(id) {
            TickOutcome::Gone => {
                tracing::debug!(task = %id, "task vanished mid-countdown; cancelling quietly");
                processes.lock().remove(&id);
                return;
            }
            TickOutcome::Completed => {
                tracing::debug!(task = %id, "task completed mid-countdown; stopping");
                let remaining = cache.time_remaining(id).unwrap_or(0);
                cache.set_timer_active(id, false);
                processes.lock().remove(&id);
                spawn_persist(
                    store,
                    user,
                    id,
                    TaskPatch {
                        timer_active: Some(false),
                        time_remaining: Some(remaining),
                        ..TaskPatch::default()
                    },
                    "stop",
                );
                return;
            }
            TickOutcome::Ticked(remaining) => {
                let _ = events.try_send(UiEvent::CountdownTick { id, remaining });
                if remaining % CHECKPOINT_INTERVAL == 0 {
                    spawn_persist(
                        Arc::clone(&store),
                        user,
                        id,
                        TaskPatch {
                            time_remaining: Some(remaining),
                            ..TaskPatch::default()
                        },
                        "checkpoint",
                    );
                }
                if remaining == 0 {
                    let text = cache.get(id).map(|t| t.text).unwrap_or_default();
                    cache.set_timer_active(id, false);
                    processes.lock().remove(&id);
                    spawn_persist(
                        store,
                        user,
                        id,
                        TaskPatch {
                            timer_active: Some(false),
                            time_remaining: Some(0),
                            ..TaskPatch::default()
                        },
                        "stop",
                    );
                    let _ = events.try_send(UiEvent::TimerFinished { id, text });
                    tracing::info!(task = %id, "countdown finished");
                    return;
                }
            }
        }
    }
}
