//! Task document model shared by the client and the sync server.
//!
//! A [`Task`] is the unit of storage: one document per to-do item, keyed by a
//! store-assigned [`TaskId`] inside a per-user collection and ordered by a
//! server-assigned creation token. Partial updates travel as a [`TaskPatch`];
//! both store implementations apply patches through [`TaskPatch::apply`] so
//! the merge (and the remaining-vs-limit clamp) behaves identically
//! everywhere.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed task text length in characters.
pub const MAX_TASK_TEXT_LENGTH: usize = 4096;

/// Unique identifier for a task document, based on UUID v7 for time-ordering.
///
/// Assigned by the store at creation and stable for the task's lifetime; it
/// is the join key between cache entries, running countdown processes, and
/// rendered rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Creates a new time-ordered task identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `TaskId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a user, based on UUID v7.
///
/// Assigned by the authentication provider; every store call is scoped to
/// one user's task collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new time-ordered user identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `UserId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validation failures for user-supplied task fields.
///
/// Raised at the input boundary, before any store call is issued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskValidationError {
    /// Task text must not be empty (or whitespace-only).
    #[error("task text must not be empty")]
    EmptyText,

    /// Task text exceeds [`MAX_TASK_TEXT_LENGTH`].
    #[error("task text too long: {len} chars (max {max})")]
    TextTooLong {
        /// Actual length in characters.
        len: usize,
        /// Maximum allowed length.
        max: usize,
    },
}

/// Validates user-supplied task text.
///
/// # Errors
///
/// Returns [`TaskValidationError::EmptyText`] if the text is empty or
/// whitespace-only, or [`TaskValidationError::TextTooLong`] if it exceeds
/// [`MAX_TASK_TEXT_LENGTH`] characters.
pub fn validate_text(text: &str) -> Result<(), TaskValidationError> {
    if text.trim().is_empty() {
        return Err(TaskValidationError::EmptyText);
    }
    let len = text.chars().count();
    if len > MAX_TASK_TEXT_LENGTH {
        return Err(TaskValidationError::TextTooLong {
            len,
            max: MAX_TASK_TEXT_LENGTH,
        });
    }
    Ok(())
}

/// A to-do task document.
///
/// `time_remaining` never exceeds `time_limit` in stored state: every write
/// path goes through [`TaskPatch::apply`] or [`TaskFields::into_task`], both
/// of which clamp. A task with `time_limit == 0` is a pure checklist item
/// and has no timer affordance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Store-assigned document identifier.
    pub id: TaskId,
    /// User-supplied description; non-empty.
    pub text: String,
    /// Whether the task has been marked done. A completed task never has a
    /// running countdown.
    pub completed: bool,
    /// Configured countdown duration in seconds; changed only by an explicit
    /// edit.
    pub time_limit: u32,
    /// Seconds left on the countdown; `0 ≤ time_remaining ≤ time_limit`.
    pub time_remaining: u32,
    /// Whether a countdown process was running for this task when the field
    /// was last persisted. Advisory: the client session's process registry is
    /// the live truth.
    pub timer_active: bool,
    /// Server-assigned monotonic creation token; lists are always ordered by
    /// this, ascending (oldest first).
    pub order: u64,
}

impl Task {
    /// True when the task offers a countdown at all (`time_limit > 0`).
    #[must_use]
    pub const fn has_timer(&self) -> bool {
        self.time_limit > 0
    }
}

/// The client-supplied portion of a task document at creation time.
///
/// The store assigns `id` and `order`; everything else comes from here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFields {
    /// User-supplied description.
    pub text: String,
    /// Configured countdown duration in seconds.
    pub time_limit: u32,
    /// Seconds left on the countdown.
    pub time_remaining: u32,
    /// Whether the task is marked done.
    pub completed: bool,
    /// Whether a countdown is running.
    pub timer_active: bool,
}

impl TaskFields {
    /// Fields for a freshly submitted task: not completed, timer idle,
    /// countdown wound to the full limit.
    #[must_use]
    pub fn for_new(text: impl Into<String>, time_limit: u32) -> Self {
        Self {
            text: text.into(),
            time_limit,
            time_remaining: time_limit,
            completed: false,
            timer_active: false,
        }
    }

    /// Validates the user-supplied fields.
    ///
    /// # Errors
    ///
    /// Returns a [`TaskValidationError`] if the text is empty or too long.
    pub fn validate(&self) -> Result<(), TaskValidationError> {
        validate_text(&self.text)
    }

    /// Materializes a full document with the store-assigned `id` and `order`.
    ///
    /// Clamps `time_remaining` to `time_limit` so no document is born in
    /// violation of the remaining-vs-limit invariant.
    #[must_use]
    pub fn into_task(self, id: TaskId, order: u64) -> Task {
        let time_remaining = self.time_remaining.min(self.time_limit);
        Task {
            id,
            text: self.text,
            completed: self.completed,
            time_limit: self.time_limit,
            time_remaining,
            timer_active: self.timer_active,
            order,
        }
    }
}

/// A partial update to a task document; `None` fields are left untouched.
///
/// Built with struct-update syntax at call sites, e.g.
/// `TaskPatch { time_remaining: Some(n), ..TaskPatch::default() }`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    /// New description.
    pub text: Option<String>,
    /// New countdown duration.
    pub time_limit: Option<u32>,
    /// New seconds-left value.
    pub time_remaining: Option<u32>,
    /// New completion flag.
    pub completed: Option<bool>,
    /// New timer-running flag.
    pub timer_active: Option<bool>,
}

impl TaskPatch {
    /// True when every field is `None` (applying it would change nothing).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.time_limit.is_none()
            && self.time_remaining.is_none()
            && self.completed.is_none()
            && self.timer_active.is_none()
    }

    /// Merges the patch into `task`, then clamps `time_remaining` to
    /// `time_limit`.
    ///
    /// The clamp is the conflict policy for a limit edit racing a running
    /// countdown: whichever write lands last, the stored document never ends
    /// up with more seconds remaining than its limit allows.
    pub fn apply(&self, task: &mut Task) {
        if let Some(text) = &self.text {
            task.text.clone_from(text);
        }
        if let Some(limit) = self.time_limit {
            task.time_limit = limit;
        }
        if let Some(remaining) = self.time_remaining {
            task.time_remaining = remaining;
        }
        if let Some(completed) = self.completed {
            task.completed = completed;
        }
        if let Some(active) = self.timer_active {
            task.timer_active = active;
        }
        task.time_remaining = task.time_remaining.min(task.time_limit);
    }
}
