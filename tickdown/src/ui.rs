//! Render surface: events pushed to the frontend, plus form-input parsing.
//!
//! The core never renders. It emits [`UiEvent`]s on a bounded channel
//! (`try_send`, dropping on overflow — a slow frontend must not stall the
//! core) and leaves drawing to whoever drains the channel. Form input is
//! validated here, before any store call, so invalid submissions never leave
//! the boundary.

use tickdown_proto::task::{Task, TaskId, TaskValidationError, validate_text};

use crate::weather::WeatherReport;

/// Events the core pushes to the frontend.
#[derive(Debug, Clone)]
pub enum UiEvent {
    /// The cache changed; carries the full ordered list to render.
    TaskList(Vec<Task>),

    /// An active countdown decremented; update the per-task display.
    CountdownTick {
        /// Which task ticked.
        id: TaskId,
        /// Seconds now remaining.
        remaining: u32,
    },

    /// A countdown reached zero. Surfaced exactly once per run; the task is
    /// not auto-completed.
    TimerFinished {
        /// Which task finished.
        id: TaskId,
        /// Its description, for the notification text.
        text: String,
    },

    /// A best-effort weather fetch came back.
    Weather(WeatherReport),
}

/// Rejected form input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    /// Task text failed validation.
    #[error("invalid task: {0}")]
    Invalid(#[from] TaskValidationError),

    /// The time-limit field is not a whole number of seconds.
    #[error("time limit must be a whole number of seconds, got {0:?}")]
    BadLimit(String),
}

/// Parses a time-limit form field ("0" is a valid checklist-only limit).
///
/// # Errors
///
/// Returns [`InputError::BadLimit`] when the field is not a base-10 `u32`.
pub fn parse_limit(input: &str) -> Result<u32, InputError> {
    let trimmed = input.trim();
    trimmed
        .parse::<u32>()
        .map_err(|_| InputError::BadLimit(trimmed.to_string()))
}

/// Validates a new-task (or edit) form submission.
///
/// Returns the trimmed text and the parsed limit in seconds.
///
/// # Errors
///
/// Returns [`InputError`] when the text is empty/oversized or the limit is
/// not a whole number of seconds.
pub fn parse_task_form(text: &str, limit: &str) -> Result<(String, u32), InputError> {
    let trimmed = text.trim();
    validate_text(trimmed)?;
    let limit = parse_limit(limit)?;
    Ok((trimmed.to_string(), limit))
}

/// Formats remaining seconds for display: `MM:SS`, or `H:MM:SS` from one
/// hour up.
#[must_use]
pub fn format_countdown(seconds: u32) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes:02}:{secs:02}")
    }
}
