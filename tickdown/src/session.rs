//! Session controller.
//!
//! Binds the task cache and timer engine to the authentication lifecycle: a
//! session exists exactly while a user is signed in, and every task
//! operation the frontend can issue goes through the controller so it can
//! be refused cleanly when no session is open.
//!
//! Store mutations delegate to the [`TaskStore`] and rely on the snapshot
//! push to change the cache; a rejected write is logged and abandoned, so
//! the rendered list only ever shows confirmed state.

use std::sync::Arc;
use std::time::Duration;

use tickdown_proto::task::{Task, TaskFields, TaskId, TaskPatch, TaskValidationError};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

use crate::auth::{AuthProvider, AuthState, AuthUser};
use crate::cache::TaskCache;
use crate::store::{Subscription, TaskStore};
use crate::timer::{TimerEngine, TimerError};
use crate::ui::UiEvent;
use crate::weather::WeatherProvider;

/// Errors surfaced to the frontend from session operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No session is open.
    #[error("not signed in")]
    NotSignedIn,

    /// The id does not match any task in the current snapshot.
    #[error("task {0} not found")]
    UnknownTask(TaskId),

    /// Task input failed validation; nothing was sent to the store.
    #[error("invalid input: {0}")]
    Validation(#[from] TaskValidationError),

    /// A timer request was refused.
    #[error("timer: {0}")]
    Timer(#[from] TimerError),
}

/// Live per-user resources: the cache, the timer engine, and the snapshot
/// forwarder driving both cache and render events.
struct Session<S> {
    user: AuthUser,
    cache: Arc<TaskCache>,
    timers: TimerEngine<S>,
    forwarder: Option<JoinHandle<()>>,
}

impl<S: TaskStore + 'static> Session<S> {
    /// Releases everything this session owns.
    ///
    /// Aborting the forwarder drops the store subscription, which runs its
    /// cancel hook. Countdowns are cancelled with no store writes; seconds
    /// counted since the last checkpoint are lost. Ends by pushing an empty
    /// list so the frontend blanks immediately.
    fn teardown(self, events: &mpsc::Sender<UiEvent>) {
        if let Some(forwarder) = self.forwarder {
            forwarder.abort();
        }
        let cancelled = self.timers.stop_all();
        self.cache.clear();
        let _ = events.try_send(UiEvent::TaskList(Vec::new()));
        tracing::info!(user = %self.user.id, cancelled, "session closed");
    }
}

/// Applies authentication transitions to the at-most-one live session and
/// exposes the task operation surface.
pub struct SessionController<A, S, W> {
    auth: Arc<A>,
    store: Arc<S>,
    weather: Arc<W>,
    events: mpsc::Sender<UiEvent>,
    tick_interval: Duration,
    active: Mutex<Option<Session<S>>>,
}

impl<A, S, W> SessionController<A, S, W>
where
    A: AuthProvider + 'static,
    S: TaskStore + 'static,
    W: WeatherProvider + 'static,
{
    #[must_use]
    pub fn new(
        auth: Arc<A>,
        store: Arc<S>,
        weather: Arc<W>,
        events: mpsc::Sender<UiEvent>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            auth,
            store,
            weather,
            events,
            tick_interval,
            active: Mutex::new(None),
        }
    }

    /// Spawns the task that applies every auth state change to the session.
    ///
    /// The current state is applied first, so a controller created after
    /// sign-in still opens its session.
    pub fn spawn_auth_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        let mut states = self.auth.watch();
        tokio::spawn(async move {
            loop {
                let state = states.borrow_and_update().clone();
                controller.apply(state).await;
                if states.changed().await.is_err() {
                    tracing::debug!("auth provider gone; listener exiting");
                    return;
                }
            }
        })
    }

    async fn apply(&self, state: AuthState) {
        match state {
            AuthState::SignedIn(user) => self.open_session(user).await,
            AuthState::SignedOut => self.close_session().await,
        }
    }

    /// Opens a session for `user`, tearing down any prior one first.
    ///
    /// A failed subscription still opens the session: the list stays empty
    /// and timers remain usable against whatever the cache holds.
    async fn open_session(&self, user: AuthUser) {
        let mut active = self.active.lock().await;
        if let Some(existing) = active.take() {
            if existing.user.id == user.id {
                *active = Some(existing);
                return;
            }
            existing.teardown(&self.events);
        }

        let cache = Arc::new(TaskCache::new());
        let timers = TimerEngine::new(
            user.id,
            Arc::clone(&cache),
            Arc::clone(&self.store),
            self.events.clone(),
            self.tick_interval,
        );
        let forwarder = match self.store.subscribe(user.id).await {
            Ok(subscription) => Some(tokio::spawn(forward_snapshots(
                subscription,
                Arc::clone(&cache),
                self.events.clone(),
            ))),
            Err(e) => {
                tracing::warn!(user = %user.id, error = %e, "task subscription failed; list stays empty");
                None
            }
        };
        self.spawn_weather_fetch();
        tracing::info!(user = %user.id, email = %user.email, "session opened");
        *active = Some(Session {
            user,
            cache,
            timers,
            forwarder,
        });
    }

    async fn close_session(&self) {
        if let Some(session) = self.active.lock().await.take() {
            session.teardown(&self.events);
        }
    }

    /// Best-effort, independent of task state; a failure only logs.
    fn spawn_weather_fetch(&self) {
        let weather = Arc::clone(&self.weather);
        let events = self.events.clone();
        tokio::spawn(async move {
            match weather.fetch().await {
                Ok(report) => {
                    let _ = events.try_send(UiEvent::Weather(report));
                }
                Err(e) => tracing::warn!(error = %e, "weather fetch failed"),
            }
        });
    }

    /// Identity of the signed-in user, if any.
    pub async fn current_user(&self) -> Option<AuthUser> {
        self.active.lock().await.as_ref().map(|s| s.user.clone())
    }

    /// Last-known ordered task list.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotSignedIn`] when no session is open.
    pub async fn tasks(&self) -> Result<Vec<Task>, SessionError> {
        let guard = self.active.lock().await;
        let session = guard.as_ref().ok_or(SessionError::NotSignedIn)?;
        Ok(session.cache.snapshot())
    }

    /// Creates a task; `time_remaining` starts at the limit.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotSignedIn`] or a validation error; store failures
    /// are logged and swallowed.
    pub async fn add_task(&self, text: &str, time_limit: u32) -> Result<(), SessionError> {
        let guard = self.active.lock().await;
        let session = guard.as_ref().ok_or(SessionError::NotSignedIn)?;
        let fields = TaskFields::for_new(text.trim(), time_limit);
        fields.validate()?;
        if let Err(e) = self.store.create(session.user.id, fields).await {
            tracing::warn!(error = %e, "task create failed");
        }
        Ok(())
    }

    /// Replaces a task's text and limit. The new limit unconditionally
    /// rewinds `time_remaining` to it, even while the countdown is ticking;
    /// the countdown itself is not stopped.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotSignedIn`], [`SessionError::UnknownTask`], or a
    /// validation error.
    pub async fn edit_task(
        &self,
        id: TaskId,
        text: &str,
        time_limit: u32,
    ) -> Result<(), SessionError> {
        let guard = self.active.lock().await;
        let session = guard.as_ref().ok_or(SessionError::NotSignedIn)?;
        if session.cache.get(id).is_none() {
            return Err(SessionError::UnknownTask(id));
        }
        let text = text.trim();
        tickdown_proto::task::validate_text(text)?;
        let patch = TaskPatch {
            text: Some(text.to_string()),
            time_limit: Some(time_limit),
            time_remaining: Some(time_limit),
            ..TaskPatch::default()
        };
        if let Err(e) = self.store.update(session.user.id, id, patch).await {
            tracing::warn!(task = %id, error = %e, "task edit failed");
        }
        Ok(())
    }

    /// Flips the completed flag, returning the new value. Completing a
    /// ticking task stops its countdown first, with the usual stop write.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotSignedIn`] or [`SessionError::UnknownTask`].
    pub async fn toggle_completed(&self, id: TaskId) -> Result<bool, SessionError> {
        let guard = self.active.lock().await;
        let session = guard.as_ref().ok_or(SessionError::NotSignedIn)?;
        let task = session.cache.get(id).ok_or(SessionError::UnknownTask(id))?;
        let completed = !task.completed;
        if completed {
            session.timers.stop(id);
        }
        let patch = TaskPatch {
            completed: Some(completed),
            ..TaskPatch::default()
        };
        if let Err(e) = self.store.update(session.user.id, id, patch).await {
            tracing::warn!(task = %id, error = %e, "completion update failed");
        }
        Ok(completed)
    }

    /// Deletes a task, cancelling any running countdown first so no tick
    /// or stop write references the removed document.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotSignedIn`] or [`SessionError::UnknownTask`].
    pub async fn delete_task(&self, id: TaskId) -> Result<(), SessionError> {
        let guard = self.active.lock().await;
        let session = guard.as_ref().ok_or(SessionError::NotSignedIn)?;
        if session.cache.get(id).is_none() {
            return Err(SessionError::UnknownTask(id));
        }
        session.timers.cancel(id);
        if let Err(e) = self.store.delete(session.user.id, id).await {
            tracing::warn!(task = %id, error = %e, "task delete failed");
        }
        Ok(())
    }

    /// Deletes every completed task; a no-op when none match.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotSignedIn`] when no session is open.
    pub async fn clear_completed(&self) -> Result<(), SessionError> {
        let guard = self.active.lock().await;
        let session = guard.as_ref().ok_or(SessionError::NotSignedIn)?;
        match self.store.delete_completed(session.user.id).await {
            Ok(count) => tracing::debug!(count, "completed tasks cleared"),
            Err(e) => tracing::warn!(error = %e, "clear completed failed"),
        }
        Ok(())
    }

    /// Starts the countdown for a task.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotSignedIn`] or the refusing [`TimerError`].
    pub async fn start_timer(&self, id: TaskId) -> Result<(), SessionError> {
        let guard = self.active.lock().await;
        let session = guard.as_ref().ok_or(SessionError::NotSignedIn)?;
        session.timers.start(id)?;
        Ok(())
    }

    /// Stops the countdown for a task; returns whether one was running.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotSignedIn`] when no session is open.
    pub async fn stop_timer(&self, id: TaskId) -> Result<bool, SessionError> {
        let guard = self.active.lock().await;
        let session = guard.as_ref().ok_or(SessionError::NotSignedIn)?;
        Ok(session.timers.stop(id))
    }

    /// Rewinds a task to its full limit, stopping any countdown first.
    /// Returns the restored value; never auto-restarts.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotSignedIn`] or [`SessionError::UnknownTask`].
    pub async fn reset_timer(&self, id: TaskId) -> Result<u32, SessionError> {
        let guard = self.active.lock().await;
        let session = guard.as_ref().ok_or(SessionError::NotSignedIn)?;
        session.timers.reset(id).ok_or(SessionError::UnknownTask(id))
    }

    /// Whether a countdown is currently running for this id.
    pub async fn timer_running(&self, id: TaskId) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| s.timers.is_running(id))
    }

    /// Number of currently running countdowns.
    pub async fn active_timers(&self) -> usize {
        self.active
            .lock()
            .await
            .as_ref()
            .map_or(0, |s| s.timers.active_count())
    }
}

/// Applies each remote snapshot to the cache, then forwards it for render.
async fn forward_snapshots(
    mut subscription: Subscription,
    cache: Arc<TaskCache>,
    events: mpsc::Sender<UiEvent>,
) {
    while let Some(snapshot) = subscription.next().await {
        cache.install(snapshot.clone());
        let _ = events.try_send(UiEvent::TaskList(snapshot));
    }
    tracing::debug!("snapshot stream ended");
}
