//! Integration tests for the authentication-driven session lifecycle.
//!
//! Covers the transitions the auth watch stream can produce: applying a
//! pre-existing sign-in at startup, restoring the durable list on
//! re-sign-in, direct account switches without an intermediate sign-out,
//! and failed or redundant auth calls leaving the open session untouched.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use tickdown::auth::{AuthError, AuthProvider, AuthUser, LocalAuthProvider};
use tickdown::session::SessionController;
use tickdown::store::memory::MemoryStore;
use tickdown::ui::UiEvent;
use tickdown::weather::StaticWeather;
use tickdown_proto::task::Task;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{advance, timeout};

type Controller = SessionController<LocalAuthProvider, MemoryStore, StaticWeather>;

struct Rig {
    auth: Arc<LocalAuthProvider>,
    store: Arc<MemoryStore>,
    controller: Arc<Controller>,
    events: mpsc::Receiver<UiEvent>,
    listener: JoinHandle<()>,
}

fn setup() -> Rig {
    let auth = Arc::new(LocalAuthProvider::new());
    let store = Arc::new(MemoryStore::new());
    let weather = Arc::new(StaticWeather::default());
    let (tx, events) = mpsc::channel(256);
    let controller = Arc::new(SessionController::new(
        Arc::clone(&auth),
        Arc::clone(&store),
        weather,
        tx,
        Duration::from_secs(1),
    ));
    let listener = controller.spawn_auth_listener();
    Rig {
        auth,
        store,
        controller,
        events,
        listener,
    }
}

async fn next_task_list(events: &mut mpsc::Receiver<UiEvent>) -> Vec<Task> {
    loop {
        match timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Some(UiEvent::TaskList(tasks))) => return tasks,
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => panic!("no task list event arrived"),
        }
    }
}

/// Polls until the controller's session belongs to `user`.
async fn wait_for_user(controller: &Controller, user: &AuthUser) {
    for _ in 0..100 {
        if controller
            .current_user()
            .await
            .is_some_and(|u| u.id == user.id)
        {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("session never switched to {}", user.email);
}

async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// Startup against existing state
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn existing_sign_in_is_applied_on_startup() {
    let auth = Arc::new(LocalAuthProvider::new());
    let user = auth.sign_up("ada@example.com", "secret1").await.unwrap();

    // The controller comes up after the user is already signed in.
    let store = Arc::new(MemoryStore::new());
    let (tx, mut events) = mpsc::channel(256);
    let controller: Arc<Controller> = Arc::new(SessionController::new(
        Arc::clone(&auth),
        Arc::clone(&store),
        Arc::new(StaticWeather::default()),
        tx,
        Duration::from_secs(1),
    ));
    let listener = controller.spawn_auth_listener();

    let initial = next_task_list(&mut events).await;
    assert!(initial.is_empty());
    let current = controller.current_user().await.unwrap();
    assert_eq!(current.id, user.id);
    assert_eq!(store.subscriber_count(user.id), 1);

    listener.abort();
}

// ---------------------------------------------------------------------------
// Re-sign-in
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn re_signing_in_restores_the_durable_list() {
    let mut rig = setup();
    let user = rig.auth.sign_up("ada@example.com", "secret1").await.unwrap();
    assert!(next_task_list(&mut rig.events).await.is_empty());

    rig.controller.add_task("Water plants", 0).await.unwrap();
    rig.controller.add_task("Write report", 300).await.unwrap();
    let mut list = next_task_list(&mut rig.events).await;
    while list.len() < 2 {
        list = next_task_list(&mut rig.events).await;
    }

    rig.auth.sign_out().await.unwrap();
    let mut emptied = next_task_list(&mut rig.events).await;
    while !emptied.is_empty() {
        emptied = next_task_list(&mut rig.events).await;
    }
    assert_eq!(rig.store.subscriber_count(user.id), 0);

    rig.auth.sign_in("ada@example.com", "secret1").await.unwrap();
    let restored = next_task_list(&mut rig.events).await;
    assert_eq!(restored.len(), 2);
    assert_eq!(restored[0].text, "Water plants");
    assert_eq!(restored[1].text, "Write report");
    assert!(restored[0].order < restored[1].order);
    assert_eq!(rig.store.subscriber_count(user.id), 1);

    rig.listener.abort();
}

// ---------------------------------------------------------------------------
// Direct account switches
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn switching_accounts_without_sign_out_swaps_sessions() {
    let mut rig = setup();
    let ada = rig.auth.sign_up("ada@example.com", "secret1").await.unwrap();
    assert!(next_task_list(&mut rig.events).await.is_empty());

    rig.controller.add_task("Ada's task", 60).await.unwrap();
    let list = next_task_list(&mut rig.events).await;
    rig.controller.start_timer(list[0].id).await.unwrap();
    assert_eq!(rig.controller.active_timers().await, 1);

    // Grace signs up while Ada is still signed in: the watch stream jumps
    // straight from one signed-in state to another.
    let grace = rig
        .auth
        .sign_up("grace@example.com", "secret1")
        .await
        .unwrap();
    wait_for_user(&rig.controller, &grace).await;
    settle().await;

    assert_eq!(rig.controller.active_timers().await, 0);
    assert_eq!(rig.store.subscriber_count(ada.id), 0);
    assert_eq!(rig.store.subscriber_count(grace.id), 1);
    assert!(rig.controller.tasks().await.unwrap().is_empty());
    // Ada's data is untouched in the store.
    assert_eq!(rig.store.task_count(ada.id), 1);

    // Ada's countdown is dead: no ticks arrive for anyone.
    advance(Duration::from_secs(3)).await;
    settle().await;
    while let Ok(event) = rig.events.try_recv() {
        assert!(!matches!(event, UiEvent::CountdownTick { .. }));
    }

    rig.listener.abort();
}

#[tokio::test(start_paused = true)]
async fn rapid_account_switches_settle_on_the_last_user() {
    let rig = setup();
    let ada = rig.auth.sign_up("ada@example.com", "secret1").await.unwrap();
    let bob = rig.auth.sign_up("bob@example.com", "secret1").await.unwrap();
    let carol = rig
        .auth
        .sign_up("carol@example.com", "secret1")
        .await
        .unwrap();

    // The watch stream may coalesce the middle state entirely; only the
    // final session matters.
    wait_for_user(&rig.controller, &carol).await;
    settle().await;

    assert_eq!(rig.store.subscriber_count(ada.id), 0);
    assert_eq!(rig.store.subscriber_count(bob.id), 0);
    assert_eq!(rig.store.subscriber_count(carol.id), 1);
    assert!(rig.controller.tasks().await.unwrap().is_empty());

    rig.listener.abort();
}

// ---------------------------------------------------------------------------
// Calls that must not disturb the session
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn failed_sign_in_leaves_the_open_session_untouched() {
    let mut rig = setup();
    let ada = rig.auth.sign_up("ada@example.com", "secret1").await.unwrap();
    assert!(next_task_list(&mut rig.events).await.is_empty());

    let err = rig
        .auth
        .sign_in("ada@example.com", "wrong-password")
        .await
        .unwrap_err();
    assert_eq!(err, AuthError::InvalidCredentials);

    settle().await;
    let current = rig.controller.current_user().await.unwrap();
    assert_eq!(current.id, ada.id);
    assert_eq!(rig.store.subscriber_count(ada.id), 1);

    // The session still works.
    rig.controller.add_task("Still here", 0).await.unwrap();
    let list = next_task_list(&mut rig.events).await;
    assert_eq!(list[0].text, "Still here");

    rig.listener.abort();
}

#[tokio::test(start_paused = true)]
async fn sign_out_while_signed_out_is_a_noop() {
    let mut rig = setup();

    rig.auth.sign_out().await.unwrap();
    settle().await;
    assert!(rig.controller.current_user().await.is_none());
    assert!(rig.events.try_recv().is_err());

    // The listener is still live: a later sign-up opens a session normally.
    let user = rig.auth.sign_up("ada@example.com", "secret1").await.unwrap();
    assert!(next_task_list(&mut rig.events).await.is_empty());
    assert_eq!(rig.store.subscriber_count(user.id), 1);

    rig.listener.abort();
}
