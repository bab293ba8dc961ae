//! End-to-end tests: session controller and timer engine running against a
//! live sync server over WebSocket.
//!
//! The countdown interval is shrunk to 50ms so runs complete quickly; the
//! assertions inspect both the client's event stream and the server's
//! collections to confirm what actually got persisted.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use tickdown::auth::{AuthProvider, AuthUser, LocalAuthProvider};
use tickdown::session::SessionController;
use tickdown::store::TaskStore;
use tickdown::store::remote::WsStore;
use tickdown::ui::UiEvent;
use tickdown::weather::StaticWeather;
use tickdown_proto::task::{Task, TaskPatch, UserId};
use tickdown_server::server::{SyncState, start_server_with_state};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};

type Controller = SessionController<LocalAuthProvider, WsStore, StaticWeather>;

struct Rig {
    state: Arc<SyncState>,
    url: String,
    auth: Arc<LocalAuthProvider>,
    controller: Arc<Controller>,
    events: mpsc::Receiver<UiEvent>,
    listener: JoinHandle<()>,
    server: JoinHandle<()>,
}

async fn setup() -> Rig {
    let state = Arc::new(SyncState::new());
    let (addr, server) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start sync server");
    let url = format!("ws://{addr}/sync");
    let store = Arc::new(
        WsStore::connect(&url, Duration::from_secs(5), Duration::from_secs(5))
            .await
            .expect("failed to connect to sync server"),
    );

    let auth = Arc::new(LocalAuthProvider::new());
    let (tx, events) = mpsc::channel(256);
    let controller = Arc::new(SessionController::new(
        Arc::clone(&auth),
        store,
        Arc::new(StaticWeather::default()),
        tx,
        Duration::from_millis(50),
    ));
    let listener = controller.spawn_auth_listener();
    Rig {
        state,
        url,
        auth,
        controller,
        events,
        listener,
        server,
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

async fn sign_up(rig: &mut Rig, email: &str) -> AuthUser {
    let user = rig.auth.sign_up(email, "secret1").await.expect("sign up");
    let initial = next_task_list(&mut rig.events).await;
    assert!(initial.is_empty());
    user
}

/// Receives countdown ticks until `target` is reached, skipping snapshot
/// and weather events along the way.
async fn tick_down_to(events: &mut mpsc::Receiver<UiEvent>, target: u32) {
    loop {
        match timeout(Duration::from_secs(5), events.recv()).await {
            Ok(Some(UiEvent::CountdownTick { remaining, .. })) if remaining == target => return,
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => panic!("countdown never reached {target}"),
        }
    }
}

/// Polls the server's collection until `check` passes for its single task.
async fn wait_for_server_task(
    state: &SyncState,
    user: UserId,
    check: impl Fn(&Task) -> bool,
) -> Task {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let tasks = state.collections.snapshot(user).await;
        if let Some(task) = tasks.iter().find(|t| check(t)) {
            return task.clone();
        }
        assert!(
            Instant::now() < deadline,
            "server never reached the expected state: {tasks:?}"
        );
        sleep(Duration::from_millis(25)).await;
    }
}

// ---------------------------------------------------------------------------
// Countdown persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn countdown_runs_to_zero_and_the_server_sees_the_stop() {
    let mut rig = setup().await;
    let user = sign_up(&mut rig, "ada@example.com").await;

    rig.controller.add_task("Pomodoro", 6).await.unwrap();
    let list = next_task_list(&mut rig.events).await;
    let id = list[0].id;

    rig.controller.start_timer(id).await.unwrap();
    loop {
        match timeout(Duration::from_secs(10), rig.events.recv()).await {
            Ok(Some(UiEvent::TimerFinished { id: fid, text })) => {
                assert_eq!(fid, id);
                assert_eq!(text, "Pomodoro");
                break;
            }
            Ok(Some(_)) => {}
            other => panic!("countdown never finished: {other:?}"),
        }
    }
    assert!(!rig.controller.timer_running(id).await);

    let stored =
        wait_for_server_task(&rig.state, user.id, |t| {
            t.time_remaining == 0 && !t.timer_active
        })
        .await;
    assert_eq!(stored.id, id);
    assert!(!stored.completed);

    rig.listener.abort();
    rig.server.abort();
}

#[tokio::test]
async fn stopped_countdown_survives_a_reconnect() {
    let mut rig = setup().await;
    let user = sign_up(&mut rig, "ada@example.com").await;

    rig.controller.add_task("Write report", 300).await.unwrap();
    let list = next_task_list(&mut rig.events).await;
    let id = list[0].id;

    rig.controller.start_timer(id).await.unwrap();
    tick_down_to(&mut rig.events, 297).await;
    assert!(rig.controller.stop_timer(id).await.unwrap());

    wait_for_server_task(&rig.state, user.id, |t| {
        t.time_remaining == 297 && !t.timer_active
    })
    .await;

    rig.auth.sign_out().await.unwrap();
    let mut emptied = next_task_list(&mut rig.events).await;
    while !emptied.is_empty() {
        emptied = next_task_list(&mut rig.events).await;
    }

    // A brand-new connection reads the stopped countdown back.
    let other = WsStore::connect(&rig.url, Duration::from_secs(5), Duration::from_secs(5))
        .await
        .expect("reconnect");
    let mut sub = other.subscribe(user.id).await.expect("subscribe");
    let tasks = timeout(Duration::from_secs(5), sub.next())
        .await
        .expect("snapshot timed out")
        .expect("snapshot stream ended");
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].time_remaining, 297);
    assert!(!tasks[0].timer_active);

    rig.listener.abort();
    rig.server.abort();
}

// ---------------------------------------------------------------------------
// Multi-client sync
// ---------------------------------------------------------------------------

#[tokio::test]
async fn edits_propagate_between_live_clients() {
    let mut rig = setup().await;
    let user = sign_up(&mut rig, "ada@example.com").await;

    rig.controller.add_task("Shared plan", 120).await.unwrap();
    let list = next_task_list(&mut rig.events).await;
    let id = list[0].id;

    // A second device signs into the same account.
    let device_b = WsStore::connect(&rig.url, Duration::from_secs(5), Duration::from_secs(5))
        .await
        .expect("connect device B");
    let mut sub_b = device_b.subscribe(user.id).await.expect("subscribe B");
    let seen = timeout(Duration::from_secs(5), sub_b.next())
        .await
        .expect("snapshot timed out")
        .expect("snapshot stream ended");
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].text, "Shared plan");

    // Device B edits; device A's rendered list follows.
    device_b
        .update(
            user.id,
            id,
            TaskPatch {
                text: Some("Shared plan (edited)".to_string()),
                ..TaskPatch::default()
            },
        )
        .await
        .expect("update from device B");

    let mut list = next_task_list(&mut rig.events).await;
    while list[0].text != "Shared plan (edited)" {
        list = next_task_list(&mut rig.events).await;
    }
    assert_eq!(list[0].time_limit, 120);

    rig.listener.abort();
    rig.server.abort();
}

// ---------------------------------------------------------------------------
// Sign-out scope
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sign_out_clears_the_client_but_not_the_server() {
    let mut rig = setup().await;
    let user = sign_up(&mut rig, "ada@example.com").await;

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
    assert!(rig.controller.tasks().await.is_err());

    // The server keeps the collection; only this client's view blanked.
    let tasks = rig.state.collections.snapshot(user.id).await;
    assert_eq!(tasks.len(), 2);

    // The teardown's unsubscribe reaches the server.
    let deadline = Instant::now() + Duration::from_secs(5);
    while rig.state.subscriber_count(user.id).await > 0 {
        assert!(Instant::now() < deadline, "subscription never unregistered");
        sleep(Duration::from_millis(25)).await;
    }

    rig.listener.abort();
    rig.server.abort();
}
