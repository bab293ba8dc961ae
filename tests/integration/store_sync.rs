//! Integration tests for task store parity.
//!
//! Every scenario is written once against the [`TaskStore`] trait and run
//! against both backends: the in-process [`MemoryStore`] and a [`WsStore`]
//! talking to a live in-process sync server. The two must be behaviorally
//! interchangeable — same snapshots, same errors, same idempotency.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;

use tickdown::store::memory::MemoryStore;
use tickdown::store::remote::WsStore;
use tickdown::store::{StoreError, Subscription, TaskStore};
use tickdown_proto::task::{Task, TaskFields, TaskId, TaskPatch, UserId};
use tokio::time::timeout;

/// Start the sync server in-process and connect a store to it.
async fn ws_store() -> (WsStore, tokio::task::JoinHandle<()>) {
    let (addr, handle) = tickdown_server::server::start_server("127.0.0.1:0")
        .await
        .expect("failed to start sync server");
    let url = format!("ws://{addr}/sync");
    let store = WsStore::connect(&url, Duration::from_secs(5), Duration::from_secs(5))
        .await
        .expect("failed to connect to sync server");
    (store, handle)
}

async fn next_snapshot(sub: &mut Subscription) -> Vec<Task> {
    timeout(Duration::from_secs(5), sub.next())
        .await
        .expect("snapshot timed out")
        .expect("snapshot stream ended")
}

fn completed_patch() -> TaskPatch {
    TaskPatch {
        completed: Some(true),
        ..TaskPatch::default()
    }
}

// ---------------------------------------------------------------------------
// Scenarios, written once against the trait
// ---------------------------------------------------------------------------

async fn create_reaches_subscribers<S: TaskStore>(store: &S) {
    let user = UserId::new();
    let mut sub = store.subscribe(user).await.expect("subscribe");
    assert!(next_snapshot(&mut sub).await.is_empty());

    let id = store
        .create(user, TaskFields::for_new("Write report", 300))
        .await
        .expect("create");

    let tasks = next_snapshot(&mut sub).await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, id);
    assert_eq!(tasks[0].text, "Write report");
    assert_eq!(tasks[0].time_limit, 300);
    assert_eq!(tasks[0].time_remaining, 300);
    assert!(!tasks[0].completed);
    assert!(!tasks[0].timer_active);
    assert!(tasks[0].order > 0);
}

async fn update_merges_partial_fields<S: TaskStore>(store: &S) {
    let user = UserId::new();
    let id = store
        .create(user, TaskFields::for_new("Write report", 300))
        .await
        .expect("create");

    let mut sub = store.subscribe(user).await.expect("subscribe");
    assert_eq!(next_snapshot(&mut sub).await.len(), 1);

    store
        .update(user, id, completed_patch())
        .await
        .expect("update");

    let tasks = next_snapshot(&mut sub).await;
    assert!(tasks[0].completed);
    // Untouched fields survive the merge.
    assert_eq!(tasks[0].text, "Write report");
    assert_eq!(tasks[0].time_remaining, 300);
}

async fn shrinking_the_limit_clamps_remaining<S: TaskStore>(store: &S) {
    let user = UserId::new();
    let id = store
        .create(user, TaskFields::for_new("Write report", 300))
        .await
        .expect("create");

    store
        .update(
            user,
            id,
            TaskPatch {
                time_limit: Some(120),
                ..TaskPatch::default()
            },
        )
        .await
        .expect("update");

    let mut sub = store.subscribe(user).await.expect("subscribe");
    let tasks = next_snapshot(&mut sub).await;
    assert_eq!(tasks[0].time_limit, 120);
    assert_eq!(tasks[0].time_remaining, 120);
}

async fn update_unknown_task_is_not_found<S: TaskStore>(store: &S) {
    let user = UserId::new();
    let missing = TaskId::new();
    let err = store
        .update(user, missing, completed_patch())
        .await
        .expect_err("update of a missing task should fail");
    assert!(matches!(err, StoreError::NotFound(id) if id == missing));
}

async fn blank_text_update_is_rejected<S: TaskStore>(store: &S) {
    let user = UserId::new();
    let id = store
        .create(user, TaskFields::for_new("fine", 0))
        .await
        .expect("create");

    let err = store
        .update(
            user,
            id,
            TaskPatch {
                text: Some("   ".to_string()),
                ..TaskPatch::default()
            },
        )
        .await
        .expect_err("blank replacement text should be refused");
    assert!(matches!(err, StoreError::Rejected(_)));

    // The stored text is untouched.
    let mut sub = store.subscribe(user).await.expect("subscribe");
    assert_eq!(next_snapshot(&mut sub).await[0].text, "fine");
}

async fn delete_is_idempotent<S: TaskStore>(store: &S) {
    let user = UserId::new();
    let id = store
        .create(user, TaskFields::for_new("Write report", 60))
        .await
        .expect("create");

    store.delete(user, id).await.expect("first delete");
    store.delete(user, id).await.expect("second delete");

    let mut sub = store.subscribe(user).await.expect("subscribe");
    assert!(next_snapshot(&mut sub).await.is_empty());
}

async fn delete_completed_returns_the_count<S: TaskStore>(store: &S) {
    let user = UserId::new();
    let keep = store
        .create(user, TaskFields::for_new("open", 60))
        .await
        .expect("create");
    for text in ["done-1", "done-2"] {
        let id = store
            .create(user, TaskFields::for_new(text, 0))
            .await
            .expect("create");
        store
            .update(user, id, completed_patch())
            .await
            .expect("update");
    }

    assert_eq!(store.delete_completed(user).await.expect("clear"), 2);
    // Zero matches is a success, not an error.
    assert_eq!(store.delete_completed(user).await.expect("clear again"), 0);

    let mut sub = store.subscribe(user).await.expect("subscribe");
    let tasks = next_snapshot(&mut sub).await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, keep);
}

async fn lists_stay_ordered_oldest_first<S: TaskStore>(store: &S) {
    let user = UserId::new();
    for text in ["first", "second", "third"] {
        store
            .create(user, TaskFields::for_new(text, 0))
            .await
            .expect("create");
    }

    let mut sub = store.subscribe(user).await.expect("subscribe");
    let tasks = next_snapshot(&mut sub).await;
    assert_eq!(tasks.len(), 3);
    for pair in tasks.windows(2) {
        assert!(pair[0].order < pair[1].order);
    }
    let texts: Vec<&str> = tasks.iter().map(|t| t.text.as_str()).collect();
    assert_eq!(texts, vec!["first", "second", "third"]);
}

async fn resubscribing_after_drop_yields_fresh_snapshots<S: TaskStore>(store: &S) {
    let user = UserId::new();
    let mut sub = store.subscribe(user).await.expect("subscribe");
    assert!(next_snapshot(&mut sub).await.is_empty());
    drop(sub);
    // Brief pause to let the unsubscribe land before anything else.
    tokio::time::sleep(Duration::from_millis(50)).await;

    store
        .create(user, TaskFields::for_new("afterwards", 60))
        .await
        .expect("create");

    let mut fresh = store.subscribe(user).await.expect("resubscribe");
    let tasks = next_snapshot(&mut fresh).await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].text, "afterwards");

    store
        .update(user, tasks[0].id, completed_patch())
        .await
        .expect("update");
    assert!(next_snapshot(&mut fresh).await[0].completed);
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_reaches_subscribers_in_memory() {
    create_reaches_subscribers(&MemoryStore::new()).await;
}

#[tokio::test]
async fn update_merges_partial_fields_in_memory() {
    update_merges_partial_fields(&MemoryStore::new()).await;
}

#[tokio::test]
async fn shrinking_the_limit_clamps_remaining_in_memory() {
    shrinking_the_limit_clamps_remaining(&MemoryStore::new()).await;
}

#[tokio::test]
async fn update_unknown_task_is_not_found_in_memory() {
    update_unknown_task_is_not_found(&MemoryStore::new()).await;
}

#[tokio::test]
async fn blank_text_update_is_rejected_in_memory() {
    blank_text_update_is_rejected(&MemoryStore::new()).await;
}

#[tokio::test]
async fn delete_is_idempotent_in_memory() {
    delete_is_idempotent(&MemoryStore::new()).await;
}

#[tokio::test]
async fn delete_completed_returns_the_count_in_memory() {
    delete_completed_returns_the_count(&MemoryStore::new()).await;
}

#[tokio::test]
async fn lists_stay_ordered_oldest_first_in_memory() {
    lists_stay_ordered_oldest_first(&MemoryStore::new()).await;
}

#[tokio::test]
async fn resubscribing_after_drop_in_memory() {
    resubscribing_after_drop_yields_fresh_snapshots(&MemoryStore::new()).await;
}

// ---------------------------------------------------------------------------
// WebSocket backend against a live server
// ---------------------------------------------------------------------------

#[tokio::test]
async fn create_reaches_subscribers_over_websocket() {
    let (store, _server) = ws_store().await;
    create_reaches_subscribers(&store).await;
}

#[tokio::test]
async fn update_merges_partial_fields_over_websocket() {
    let (store, _server) = ws_store().await;
    update_merges_partial_fields(&store).await;
}

#[tokio::test]
async fn shrinking_the_limit_clamps_remaining_over_websocket() {
    let (store, _server) = ws_store().await;
    shrinking_the_limit_clamps_remaining(&store).await;
}

#[tokio::test]
async fn update_unknown_task_is_not_found_over_websocket() {
    let (store, _server) = ws_store().await;
    update_unknown_task_is_not_found(&store).await;
}

#[tokio::test]
async fn blank_text_update_is_rejected_over_websocket() {
    let (store, _server) = ws_store().await;
    blank_text_update_is_rejected(&store).await;
}

#[tokio::test]
async fn delete_is_idempotent_over_websocket() {
    let (store, _server) = ws_store().await;
    delete_is_idempotent(&store).await;
}

#[tokio::test]
async fn delete_completed_returns_the_count_over_websocket() {
    let (store, _server) = ws_store().await;
    delete_completed_returns_the_count(&store).await;
}

#[tokio::test]
async fn lists_stay_ordered_oldest_first_over_websocket() {
    let (store, _server) = ws_store().await;
    lists_stay_ordered_oldest_first(&store).await;
}

#[tokio::test]
async fn resubscribing_after_drop_over_websocket() {
    let (store, _server) = ws_store().await;
    resubscribing_after_drop_yields_fresh_snapshots(&store).await;
}
