//! Sync server core: shared state, WebSocket handler, and request routing.
//!
//! The sync server accepts WebSocket connections and speaks the tickdown
//! wire protocol: clients send mutations and subscription requests, the
//! server acknowledges each one and pushes a full task-list snapshot to
//! every connection subscribed to the affected user.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tickdown_proto::task::UserId;
use tickdown_proto::wire::{self, Accept, ClientRequest, ServerEvent};
use tokio::sync::{RwLock, mpsc};

use crate::collections::TaskCollections;

/// Identifier for one WebSocket connection, unique within the process.
type ConnId = u64;

/// Shared sync server state: the task collections plus the subscriber
/// registry.
pub struct SyncState {
    /// Per-user task collections, the server's source of truth.
    pub collections: TaskCollections,
    /// Outbound senders of the connections subscribed to each user.
    subscribers: RwLock<HashMap<UserId, HashMap<ConnId, mpsc::UnboundedSender<Message>>>>,
    /// Users each live connection is subscribed to, for disconnect cleanup.
    connections: RwLock<HashMap<ConnId, HashSet<UserId>>>,
    /// Next connection identifier.
    next_conn: AtomicU64,
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncState {
    /// Creates sync state with empty collections and default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_collections(TaskCollections::new())
    }

    /// Creates sync state around pre-configured [`TaskCollections`].
    #[must_use]
    pub fn with_collections(collections: TaskCollections) -> Self {
        Self {
            collections,
            subscribers: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
            next_conn: AtomicU64::new(1),
        }
    }

    fn next_conn_id(&self) -> ConnId {
        self.next_conn.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a connection's interest in one user's snapshots.
    ///
    /// Subscribing twice from the same connection replaces the stored sender,
    /// which is harmless: it is the same channel.
    async fn add_subscriber(
        &self,
        user: UserId,
        conn: ConnId,
        tx: mpsc::UnboundedSender<Message>,
    ) {
        self.subscribers
            .write()
            .await
            .entry(user)
            .or_default()
            .insert(conn, tx);
        self.connections
            .write()
            .await
            .entry(conn)
            .or_default()
            .insert(user);
    }

    /// Removes one connection's subscription to one user.
    async fn remove_subscriber(&self, user: UserId, conn: ConnId) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(entry) = subscribers.get_mut(&user) {
            entry.remove(&conn);
            if entry.is_empty() {
                subscribers.remove(&user);
            }
        }
        drop(subscribers);

        let mut connections = self.connections.write().await;
        if let Some(users) = connections.get_mut(&conn) {
            users.remove(&user);
        }
    }

    /// Removes every subscription held by a disconnecting connection.
    async fn drop_connection(&self, conn: ConnId) {
        let Some(users) = self.connections.write().await.remove(&conn) else {
            return;
        };
        let mut subscribers = self.subscribers.write().await;
        for user in users {
            if let Some(entry) = subscribers.get_mut(&user) {
                entry.remove(&conn);
                if entry.is_empty() {
                    subscribers.remove(&user);
                }
            }
        }
    }

    /// Number of connections currently subscribed to a user.
    pub async fn subscriber_count(&self, user: UserId) -> usize {
        self.subscribers
            .read()
            .await
            .get(&user)
            .map_or(0, HashMap::len)
    }

    /// Pushes the user's current snapshot to every subscribed connection.
    ///
    /// Send failures are ignored here; a dead writer task means the
    /// connection is going away and [`Self::drop_connection`] will prune it.
    async fn broadcast_snapshot(&self, user: UserId) {
        let tasks = self.collections.snapshot(user).await;
        let event = ServerEvent::Snapshot { user, tasks };
        let bytes = match wire::encode_event(&event) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(user = %user, error = %e, "failed to encode snapshot");
                return;
            }
        };

        let subscribers = self.subscribers.read().await;
        if let Some(entries) = subscribers.get(&user) {
            for tx in entries.values() {
                let _ = tx.send(Message::Binary(bytes.clone().into()));
            }
        }
    }
}

/// Handles an upgraded WebSocket connection.
///
/// The connection lifecycle:
/// 1. Spawn a writer task that owns the socket's send half; every outbound
///    frame (acknowledgment or snapshot) goes through its channel, so a
///    request's acknowledgment always precedes the snapshot it triggers.
/// 2. Read requests in a loop, applying each against the shared state.
/// 3. On disconnect, drop every subscription the connection held.
pub async fn handle_socket(socket: WebSocket, state: Arc<SyncState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let conn = state.next_conn_id();
    tracing::info!(conn, "client connected");

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(conn, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let reader_tx = tx.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_request(conn, &reader_tx, &data, &reader_state).await;
                }
                Message::Close(_) => {
                    tracing::info!(conn, "received close frame");
                    break;
                }
                _ => {
                    // Ignore text, ping, pong frames.
                }
            }
        }
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.drop_connection(conn).await;
    tracing::info!(conn, "client disconnected");
}

/// Decodes and applies a single client request, replying on `tx`.
async fn handle_request(
    conn: ConnId,
    tx: &mpsc::UnboundedSender<Message>,
    data: &[u8],
    state: &Arc<SyncState>,
) {
    let request = match wire::decode_request(data) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(conn, error = %e, "failed to decode request");
            return;
        }
    };
    let request_id = request.request_id();

    match request {
        ClientRequest::Subscribe { user, .. } => {
            state.add_subscriber(user, conn, tx.clone()).await;
            send_event(tx, &ServerEvent::Accepted {
                request: request_id,
                body: Accept::Subscribed,
            });
            // Initial snapshot, after the acknowledgment.
            let tasks = state.collections.snapshot(user).await;
            send_event(tx, &ServerEvent::Snapshot { user, tasks });
            tracing::info!(conn, user = %user, "subscription opened");
        }
        ClientRequest::Unsubscribe { user, .. } => {
            state.remove_subscriber(user, conn).await;
            send_event(tx, &ServerEvent::Accepted {
                request: request_id,
                body: Accept::Unsubscribed,
            });
            tracing::info!(conn, user = %user, "subscription closed");
        }
        ClientRequest::Create { user, fields, .. } => {
            match state.collections.create(user, fields).await {
                Ok(task_id) => {
                    send_event(tx, &ServerEvent::Accepted {
                        request: request_id,
                        body: Accept::Created(task_id),
                    });
                    state.broadcast_snapshot(user).await;
                    tracing::debug!(conn, user = %user, task = %task_id, "task created");
                }
                Err(reason) => {
                    tracing::warn!(conn, user = %user, reason = %reason, "create rejected");
                    send_event(tx, &ServerEvent::Rejected {
                        request: request_id,
                        reason,
                    });
                }
            }
        }
        ClientRequest::Update { user, id, patch, .. } => {
            match state.collections.update(user, id, &patch).await {
                Ok(()) => {
                    send_event(tx, &ServerEvent::Accepted {
                        request: request_id,
                        body: Accept::Updated,
                    });
                    state.broadcast_snapshot(user).await;
                    tracing::debug!(conn, user = %user, task = %id, "task updated");
                }
                Err(reason) => {
                    tracing::debug!(conn, user = %user, task = %id, reason = %reason, "update rejected");
                    send_event(tx, &ServerEvent::Rejected {
                        request: request_id,
                        reason,
                    });
                }
            }
        }
        ClientRequest::Delete { user, id, .. } => {
            let existed = state.collections.delete(user, id).await;
            send_event(tx, &ServerEvent::Accepted {
                request: request_id,
                body: Accept::Deleted,
            });
            if existed {
                state.broadcast_snapshot(user).await;
                tracing::debug!(conn, user = %user, task = %id, "task deleted");
            } else {
                tracing::debug!(conn, user = %user, task = %id, "delete of unknown task acknowledged");
            }
        }
        ClientRequest::DeleteCompleted { user, .. } => {
            let count = state.collections.delete_completed(user).await;
            send_event(tx, &ServerEvent::Accepted {
                request: request_id,
                body: Accept::Cleared(count),
            });
            if count > 0 {
                state.broadcast_snapshot(user).await;
            }
            tracing::debug!(conn, user = %user, count, "completed tasks cleared");
        }
    }
}

/// Encodes a server event and queues it on a connection's writer channel.
fn send_event(tx: &mpsc::UnboundedSender<Message>, event: &ServerEvent) {
    match wire::encode_event(event) {
        Ok(bytes) => {
            let _ = tx.send(Message::Binary(bytes.into()));
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to encode server event");
        }
    }
}

/// Starts the sync server on the given address and returns the bound address
/// and a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(SyncState::new())).await
}

/// Starts the sync server with a pre-configured [`SyncState`].
///
/// Use [`SyncState::with_collections`] to apply limits from the resolved
/// [`crate::config::ServerConfig`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<SyncState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/sync", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "sync server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<SyncState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
