//! WebSocket store adapter for the tickdown sync server.
//!
//! Implements [`TaskStore`] over one WebSocket connection. Requests are
//! correlated to acknowledgments by [`RequestId`]; a background reader task
//! routes each acknowledgment to its in-flight caller and each snapshot push
//! to the matching subscription.
//!
//! At most one live subscription per user exists on one connection;
//! subscribing again replaces the previous stream, which then ends.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tickdown_proto::task::{Task, TaskFields, TaskId, TaskPatch, UserId};
use tickdown_proto::wire::{self, Accept, ClientRequest, RejectReason, RequestId, ServerEvent};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{StoreError, Subscription, TaskStore};

/// Type alias for the write half of a WebSocket connection.
type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsSource =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// A registered snapshot forwarder for one user.
///
/// The generation distinguishes a replaced subscription from its successor
/// so a stale drop hook cannot unregister the live one.
struct SnapshotEntry {
    generation: u64,
    tx: mpsc::UnboundedSender<Vec<Task>>,
}

/// State shared between the adapter handle and its reader task.
struct Shared {
    /// Write half of the WebSocket connection (shared for concurrent sends).
    sink: Mutex<WsSink>,
    /// In-flight requests awaiting acknowledgment.
    pending: parking_lot::Mutex<HashMap<RequestId, oneshot::Sender<Result<Accept, RejectReason>>>>,
    /// Live snapshot forwarders, one per subscribed user.
    snapshots: parking_lot::Mutex<HashMap<UserId, SnapshotEntry>>,
    /// Next request correlation token.
    next_request: AtomicU64,
    /// Next subscription generation.
    next_generation: AtomicU64,
    /// Whether the WebSocket connection is active.
    connected: AtomicBool,
    /// How long to wait for an acknowledgment.
    request_timeout: Duration,
}

/// WebSocket-backed [`TaskStore`].
///
/// Created via [`WsStore::connect`], which establishes the connection and
/// spawns the background reader task.
pub struct WsStore {
    shared: Arc<Shared>,
    url: String,
    /// Kept for the adapter's lifetime; the reader exits on its own when the
    /// connection closes.
    _reader_handle: tokio::task::JoinHandle<()>,
}

impl WsStore {
    /// Connect to a sync server.
    ///
    /// # Errors
    ///
    /// [`StoreError::Timeout`] if the connection attempt times out,
    /// [`StoreError::Connect`] if it is refused or fails.
    pub async fn connect(
        url: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let (ws_stream, _response) = tokio::time::timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                tracing::warn!(url, "sync server connect timed out");
                StoreError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url, error = %e, "sync server connect failed");
                StoreError::Connect(e.to_string())
            })?;

        let (sink, source) = ws_stream.split();
        let shared = Arc::new(Shared {
            sink: Mutex::new(sink),
            pending: parking_lot::Mutex::new(HashMap::new()),
            snapshots: parking_lot::Mutex::new(HashMap::new()),
            next_request: AtomicU64::new(1),
            next_generation: AtomicU64::new(1),
            connected: AtomicBool::new(true),
            request_timeout,
        });
        let reader_handle = tokio::spawn(reader_loop(source, Arc::clone(&shared)));
        tracing::info!(url, "connected to sync server");

        Ok(Self {
            shared,
            url: url.to_string(),
            _reader_handle: reader_handle,
        })
    }

    /// The server URL this adapter is connected to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether the connection to the sync server is still up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    async fn request(&self, request: ClientRequest) -> Result<Accept, StoreError> {
        request_on(&self.shared, request).await
    }
}

impl TaskStore for WsStore {
    async fn subscribe(&self, user: UserId) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed);
        // Replacing an existing entry drops its sender, ending that stream.
        self.shared
            .snapshots
            .lock()
            .insert(user, SnapshotEntry { generation, tx });

        let request = ClientRequest::Subscribe {
            request: next_request_id(&self.shared),
            user,
        };
        match self.request(request).await {
            Ok(Accept::Subscribed) => {}
            Ok(other) => {
                remove_snapshot_entry(&self.shared, user, generation);
                return Err(unexpected_ack("Subscribe", &other));
            }
            Err(e) => {
                remove_snapshot_entry(&self.shared, user, generation);
                return Err(e);
            }
        }

        let hook_shared = Arc::clone(&self.shared);
        Ok(Subscription::new(rx, move || {
            if !remove_snapshot_entry(&hook_shared, user, generation) {
                // A newer subscription owns the server-side stream now.
                return;
            }
            if !hook_shared.connected.load(Ordering::Relaxed) {
                return;
            }
            let request = ClientRequest::Unsubscribe {
                request: next_request_id(&hook_shared),
                user,
            };
            // The hook can run outside the runtime during shutdown; the
            // server prunes the stream at disconnect anyway.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = request_on(&hook_shared, request).await {
                        tracing::debug!(user = %user, error = %e, "unsubscribe request failed");
                    }
                });
            }
        }))
    }

    async fn create(&self, user: UserId, fields: TaskFields) -> Result<TaskId, StoreError> {
        let request = ClientRequest::Create {
            request: next_request_id(&self.shared),
            user,
            fields,
        };
        match self.request(request).await? {
            Accept::Created(id) => Ok(id),
            other => Err(unexpected_ack("Create", &other)),
        }
    }

    async fn update(&self, user: UserId, id: TaskId, patch: TaskPatch) -> Result<(), StoreError> {
        let request = ClientRequest::Update {
            request: next_request_id(&self.shared),
            user,
            id,
            patch,
        };
        match self.request(request).await? {
            Accept::Updated => Ok(()),
            other => Err(unexpected_ack("Update", &other)),
        }
    }

    async fn delete(&self, user: UserId, id: TaskId) -> Result<(), StoreError> {
        let request = ClientRequest::Delete {
            request: next_request_id(&self.shared),
            user,
            id,
        };
        match self.request(request).await? {
            Accept::Deleted => Ok(()),
            other => Err(unexpected_ack("Delete", &other)),
        }
    }

    async fn delete_completed(&self, user: UserId) -> Result<u32, StoreError> {
        let request = ClientRequest::DeleteCompleted {
            request: next_request_id(&self.shared),
            user,
        };
        match self.request(request).await? {
            Accept::Cleared(count) => Ok(count),
            other => Err(unexpected_ack("DeleteCompleted", &other)),
        }
    }
}

fn next_request_id(shared: &Shared) -> RequestId {
    RequestId::from_raw(shared.next_request.fetch_add(1, Ordering::Relaxed))
}

/// Removes the snapshot entry for `user` if it still belongs to
/// `generation`; returns whether it was removed.
fn remove_snapshot_entry(shared: &Shared, user: UserId, generation: u64) -> bool {
    let mut snapshots = shared.snapshots.lock();
    if snapshots
        .get(&user)
        .is_some_and(|entry| entry.generation == generation)
    {
        snapshots.remove(&user);
        return true;
    }
    false
}

/// Sends one request and waits for its acknowledgment.
async fn request_on(shared: &Shared, request: ClientRequest) -> Result<Accept, StoreError> {
    if !shared.connected.load(Ordering::Relaxed) {
        return Err(StoreError::ConnectionClosed);
    }

    let id = request.request_id();
    let (tx, rx) = oneshot::channel();
    shared.pending.lock().insert(id, tx);

    let bytes = match wire::encode_request(&request) {
        Ok(bytes) => bytes,
        Err(e) => {
            shared.pending.lock().remove(&id);
            return Err(StoreError::Codec(e));
        }
    };

    let sent = shared
        .sink
        .lock()
        .await
        .send(Message::Binary(bytes.into()))
        .await;
    if let Err(e) = sent {
        tracing::warn!(error = %e, "sync request send failed");
        shared.connected.store(false, Ordering::Relaxed);
        shared.pending.lock().remove(&id);
        return Err(StoreError::ConnectionClosed);
    }

    match tokio::time::timeout(shared.request_timeout, rx).await {
        Ok(Ok(Ok(body))) => Ok(body),
        Ok(Ok(Err(RejectReason::NotFound(task)))) => Err(StoreError::NotFound(task)),
        Ok(Ok(Err(reason))) => Err(StoreError::Rejected(reason.to_string())),
        // The reader dropped the pending map on exit.
        Ok(Err(_)) => Err(StoreError::ConnectionClosed),
        Err(_) => {
            shared.pending.lock().remove(&id);
            Err(StoreError::Timeout)
        }
    }
}

fn unexpected_ack(op: &str, body: &Accept) -> StoreError {
    tracing::warn!(op, ?body, "unexpected acknowledgment body");
    StoreError::Rejected(format!("unexpected acknowledgment for {op}"))
}

/// Background task that reads server frames and routes them.
///
/// Acknowledgments complete the matching in-flight request; snapshot pushes
/// go to the subscribed forwarder. Malformed frames are logged and skipped —
/// the task does not disconnect on bad data. On exit, in-flight requests and
/// live subscriptions are dropped, surfacing [`StoreError::ConnectionClosed`]
/// to callers and ending the snapshot streams.
async fn reader_loop(mut source: WsSource, shared: Arc<Shared>) {
    while let Some(frame) = source.next().await {
        match frame {
            Ok(Message::Binary(data)) => match wire::decode_event(&data) {
                Ok(ServerEvent::Accepted { request, body }) => {
                    complete(&shared, request, Ok(body));
                }
                Ok(ServerEvent::Rejected { request, reason }) => {
                    complete(&shared, request, Err(reason));
                }
                Ok(ServerEvent::Snapshot { user, tasks }) => {
                    let mut snapshots = shared.snapshots.lock();
                    if let Some(entry) = snapshots.get(&user) {
                        if entry.tx.send(tasks).is_err() {
                            // Receiver gone before its hook ran.
                            snapshots.remove(&user);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "malformed sync frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("sync server closed the connection");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Text(_) | Message::Frame(_)) => {
                // Ignore non-protocol frames.
            }
            Err(e) => {
                tracing::warn!(error = %e, "sync WebSocket read error");
                break;
            }
        }
    }
    shared.connected.store(false, Ordering::Relaxed);
    // Fail in-flight requests and end snapshot streams.
    shared.pending.lock().clear();
    shared.snapshots.lock().clear();
    tracing::info!("sync reader task exiting");
}

fn complete(shared: &Shared, request: RequestId, result: Result<Accept, RejectReason>) {
    let Some(tx) = shared.pending.lock().remove(&request) else {
        tracing::debug!(request = %request, "acknowledgment with no matching request");
        return;
    };
    let _ = tx.send(result);
}
