//! Sync protocol messages between a Tickdown client and the sync server.
//!
//! One WebSocket connection carries postcard-encoded [`ClientRequest`] frames
//! upstream and [`ServerEvent`] frames downstream. Requests carry a
//! connection-scoped [`RequestId`] so the client can match replies to
//! in-flight calls; [`ServerEvent::Snapshot`] frames are unsolicited pushes
//! delivered to every subscriber of a user's collection.

use serde::{Deserialize, Serialize};

use crate::codec::{self, CodecError};
use crate::task::{Task, TaskFields, TaskId, TaskPatch, UserId};

/// Correlation token for a request/reply pair on one connection.
///
/// Assigned by the client from a per-connection counter; the server echoes
/// it back verbatim in [`ServerEvent::Accepted`] / [`ServerEvent::Rejected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(u64);

impl RequestId {
    /// Wraps a raw counter value.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw counter value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Requests a client sends to the sync server.
///
/// Every request is scoped to one user's task collection. The server answers
/// each request with exactly one [`ServerEvent::Accepted`] or
/// [`ServerEvent::Rejected`] carrying the same [`RequestId`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientRequest {
    /// Start streaming snapshots of the user's collection on this
    /// connection. The server replies `Accepted(Subscribed)` and immediately
    /// follows with the current [`ServerEvent::Snapshot`].
    Subscribe {
        /// Correlation token.
        request: RequestId,
        /// Whose collection to stream.
        user: UserId,
    },

    /// Stop streaming snapshots for the user on this connection.
    Unsubscribe {
        /// Correlation token.
        request: RequestId,
        /// Whose collection to stop streaming.
        user: UserId,
    },

    /// Create a task document. The server assigns the id and the monotonic
    /// order token and replies `Accepted(Created(id))`.
    Create {
        /// Correlation token.
        request: RequestId,
        /// Owning user.
        user: UserId,
        /// Client-supplied document fields.
        fields: TaskFields,
    },

    /// Merge a partial update into an existing task document.
    Update {
        /// Correlation token.
        request: RequestId,
        /// Owning user.
        user: UserId,
        /// Which document to update.
        id: TaskId,
        /// Fields to merge.
        patch: TaskPatch,
    },

    /// Delete a task document permanently.
    Delete {
        /// Correlation token.
        request: RequestId,
        /// Owning user.
        user: UserId,
        /// Which document to delete.
        id: TaskId,
    },

    /// Delete every task with `completed == true`. Replies
    /// `Accepted(Cleared(count))`; zero matches is a success, not an error.
    DeleteCompleted {
        /// Correlation token.
        request: RequestId,
        /// Owning user.
        user: UserId,
    },
}

impl ClientRequest {
    /// The correlation token carried by this request.
    #[must_use]
    pub const fn request_id(&self) -> RequestId {
        match self {
            Self::Subscribe { request, .. }
            | Self::Unsubscribe { request, .. }
            | Self::Create { request, .. }
            | Self::Update { request, .. }
            | Self::Delete { request, .. }
            | Self::DeleteCompleted { request, .. } => *request,
        }
    }

    /// The user collection this request is scoped to.
    #[must_use]
    pub const fn user(&self) -> UserId {
        match self {
            Self::Subscribe { user, .. }
            | Self::Unsubscribe { user, .. }
            | Self::Create { user, .. }
            | Self::Update { user, .. }
            | Self::Delete { user, .. }
            | Self::DeleteCompleted { user, .. } => *user,
        }
    }
}

/// Success payload of an [`ServerEvent::Accepted`] reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Accept {
    /// Subscription established; a snapshot follows immediately.
    Subscribed,
    /// Subscription removed.
    Unsubscribed,
    /// Document created with the given store-assigned id.
    Created(TaskId),
    /// Patch merged.
    Updated,
    /// Document removed.
    Deleted,
    /// Completed tasks removed; carries how many.
    Cleared(u32),
}

/// Why the sync server refused a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum RejectReason {
    /// The id does not name a document in the user's collection.
    #[error("task {0} not found")]
    NotFound(TaskId),

    /// The supplied fields failed validation.
    #[error("invalid task data: {0}")]
    Invalid(String),

    /// The user's collection is at its size cap.
    #[error("task limit reached ({0})")]
    TooManyTasks(u32),
}

/// Frames the sync server sends to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerEvent {
    /// A request succeeded.
    Accepted {
        /// Token of the request being answered.
        request: RequestId,
        /// What succeeded.
        body: Accept,
    },

    /// A request failed. The operation was abandoned server-side; nothing
    /// was partially applied.
    Rejected {
        /// Token of the request being answered.
        request: RequestId,
        /// Why the request was refused.
        reason: RejectReason,
    },

    /// Full current state of a user's collection, ordered oldest-first.
    ///
    /// Pushed to every subscriber after each mutation and once immediately
    /// after subscribing. Receivers replace their local list wholesale.
    Snapshot {
        /// Whose collection this is.
        user: UserId,
        /// Every task, sorted by `order` ascending.
        tasks: Vec<Task>,
    },
}

/// Encodes a [`ClientRequest`] for the wire.
///
/// # Errors
///
/// Returns a [`CodecError`] if serialization fails.
pub fn encode_request(request: &ClientRequest) -> Result<Vec<u8>, CodecError> {
    codec::encode(request)
}

/// Decodes a [`ClientRequest`] from the wire.
///
/// # Errors
///
/// Returns a [`CodecError`] if the frame is oversized or malformed.
pub fn decode_request(bytes: &[u8]) -> Result<ClientRequest, CodecError> {
    codec::decode(bytes)
}

/// Encodes a [`ServerEvent`] for the wire.
///
/// # Errors
///
/// Returns a [`CodecError`] if serialization fails.
pub fn encode_event(event: &ServerEvent) -> Result<Vec<u8>, CodecError> {
    codec::encode(event)
}

/// Decodes a [`ServerEvent`] from the wire.
///
/// # Errors
///
/// Returns a [`CodecError`] if the frame is oversized or malformed.
pub fn decode_event(bytes: &[u8]) -> Result<ServerEvent, CodecError> {
    codec::decode(bytes)
}
