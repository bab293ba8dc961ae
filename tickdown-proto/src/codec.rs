//! Serialization for the Tickdown sync wire format.
//!
//! Wire values are postcard-encoded and carried in binary WebSocket frames,
//! so the transport already delimits messages; no extra length framing is
//! needed. Decoding rejects frames above [`MAX_FRAME_BYTES`] before parsing.

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Upper bound on a single wire frame, checked before decoding.
///
/// Generous: a full snapshot of a large collection is a few hundred bytes
/// per task.
pub const MAX_FRAME_BYTES: usize = 256 * 1024;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Incoming frame exceeds [`MAX_FRAME_BYTES`].
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Size of the offending frame.
        size: usize,
        /// Maximum accepted size.
        max: usize,
    },
}

/// Encodes a wire value into a byte vector using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the value cannot be serialized.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(value).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes a wire value from a byte slice using postcard.
///
/// # Errors
///
/// Returns `CodecError::FrameTooLarge` if the input exceeds
/// [`MAX_FRAME_BYTES`], or `CodecError::Serialization` if the bytes cannot
/// be deserialized.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(CodecError::FrameTooLarge {
            size: bytes.len(),
            max: MAX_FRAME_BYTES,
        });
    }
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}
