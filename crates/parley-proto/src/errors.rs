//! Protocol error types.

use thiserror::Error;

/// Result alias for codec operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while encoding or decoding frames.
///
/// Every variant is a decode-side or size-limit failure. None of them is fatal
/// to a connection: callers log the error and drop the frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Bytes could not be parsed as a `ChatMessage`
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A field the canonical schema requires was absent
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// `message_type` held a value other than Data (0) or Notify (1)
    #[error("unknown message type: {0}")]
    UnknownMessageType(i32),

    /// `notify_type` held a value other than Quit (0) or Join (1)
    #[error("unknown notify type: {0}")]
    UnknownNotifyType(i32),

    /// Encoded frame exceeds [`crate::MAX_FRAME_SIZE`]
    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    FrameTooLarge {
        /// Actual size in bytes
        size: usize,
        /// Configured maximum
        max: usize,
    },
}

impl From<prost::DecodeError> for ProtocolError {
    fn from(err: prost::DecodeError) -> Self {
        Self::MalformedFrame(err.to_string())
    }
}

impl From<prost::EncodeError> for ProtocolError {
    fn from(err: prost::EncodeError) -> Self {
        Self::MalformedFrame(err.to_string())
    }
}
