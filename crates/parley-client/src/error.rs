//! Client error types.

use parley_core::{ConnectionError, EngineError, IdentityId};
use thiserror::Error;

/// Room directory failures.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Request could not be sent or the response could not be read
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend answered with a non-success status
    #[error("backend returned {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Body's `error` field, or the raw body
        message: String,
    },

    /// Success body did not have the expected shape
    #[error("unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// Listed room carried a state code we do not know
    #[error("room {room} has unknown state {code}")]
    UnknownRoomState {
        /// Room id
        room: i32,
        /// State code as listed
        code: i32,
    },
}

/// Why an outgoing frame never reached its socket.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum TransmitError {
    /// Socket task has exited; its close report may still be queued
    #[error("socket closed")]
    Closed,

    /// Outbound queue is full
    #[error("outbound queue full")]
    Full,

    /// No socket for this transport attempt
    #[error("no socket for this connection")]
    NoSocket,
}

/// Errors surfaced through [`crate::RuntimeHandle`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// Engine refused the operation
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Room directory call failed
    #[error("directory: {0}")]
    Directory(#[from] DirectoryError),

    /// Websocket never opened
    #[error("identity {identity} failed to connect: {reason}")]
    ConnectFailed {
        /// Identity whose transport failed
        identity: IdentityId,
        /// Close reason reported by the transport
        reason: String,
    },

    /// Frame was accepted by the engine but could not be handed to the socket
    #[error("send from identity {identity} failed: {source}")]
    SendFailed {
        /// Sending identity
        identity: IdentityId,
        /// What went wrong
        source: TransmitError,
    },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(#[from] ConnectionError),

    /// Runtime task has stopped
    #[error("runtime has shut down")]
    Shutdown,
}

impl ClientError {
    /// Whether this is a rejected duplicate connect.
    pub fn is_duplicate_connection(&self) -> bool {
        matches!(self, Self::Engine(e) if e.is_duplicate_connection())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ClientError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::Shutdown
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for ClientError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::Shutdown
    }
}
