//! Error types for the sync engine.
//!
//! Each layer gets its own enum: connection lifecycle, registry bookkeeping,
//! and the engine that ties them together. Decode failures stay as
//! [`ProtocolError`] and never surface here as hard errors; the engine counts
//! and drops them.

use parley_proto::{IdentityId, ProtocolError, RoomId};
use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors from the per-identity connection state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Operation not valid in the current state
    #[error("invalid state transition: cannot {operation} from {state:?}")]
    InvalidState {
        /// Current state when error occurred
        state: ConnectionState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Send attempted while not Connected
    #[error("not connected (state {state:?})")]
    NotConnected {
        /// Current state when the send was attempted
        state: ConnectionState,
    },

    /// Connection already ran its course; a new instance is required
    #[error("connection instance already used; open a new one")]
    Spent,

    /// Endpoint URL is not a websocket URL
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Outbound frame could not be encoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Errors from the connection registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Identity already has a Connecting or Connected connection
    #[error("identity {0} already connected")]
    AlreadyConnected(IdentityId),

    /// No connection has ever been opened for this identity
    #[error("no connection for identity {0}")]
    NotFound(IdentityId),

    /// Underlying connection refused the operation
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Errors returned by [`crate::Engine::handle`].
///
/// These are caller mistakes (wrong state, unknown identity). Transport and
/// decode failures never appear here.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Registry rejected the operation
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Connection rejected the operation
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Room operation by an identity that is not a local member
    #[error("identity {identity} is not a member of room {room}")]
    NotMember {
        /// Acting identity
        identity: IdentityId,
        /// Target room
        room: RoomId,
    },
}

impl EngineError {
    /// Returns true if the caller tried to open a second connection for an
    /// identity.
    pub fn is_duplicate_connection(&self) -> bool {
        matches!(self, Self::Registry(RegistryError::AlreadyConnected(_)))
    }
}
