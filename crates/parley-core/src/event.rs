//! Engine events and actions.

use bytes::Bytes;
use parley_proto::{IdentityId, RoomId};

use crate::{
    connection::{CloseReason, ConnectionId, ConnectionState, Incoming},
    rooms::{RoomInfo, Unit},
};

/// Events the caller feeds into the engine.
///
/// The caller is responsible for:
/// - Forwarding transport callbacks (open, payload, close)
/// - Forwarding application intents (connect, send, join)
/// - Reporting the outcome of directory calls
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Open a connection for an identity.
    Connect {
        /// Identity to connect
        identity: IdentityId,
    },

    /// Close an identity's connection. Safe in any state.
    Disconnect {
        /// Identity to disconnect
        identity: IdentityId,
    },

    /// Transport finished its handshake.
    TransportOpened {
        /// Owning identity
        identity: IdentityId,
        /// Transport attempt
        connection: ConnectionId,
    },

    /// Transport went away.
    TransportClosed {
        /// Owning identity
        identity: IdentityId,
        /// Transport attempt
        connection: ConnectionId,
        /// Why it closed
        reason: CloseReason,
    },

    /// Transport delivered a payload.
    PayloadReceived {
        /// Receiving identity
        identity: IdentityId,
        /// Transport attempt
        connection: ConnectionId,
        /// Raw payload
        payload: Incoming,
    },

    /// Send a direct message.
    SendDirect {
        /// Sending identity
        from: IdentityId,
        /// Recipient identity
        to: IdentityId,
        /// Message text
        text: String,
    },

    /// Send a room message.
    SendRoom {
        /// Sending identity
        identity: IdentityId,
        /// Target room
        room: RoomId,
        /// Message text
        text: String,
    },

    /// Backend accepted a join.
    RoomJoined {
        /// Joined room
        room: RoomId,
        /// Joining identity
        identity: IdentityId,
    },

    /// Backend accepted a quit.
    RoomLeft {
        /// Left room
        room: RoomId,
        /// Leaving identity
        identity: IdentityId,
    },

    /// Backend's current member list for a room.
    MembersRefreshed {
        /// Room queried
        room: RoomId,
        /// Members as reported
        units: Vec<Unit>,
    },

    /// Backend's current room list.
    RoomsListed {
        /// Every listed room with its description
        rooms: Vec<(RoomId, RoomInfo)>,
    },
}

/// Log levels for engine log actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Warning
    Warn,
}

/// Actions the engine produces for the caller to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineAction {
    /// Open a websocket.
    OpenTransport {
        /// Owning identity
        identity: IdentityId,
        /// Transport attempt; echo it back on every callback
        connection: ConnectionId,
        /// URL to open
        url: String,
    },

    /// Write one binary message.
    Transmit {
        /// Owning identity
        identity: IdentityId,
        /// Transport attempt
        connection: ConnectionId,
        /// Encoded frame
        bytes: Bytes,
    },

    /// Tear down a websocket.
    CloseTransport {
        /// Owning identity
        identity: IdentityId,
        /// Transport attempt
        connection: ConnectionId,
    },

    /// Re-read a room's member list from the backend and report it back as
    /// [`EngineEvent::MembersRefreshed`].
    RefreshMembers {
        /// Room to refresh
        room: RoomId,
    },

    /// An identity's connection state changed.
    StatusChanged {
        /// Identity
        identity: IdentityId,
        /// New state
        state: ConnectionState,
    },

    /// A room's membership or history changed.
    RoomUpdated {
        /// Room
        room: RoomId,
    },

    /// An identity's inbox changed.
    InboxUpdated {
        /// Identity
        identity: IdentityId,
    },

    /// Log a message.
    Log {
        /// Log level
        level: LogLevel,
        /// Message to log
        message: String,
    },
}
