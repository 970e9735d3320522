//! Per-identity connection state machine.
//!
//! Tracks the lifecycle of one websocket for one identity. Uses the action
//! pattern: methods return [`ConnectionAction`]s for the driver to execute and
//! never touch a socket themselves.
//!
//! # State Machine
//!
//! ```text
//! ┌──────────────┐ connect ┌────────────┐ on_open ┌───────────┐
//! │ Disconnected │────────>│ Connecting │────────>│ Connected │
//! └──────────────┘         └────────────┘         └───────────┘
//!        ^                       │                      │
//!        │   on_close / disconnect / auth rejection     │
//!        └───────────────────────┴──────────────────────┘
//! ```
//!
//! Transitions back to Disconnected are final for the instance: `connect` on
//! a spent connection fails with [`ConnectionError::Spent`].

use std::{fmt, str::FromStr};

use bytes::Bytes;
use parley_proto::{Frame, IdentityId, ProtocolError};

use crate::error::ConnectionError;

/// Websocket endpoint the backend listens on by default.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:8081/ws";

/// Text payloads the backend uses to refuse a connection.
pub const AUTH_REJECTION_MARKERS: [&str; 3] =
    ["Permission Denied", "User not found", "invalid userId"];

/// Identifies one transport attempt.
///
/// Assigned by the registry. Transport events carry it so that callbacks from
/// a replaced socket are never applied to its successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No live transport
    Disconnected,
    /// Transport requested, not yet open
    Connecting,
    /// Transport open
    Connected,
}

/// Actions returned by the connection state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open a websocket to this URL
    Open {
        /// Per-identity URL
        url: String,
    },
    /// Write these bytes as one binary message
    Transmit(Bytes),
    /// Tear down the transport
    Close,
}

/// Raw payload delivered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    /// Binary websocket message
    Binary(Bytes),
    /// Text websocket message (out-of-band signalling only)
    Text(String),
}

/// Why a transport went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed at our request
    Local,
    /// Peer sent a close frame
    Peer(String),
    /// Socket error or failed handshake
    Transport(String),
    /// Backend refused the identity
    AuthRejected(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("closed locally"),
            Self::Peer(reason) => write!(f, "closed by peer: {reason}"),
            Self::Transport(reason) => write!(f, "transport error: {reason}"),
            Self::AuthRejected(reason) => write!(f, "rejected by backend: {reason}"),
        }
    }
}

/// Result of feeding one payload into a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Decoded frame ready for routing
    Frame(Frame),
    /// Backend refused the identity. The connection is now Disconnected
    Rejected {
        /// Marker text as received
        reason: String,
    },
    /// Payload could not be decoded; drop it and keep the connection
    Dropped(ProtocolError),
    /// Payload arrived after the connection was closed
    Stale,
}

/// Validated websocket base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    base: String,
}

impl Endpoint {
    /// Parse and validate a `ws://` or `wss://` base URL.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidEndpoint` for any other scheme or an empty
    ///   host
    pub fn parse(base: impl Into<String>) -> Result<Self, ConnectionError> {
        let base = base.into();
        let rest = base
            .strip_prefix("ws://")
            .or_else(|| base.strip_prefix("wss://"))
            .ok_or_else(|| ConnectionError::InvalidEndpoint(format!("{base}: not a ws(s) URL")))?;

        if rest.is_empty() || rest.starts_with(['/', '?']) {
            return Err(ConnectionError::InvalidEndpoint(format!("{base}: missing host")));
        }

        Ok(Self { base })
    }

    /// Base URL as given.
    pub fn as_str(&self) -> &str {
        &self.base
    }

    /// URL a given identity connects to.
    pub fn url_for(&self, identity: IdentityId) -> String {
        let separator = if self.base.contains('?') { '&' } else { '?' };
        format!("{}{separator}user_id={identity}", self.base)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self { base: DEFAULT_ENDPOINT.to_string() }
    }
}

impl FromStr for Endpoint {
    type Err = ConnectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base)
    }
}

/// Connection state machine for one identity.
///
/// Single-use: once back in Disconnected it stays there.
#[derive(Debug, Clone)]
pub struct Connection {
    identity: IdentityId,
    id: ConnectionId,
    state: ConnectionState,
    spent: bool,
}

impl Connection {
    /// Create a connection in [`ConnectionState::Disconnected`].
    pub fn new(identity: IdentityId, id: ConnectionId) -> Self {
        Self { identity, id, state: ConnectionState::Disconnected, spent: false }
    }

    /// Identity this connection belongs to.
    pub fn identity(&self) -> IdentityId {
        self.identity
    }

    /// Transport attempt id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// True once the connection has returned to Disconnected.
    pub fn is_spent(&self) -> bool {
        self.spent
    }

    /// Start connecting.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::Spent` if this instance was already used
    /// - `ConnectionError::InvalidState` if Connecting or Connected
    pub fn connect(
        &mut self,
        endpoint: &Endpoint,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.spent {
            return Err(ConnectionError::Spent);
        }

        if self.state != ConnectionState::Disconnected {
            return Err(ConnectionError::InvalidState { state: self.state, operation: "connect" });
        }

        self.state = ConnectionState::Connecting;
        Ok(vec![ConnectionAction::Open { url: endpoint.url_for(self.identity) }])
    }

    /// Transport reported open.
    ///
    /// A transport that opens after a local disconnect is torn down again.
    pub fn on_open(&mut self) -> Vec<ConnectionAction> {
        match self.state {
            ConnectionState::Connecting => {
                self.state = ConnectionState::Connected;
                vec![]
            },
            ConnectionState::Disconnected => vec![ConnectionAction::Close],
            ConnectionState::Connected => vec![],
        }
    }

    /// Feed one raw payload from the transport.
    pub fn on_payload(&mut self, payload: Incoming) -> Inbound {
        if self.state == ConnectionState::Disconnected {
            return Inbound::Stale;
        }

        match payload {
            Incoming::Binary(bytes) => match Frame::decode(&bytes) {
                Ok(frame) => Inbound::Frame(frame),
                Err(err) => Inbound::Dropped(err),
            },
            Incoming::Text(text) => {
                if AUTH_REJECTION_MARKERS.iter().any(|marker| text.contains(marker)) {
                    self.finish();
                    Inbound::Rejected { reason: text }
                } else {
                    Inbound::Dropped(ProtocolError::MalformedFrame(format!(
                        "unexpected text payload ({} bytes)",
                        text.len()
                    )))
                }
            },
        }
    }

    /// Transport went away. Returns true if this changed the state.
    pub fn on_close(&mut self) -> bool {
        if self.state == ConnectionState::Disconnected {
            return false;
        }

        self.finish();
        true
    }

    /// Close locally. Safe in any state; a no-op once Disconnected.
    pub fn disconnect(&mut self) -> Vec<ConnectionAction> {
        if self.state == ConnectionState::Disconnected {
            return vec![];
        }

        self.finish();
        vec![ConnectionAction::Close]
    }

    /// Encode `frame` for transmission.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::NotConnected` unless Connected
    /// - `ConnectionError::Protocol` if the frame is too large to encode
    pub fn send(&self, frame: &Frame) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.state != ConnectionState::Connected {
            return Err(ConnectionError::NotConnected { state: self.state });
        }

        Ok(vec![ConnectionAction::Transmit(frame.to_bytes()?)])
    }

    fn finish(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.spent = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected(identity: IdentityId) -> Connection {
        let mut conn = Connection::new(identity, ConnectionId(1));
        conn.connect(&Endpoint::default()).unwrap();
        conn.on_open();
        conn
    }

    #[test]
    fn endpoint_builds_per_identity_url() {
        let endpoint = Endpoint::parse("ws://localhost:8081/ws").unwrap();
        assert_eq!(endpoint.url_for(4), "ws://localhost:8081/ws?user_id=4");

        let endpoint = Endpoint::parse("wss://chat.example/ws?v=2").unwrap();
        assert_eq!(endpoint.url_for(4), "wss://chat.example/ws?v=2&user_id=4");
    }

    #[test]
    fn endpoint_rejects_non_websocket_urls() {
        assert!(Endpoint::parse("http://localhost:8081/ws").is_err());
        assert!(Endpoint::parse("ws://").is_err());
        assert!(Endpoint::parse("ws:///ws").is_err());
    }

    #[test]
    fn connect_emits_open_action() {
        let mut conn = Connection::new(3, ConnectionId(1));
        let actions = conn.connect(&Endpoint::default()).unwrap();

        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(actions, vec![ConnectionAction::Open {
            url: "ws://localhost:8081/ws?user_id=3".to_string()
        }]);
    }

    #[test]
    fn connect_twice_fails() {
        let mut conn = Connection::new(3, ConnectionId(1));
        conn.connect(&Endpoint::default()).unwrap();

        let err = conn.connect(&Endpoint::default()).unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidState {
            state: ConnectionState::Connecting,
            ..
        }));

        conn.on_open();
        assert!(conn.connect(&Endpoint::default()).is_err());
    }

    #[test]
    fn spent_connection_cannot_reconnect() {
        let mut conn = connected(3);
        assert!(conn.on_close());

        assert_eq!(conn.connect(&Endpoint::default()), Err(ConnectionError::Spent));
    }

    #[test]
    fn send_requires_connected() {
        let mut conn = Connection::new(3, ConnectionId(1));
        let frame = Frame::direct(4, "hi");

        assert!(matches!(conn.send(&frame), Err(ConnectionError::NotConnected { .. })));

        conn.connect(&Endpoint::default()).unwrap();
        assert!(matches!(conn.send(&frame), Err(ConnectionError::NotConnected { .. })));

        conn.on_open();
        let actions = conn.send(&frame).unwrap();
        assert!(matches!(actions.as_slice(), [ConnectionAction::Transmit(_)]));
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut conn = connected(3);

        assert_eq!(conn.disconnect(), vec![ConnectionAction::Close]);
        assert_eq!(conn.disconnect(), vec![]);
        assert!(!conn.on_close());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn late_open_after_disconnect_closes_transport() {
        let mut conn = Connection::new(3, ConnectionId(1));
        conn.connect(&Endpoint::default()).unwrap();
        conn.disconnect();

        assert_eq!(conn.on_open(), vec![ConnectionAction::Close]);
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn auth_marker_rejects_connection() {
        let mut conn = connected(3);
        let inbound = conn.on_payload(Incoming::Text("Permission Denied".to_string()));

        assert_eq!(inbound, Inbound::Rejected { reason: "Permission Denied".to_string() });
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(conn.is_spent());
    }

    #[test]
    fn invalid_user_id_marker_rejects_connection() {
        let mut conn = connected(3);
        let inbound = conn.on_payload(Incoming::Text("error: invalid userId".to_string()));

        assert_eq!(inbound, Inbound::Rejected { reason: "error: invalid userId".to_string() });
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn other_text_is_dropped() {
        let mut conn = connected(3);
        let inbound = conn.on_payload(Incoming::Text("hello".to_string()));

        assert!(matches!(inbound, Inbound::Dropped(ProtocolError::MalformedFrame(_))));
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn garbage_binary_is_dropped_without_closing() {
        let mut conn = connected(3);
        let inbound = conn.on_payload(Incoming::Binary(Bytes::from_static(&[0x0a, 0xff])));

        assert!(matches!(inbound, Inbound::Dropped(_)));
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn binary_frame_decodes() {
        let mut conn = connected(3);
        let frame = Frame::direct(3, "hi");
        let inbound = conn.on_payload(Incoming::Binary(frame.to_bytes().unwrap()));

        assert_eq!(inbound, Inbound::Frame(frame));
    }

    #[test]
    fn payload_after_close_is_stale() {
        let mut conn = connected(3);
        conn.disconnect();

        let inbound = conn.on_payload(Incoming::Text("User not found".to_string()));
        assert_eq!(inbound, Inbound::Stale);
    }
}
