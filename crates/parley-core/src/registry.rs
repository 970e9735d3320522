//! Connection registry.
//!
//! Owns every identity's [`Connection`] and enforces at most one live
//! (Connecting or Connected) connection per identity. A spent connection stays
//! in the map until the identity opens again, so late transport callbacks can
//! still be matched against it and ignored.
//!
//! Closing a connection, whether locally, by the peer, or through an auth
//! rejection, goes through [`ConnectionRegistry::release`]: the identity is
//! dropped from every room it had joined. Room belief must not outlive the
//! transport that proves liveness.

use std::{collections::HashMap, ops::Sub, time::Duration};

use parley_proto::{IdentityId, RoomId};

use crate::{
    connection::{
        Connection, ConnectionAction, ConnectionId, ConnectionState, Endpoint, Inbound, Incoming,
    },
    error::RegistryError,
    rooms::RoomStore,
};

/// Result of opening a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opened {
    /// Id of the new transport attempt
    pub connection: ConnectionId,
    /// Actions to execute (always an `Open`)
    pub actions: Vec<ConnectionAction>,
}

/// Result of closing a connection locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Closed {
    /// Id of the closed transport attempt
    pub connection: ConnectionId,
    /// Actions to execute (`Close` if a transport may still be live)
    pub actions: Vec<ConnectionAction>,
    /// Rooms the identity implicitly left
    pub left_rooms: Vec<RoomId>,
}

/// How the registry sees an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Local identity with a Connected connection
    Live,
    /// Local identity whose connection is not open
    Offline,
    /// Never connected through this registry
    Remote,
}

/// Registry of per-identity connections.
#[derive(Debug)]
pub struct ConnectionRegistry {
    endpoint: Endpoint,
    connections: HashMap<IdentityId, Connection>,
    next_id: u64,
}

impl ConnectionRegistry {
    /// Create an empty registry connecting to `endpoint`.
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint, connections: HashMap::new(), next_id: 1 }
    }

    /// Open a new connection for `identity`.
    ///
    /// # Errors
    ///
    /// - `RegistryError::AlreadyConnected` if the identity's current
    ///   connection is Connecting or Connected. No state changes.
    pub fn open(&mut self, identity: IdentityId) -> Result<Opened, RegistryError> {
        if self.state(identity) != ConnectionState::Disconnected {
            return Err(RegistryError::AlreadyConnected(identity));
        }

        let id = ConnectionId(self.next_id);
        let mut conn = Connection::new(identity, id);
        let actions = conn.connect(&self.endpoint)?;

        self.next_id += 1;
        self.connections.insert(identity, conn);

        Ok(Opened { connection: id, actions })
    }

    /// Close `identity`'s connection and drop it from every room.
    ///
    /// Idempotent: closing an already closed connection returns no actions
    /// and no rooms.
    ///
    /// # Errors
    ///
    /// - `RegistryError::NotFound` if the identity never opened a connection
    pub fn close<I>(
        &mut self,
        identity: IdentityId,
        rooms: &mut RoomStore<I>,
    ) -> Result<Closed, RegistryError>
    where
        I: Copy + Ord + Sub<Output = Duration>,
    {
        let conn = self.connections.get_mut(&identity).ok_or(RegistryError::NotFound(identity))?;
        let connection = conn.id();
        let actions = conn.disconnect();
        let left_rooms = Self::release(identity, rooms);

        Ok(Closed { connection, actions, left_rooms })
    }

    /// Transport for (`identity`, `connection`) opened.
    ///
    /// Returns `Close` for a transport that no longer has a live connection
    /// behind it.
    pub fn on_open(
        &mut self,
        identity: IdentityId,
        connection: ConnectionId,
    ) -> Vec<ConnectionAction> {
        match self.current_mut(identity, connection) {
            Some(conn) => conn.on_open(),
            None => vec![ConnectionAction::Close],
        }
    }

    /// Transport for (`identity`, `connection`) went away.
    ///
    /// Returns the rooms the identity implicitly left, or `None` if the
    /// connection was already closed or has been replaced.
    pub fn on_closed<I>(
        &mut self,
        identity: IdentityId,
        connection: ConnectionId,
        rooms: &mut RoomStore<I>,
    ) -> Option<Vec<RoomId>>
    where
        I: Copy + Ord + Sub<Output = Duration>,
    {
        let conn = self.current_mut(identity, connection)?;
        if !conn.on_close() {
            return None;
        }

        Some(Self::release(identity, rooms))
    }

    /// Feed a payload received on (`identity`, `connection`).
    ///
    /// On [`Inbound::Rejected`] the connection is already Disconnected; the
    /// caller must run [`ConnectionRegistry::release`] and tear down the
    /// transport.
    pub fn on_payload(
        &mut self,
        identity: IdentityId,
        connection: ConnectionId,
        payload: Incoming,
    ) -> Inbound {
        match self.current_mut(identity, connection) {
            Some(conn) => conn.on_payload(payload),
            None => Inbound::Stale,
        }
    }

    /// Drop `identity` from every room. Returns the rooms it left.
    pub fn release<I>(identity: IdentityId, rooms: &mut RoomStore<I>) -> Vec<RoomId>
    where
        I: Copy + Ord + Sub<Output = Duration>,
    {
        rooms.leave_all(identity)
    }

    /// Current connection for `identity`, live or spent.
    pub fn find(&self, identity: IdentityId) -> Option<&Connection> {
        self.connections.get(&identity)
    }

    /// True if `identity` has a Connected connection.
    pub fn is_open(&self, identity: IdentityId) -> bool {
        self.state(identity) == ConnectionState::Connected
    }

    /// State of `identity`'s connection. Disconnected if it has none.
    pub fn state(&self, identity: IdentityId) -> ConnectionState {
        self.connections.get(&identity).map_or(ConnectionState::Disconnected, Connection::state)
    }

    /// Identities with a Connected connection, ascending.
    pub fn connected(&self) -> Vec<IdentityId> {
        let mut ids: Vec<IdentityId> = self
            .connections
            .values()
            .filter(|c| c.state() == ConnectionState::Connected)
            .map(Connection::identity)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// True if `identity` has ever opened a connection through this registry.
    pub fn is_known(&self, identity: IdentityId) -> bool {
        self.connections.contains_key(&identity)
    }

    /// Whether `identity` is local and, if so, whether it is open.
    pub fn presence(&self, identity: IdentityId) -> Presence {
        if self.is_open(identity) {
            Presence::Live
        } else if self.is_known(identity) {
            Presence::Offline
        } else {
            Presence::Remote
        }
    }

    fn current_mut(
        &mut self,
        identity: IdentityId,
        connection: ConnectionId,
    ) -> Option<&mut Connection> {
        self.connections.get_mut(&identity).filter(|c| c.id() == connection)
    }
}
