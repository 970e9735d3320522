//! Sync engine.
//!
//! The `Engine` is the single owner of all client-side state: the connection
//! registry, the room store, every identity's inbox, and the router. It
//! receives [`EngineEvent`]s, mutates state, and returns [`EngineAction`]s for
//! the caller to execute. It never performs I/O and never blocks, so one
//! driver task can serialize every socket callback, user intent and directory
//! result through it in order.

use std::{collections::HashMap, time::Duration};

use parley_proto::{Frame, IdentityId, RoomId};

use crate::{
    connection::{
        CloseReason, ConnectionAction, ConnectionId, ConnectionState, Endpoint, Inbound, Incoming,
    },
    env::Environment,
    error::{ConnectionError, EngineError, RegistryError},
    event::{EngineAction, EngineEvent, LogLevel},
    inbox::{Direction, Inbox, InboxEntry},
    reconciler::{DEFAULT_LOOKBACK, Reconciler},
    registry::{ConnectionRegistry, Presence},
    rooms::{EntryOrigin, RoomInfo, RoomStore, Sender, Unit},
    router::{RouteStats, Routed, Router},
};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Websocket endpoint identities connect to
    pub endpoint: Endpoint,
    /// Reconciler lookback window
    pub lookback: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { endpoint: Endpoint::default(), lookback: DEFAULT_LOOKBACK }
    }
}

/// Action-based sync engine.
pub struct Engine<E: Environment> {
    env: E,
    registry: ConnectionRegistry,
    rooms: RoomStore<E::Instant>,
    inboxes: HashMap<IdentityId, Inbox<E::Instant>>,
    router: Router,
}

impl<E: Environment> Engine<E> {
    /// Create an engine with no connections.
    pub fn new(env: E, config: EngineConfig) -> Self {
        Self {
            env,
            registry: ConnectionRegistry::new(config.endpoint),
            rooms: RoomStore::new(),
            inboxes: HashMap::new(),
            router: Router::new(Reconciler::new(config.lookback)),
        }
    }

    /// Connection registry (read-only).
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Room store (read-only).
    pub fn rooms(&self) -> &RoomStore<E::Instant> {
        &self.rooms
    }

    /// An identity's inbox, if it ever sent or received a direct message.
    pub fn inbox(&self, identity: IdentityId) -> Option<&Inbox<E::Instant>> {
        self.inboxes.get(&identity)
    }

    /// Routing counters.
    pub fn stats(&self) -> RouteStats {
        self.router.stats()
    }

    /// Connection state of an identity.
    pub fn state(&self, identity: IdentityId) -> ConnectionState {
        self.registry.state(identity)
    }

    /// Process an event and return the actions to execute.
    ///
    /// # Errors
    ///
    /// Only for caller mistakes: duplicate connect, sending while not
    /// connected, room operations by non-members, unknown identities.
    /// Transport and decode failures are absorbed into actions.
    pub fn handle(&mut self, event: EngineEvent) -> Result<Vec<EngineAction>, EngineError> {
        match event {
            EngineEvent::Connect { identity } => self.handle_connect(identity),
            EngineEvent::Disconnect { identity } => Ok(self.handle_disconnect(identity)),
            EngineEvent::TransportOpened { identity, connection } => {
                Ok(self.handle_transport_opened(identity, connection))
            },
            EngineEvent::TransportClosed { identity, connection, reason } => {
                Ok(self.handle_transport_closed(identity, connection, &reason))
            },
            EngineEvent::PayloadReceived { identity, connection, payload } => {
                Ok(self.handle_payload(identity, connection, payload))
            },
            EngineEvent::SendDirect { from, to, text } => self.handle_send_direct(from, to, text),
            EngineEvent::SendRoom { identity, room, text } => {
                self.handle_send_room(identity, room, text)
            },
            EngineEvent::RoomJoined { room, identity } => self.handle_room_joined(room, identity),
            EngineEvent::RoomLeft { room, identity } => Ok(self.handle_room_left(room, identity)),
            EngineEvent::MembersRefreshed { room, units } => {
                Ok(self.handle_members_refreshed(room, units))
            },
            EngineEvent::RoomsListed { rooms } => Ok(self.handle_rooms_listed(rooms)),
        }
    }

    fn handle_connect(&mut self, identity: IdentityId) -> Result<Vec<EngineAction>, EngineError> {
        let opened = self.registry.open(identity)?;
        let mut actions =
            Self::convert_connection_actions(identity, opened.connection, opened.actions);

        actions.push(EngineAction::StatusChanged { identity, state: ConnectionState::Connecting });
        actions.push(EngineAction::Log {
            level: LogLevel::Debug,
            message: format!("identity {identity} connecting ({})", opened.connection),
        });

        Ok(actions)
    }

    fn handle_disconnect(&mut self, identity: IdentityId) -> Vec<EngineAction> {
        let closed = match self.registry.close(identity, &mut self.rooms) {
            Ok(closed) => closed,
            Err(RegistryError::NotFound(_)) => {
                return vec![EngineAction::Log {
                    level: LogLevel::Debug,
                    message: format!("disconnect for unknown identity {identity}"),
                }];
            },
            Err(e) => {
                return vec![EngineAction::Log { level: LogLevel::Warn, message: e.to_string() }];
            },
        };

        // No actions means the transport was already gone
        let was_live = !closed.actions.is_empty();
        if !was_live && closed.left_rooms.is_empty() {
            return vec![];
        }

        let mut actions =
            Self::convert_connection_actions(identity, closed.connection, closed.actions);
        if was_live {
            let state = ConnectionState::Disconnected;
            actions.push(EngineAction::StatusChanged { identity, state });
        }
        actions.extend(Self::rooms_left(&closed.left_rooms));
        actions.push(EngineAction::Log {
            level: LogLevel::Info,
            message: format!(
                "identity {identity} disconnected, left {} room(s)",
                closed.left_rooms.len()
            ),
        });

        actions
    }

    fn handle_transport_opened(
        &mut self,
        identity: IdentityId,
        connection: ConnectionId,
    ) -> Vec<EngineAction> {
        let before = self.registry.state(identity);
        let conn_actions = self.registry.on_open(identity, connection);

        if !conn_actions.is_empty() {
            let mut actions = Self::convert_connection_actions(identity, connection, conn_actions);
            actions.push(EngineAction::Log {
                level: LogLevel::Debug,
                message: format!("closing late transport {connection} for identity {identity}"),
            });
            return actions;
        }

        if before == ConnectionState::Connecting && self.registry.is_open(identity) {
            return vec![
                EngineAction::StatusChanged { identity, state: ConnectionState::Connected },
                EngineAction::Log {
                    level: LogLevel::Info,
                    message: format!("identity {identity} connected ({connection})"),
                },
            ];
        }

        vec![]
    }

    fn handle_transport_closed(
        &mut self,
        identity: IdentityId,
        connection: ConnectionId,
        reason: &CloseReason,
    ) -> Vec<EngineAction> {
        let Some(left_rooms) = self.registry.on_closed(identity, connection, &mut self.rooms) else {
            return vec![];
        };

        let level = match reason {
            CloseReason::Local => LogLevel::Debug,
            CloseReason::Peer(_) => LogLevel::Info,
            CloseReason::Transport(_) | CloseReason::AuthRejected(_) => LogLevel::Warn,
        };

        let mut actions =
            vec![EngineAction::StatusChanged { identity, state: ConnectionState::Disconnected }];
        actions.extend(Self::rooms_left(&left_rooms));
        actions.push(EngineAction::Log {
            level,
            message: format!("identity {identity} {reason}"),
        });

        actions
    }

    fn handle_payload(
        &mut self,
        identity: IdentityId,
        connection: ConnectionId,
        payload: Incoming,
    ) -> Vec<EngineAction> {
        match self.registry.on_payload(identity, connection, payload) {
            Inbound::Frame(frame) => self.route(identity, frame),
            Inbound::Dropped(err) => {
                self.router.record_decode_failure();
                vec![EngineAction::Log {
                    level: LogLevel::Warn,
                    message: format!("dropping payload for identity {identity}: {err}"),
                }]
            },
            Inbound::Rejected { reason } => {
                self.router.record_auth_rejection();
                let left_rooms = ConnectionRegistry::release(identity, &mut self.rooms);

                let mut actions = vec![
                    EngineAction::CloseTransport { identity, connection },
                    EngineAction::StatusChanged { identity, state: ConnectionState::Disconnected },
                ];
                actions.extend(Self::rooms_left(&left_rooms));
                actions.push(EngineAction::Log {
                    level: LogLevel::Warn,
                    message: format!("identity {identity} rejected by backend: {reason}"),
                });
                actions
            },
            Inbound::Stale => vec![EngineAction::Log {
                level: LogLevel::Debug,
                message: format!(
                    "ignoring payload on stale transport {connection} for identity {identity}"
                ),
            }],
        }
    }

    fn route(&mut self, identity: IdentityId, frame: Frame) -> Vec<EngineAction> {
        let now = self.env.now();
        let registry = &self.registry;
        let routed =
            self.router.route(identity, frame, now, &mut self.rooms, &mut self.inboxes, |id| {
                registry.presence(id)
            });

        match routed {
            Routed::Delivered { identity, entries } if entries > 0 => {
                vec![EngineAction::InboxUpdated { identity }]
            },
            Routed::Delivered { .. } => vec![],
            Routed::Misaddressed { target } => vec![EngineAction::Log {
                level: LogLevel::Warn,
                message: format!(
                    "protocol anomaly: direct message for identity {target} \
                     arrived on identity {identity}'s connection"
                ),
            }],
            Routed::Notified { room } => {
                vec![EngineAction::RoomUpdated { room }, EngineAction::RefreshMembers { room }]
            },
            Routed::NotifyIgnored { room } => vec![EngineAction::Log {
                level: LogLevel::Debug,
                message: format!("identity {identity} ignored notify for room {room}"),
            }],
            Routed::RoomData { room, appended, confirmed } if appended + confirmed > 0 => {
                vec![EngineAction::RoomUpdated { room }]
            },
            Routed::RoomData { .. } => vec![],
        }
    }

    fn handle_send_direct(
        &mut self,
        from: IdentityId,
        to: IdentityId,
        text: String,
    ) -> Result<Vec<EngineAction>, EngineError> {
        let conn = self.registry.find(from).ok_or(RegistryError::NotFound(from))?;
        let frame = Frame::direct(to, text.clone()).with_sender(from);
        let conn_actions = conn.send(&frame)?;
        let connection = conn.id();

        self.inboxes.entry(from).or_default().push(InboxEntry {
            direction: Direction::Sent,
            peer: Some(to),
            text,
            timestamp: self.env.now(),
        });

        let mut actions = Self::convert_connection_actions(from, connection, conn_actions);
        actions.push(EngineAction::InboxUpdated { identity: from });
        Ok(actions)
    }

    fn handle_send_room(
        &mut self,
        identity: IdentityId,
        room: RoomId,
        text: String,
    ) -> Result<Vec<EngineAction>, EngineError> {
        let conn = self.registry.find(identity).ok_or(RegistryError::NotFound(identity))?;
        if conn.state() != ConnectionState::Connected {
            return Err(ConnectionError::NotConnected { state: conn.state() }.into());
        }
        if !self.rooms.is_member(room, identity) {
            return Err(EngineError::NotMember { identity, room });
        }

        let frame = Frame::room_text(room, text.clone()).with_sender(identity);
        let conn_actions = conn.send(&frame)?;
        let connection = conn.id();

        let now = self.env.now();
        let entry =
            self.rooms.entry(Sender::Identity(identity), text, now, EntryOrigin::Optimistic);
        self.rooms.append_message(room, entry);

        let mut actions = Self::convert_connection_actions(identity, connection, conn_actions);
        actions.push(EngineAction::RoomUpdated { room });
        Ok(actions)
    }

    fn handle_room_joined(
        &mut self,
        room: RoomId,
        identity: IdentityId,
    ) -> Result<Vec<EngineAction>, EngineError> {
        let state = self.registry.state(identity);
        if state != ConnectionState::Connected {
            return Err(ConnectionError::NotConnected { state }.into());
        }

        self.rooms.join(room, identity);
        Ok(vec![EngineAction::RoomUpdated { room }, EngineAction::RefreshMembers { room }])
    }

    fn handle_room_left(&mut self, room: RoomId, identity: IdentityId) -> Vec<EngineAction> {
        self.rooms.leave(room, identity);
        vec![EngineAction::RoomUpdated { room }, EngineAction::RefreshMembers { room }]
    }

    fn handle_members_refreshed(&mut self, room: RoomId, units: Vec<Unit>) -> Vec<EngineAction> {
        // Local identities without a live transport stay out, whatever the
        // backend still believes.
        let (kept, stale): (Vec<Unit>, Vec<Unit>) =
            units.into_iter().partition(|u| self.registry.presence(u.id) != Presence::Offline);

        for unit in &stale {
            self.rooms.set_nickname(unit.id, unit.nickname.clone());
        }
        self.rooms.refresh_members(room, &kept);

        let mut actions = vec![EngineAction::RoomUpdated { room }];
        if !stale.is_empty() {
            actions.push(EngineAction::Log {
                level: LogLevel::Debug,
                message: format!(
                    "room {room}: skipped {} disconnected local identities from member list",
                    stale.len()
                ),
            });
        }
        actions
    }

    fn handle_rooms_listed(&mut self, listed: Vec<(RoomId, RoomInfo)>) -> Vec<EngineAction> {
        let listed: HashMap<RoomId, RoomInfo> = listed.into_iter().collect();
        let mut actions = Vec::new();

        for room in self.rooms.rooms() {
            if !listed.contains_key(&room) && self.rooms.room_info(room).is_some() {
                self.rooms.set_room_info(room, None);
                actions.push(EngineAction::RoomUpdated { room });
            }
        }

        for (room, info) in listed {
            if self.rooms.room_info(room) != Some(info) {
                self.rooms.set_room_info(room, Some(info));
                actions.push(EngineAction::RoomUpdated { room });
            }
        }

        actions
    }

    fn rooms_left(rooms: &[RoomId]) -> impl Iterator<Item = EngineAction> + '_ {
        rooms.iter().map(|&room| EngineAction::RoomUpdated { room })
    }

    fn convert_connection_actions(
        identity: IdentityId,
        connection: ConnectionId,
        actions: Vec<ConnectionAction>,
    ) -> Vec<EngineAction> {
        actions
            .into_iter()
            .map(|action| match action {
                ConnectionAction::Open { url } => {
                    EngineAction::OpenTransport { identity, connection, url }
                },
                ConnectionAction::Transmit(bytes) => {
                    EngineAction::Transmit { identity, connection, bytes }
                },
                ConnectionAction::Close => EngineAction::CloseTransport { identity, connection },
            })
            .collect()
    }
}
