//! Async runtime driving the sync engine.
//!
//! The [`Runtime`] is the single dispatcher: one task owns the [`Engine`] and
//! serializes everything that can change it. It selects over
//!
//! - commands from any number of [`RuntimeHandle`]s
//! - events from every identity's socket task (one shared channel)
//! - completions of room directory calls, which run as their own tasks
//! - an optional member-poll timer
//!
//! and executes the actions the engine returns. Directory calls never block
//! the loop; their results come back as completions and are fed to the
//! engine in arrival order.

use std::{collections::HashMap, sync::Arc, time::Duration};

use parley_core::{
    ConnectionError, ConnectionId, ConnectionState, Engine, EngineAction, EngineError, EngineEvent,
    Environment, IdentityId, InboxEntry, LogEntry, LogLevel, RoomId, RoomInfo, RouteStats, Unit,
};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::{
    config::ClientConfig,
    directory::RoomDirectory,
    error::{ClientError, DirectoryError, TransmitError},
    transport::{Socket, TransportEvent, TransportMessage, spawn_socket},
};

/// Notifications for observers of the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Update {
    /// An identity's connection state changed
    Status {
        /// Identity
        identity: IdentityId,
        /// New state
        state: ConnectionState,
    },
    /// A room's membership or history changed
    Room {
        /// Room
        room: RoomId,
    },
    /// An identity's inbox changed
    Inbox {
        /// Identity
        identity: IdentityId,
    },
}

type Reply<T> = oneshot::Sender<Result<T, ClientError>>;
type Listing = Vec<(RoomId, RoomInfo)>;

enum Command<I> {
    Connect { identity: IdentityId, reply: Reply<()> },
    Disconnect { identity: IdentityId, reply: oneshot::Sender<()> },
    SendDirect { from: IdentityId, to: IdentityId, text: String, reply: Reply<()> },
    SendRoom { identity: IdentityId, room: RoomId, text: String, reply: Reply<()> },
    JoinRoom { room: RoomId, identity: IdentityId, reply: Reply<()> },
    LeaveRoom { room: RoomId, identity: IdentityId, reply: Reply<()> },
    ListRooms { reply: Reply<Listing> },
    CreateRoom { max_units: u32, reply: Reply<RoomId> },
    DeleteRoom { room: RoomId, reply: Reply<()> },
    History { room: RoomId, reply: oneshot::Sender<Vec<LogEntry<I>>> },
    Members { room: RoomId, reply: oneshot::Sender<Vec<IdentityId>> },
    Inbox { identity: IdentityId, reply: oneshot::Sender<Vec<InboxEntry<I>>> },
    State { identity: IdentityId, reply: oneshot::Sender<ConnectionState> },
    Stats { reply: oneshot::Sender<RouteStats> },
    Shutdown { reply: oneshot::Sender<()> },
}

enum Completion {
    Joined {
        room: RoomId,
        identity: IdentityId,
        result: Result<(), DirectoryError>,
        reply: Reply<()>,
    },
    Left {
        room: RoomId,
        identity: IdentityId,
        result: Result<(), DirectoryError>,
        reply: Reply<()>,
    },
    Members { room: RoomId, result: Result<Vec<Unit>, DirectoryError> },
    Listed { result: Result<Listing, DirectoryError>, reply: Reply<Listing> },
}

struct PendingConnect {
    connection: Option<ConnectionId>,
    reply: Reply<()>,
}

/// Cloneable handle for talking to a running [`Runtime`].
pub struct RuntimeHandle<I> {
    commands: mpsc::Sender<Command<I>>,
    updates: broadcast::Sender<Update>,
}

impl<I> Clone for RuntimeHandle<I> {
    fn clone(&self) -> Self {
        Self { commands: self.commands.clone(), updates: self.updates.clone() }
    }
}

impl<I> RuntimeHandle<I> {
    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> Command<I>,
    ) -> Result<T, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).await?;
        rx.await?
    }

    async fn query<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command<I>,
    ) -> Result<T, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).await?;
        Ok(rx.await?)
    }

    /// Connect an identity. Resolves once its websocket is open.
    ///
    /// # Errors
    ///
    /// - `ClientError::Engine` if the identity already has a live connection
    /// - `ClientError::ConnectFailed` if the socket closed before opening
    pub async fn connect(&self, identity: IdentityId) -> Result<(), ClientError> {
        self.request(|reply| Command::Connect { identity, reply }).await
    }

    /// Disconnect an identity. Safe to call in any state.
    pub async fn disconnect(&self, identity: IdentityId) -> Result<(), ClientError> {
        self.query(|reply| Command::Disconnect { identity, reply }).await
    }

    /// Send a direct message from `from` to `to`.
    pub async fn send_direct(
        &self,
        from: IdentityId,
        to: IdentityId,
        text: impl Into<String>,
    ) -> Result<(), ClientError> {
        let text = text.into();
        self.request(|reply| Command::SendDirect { from, to, text, reply }).await
    }

    /// Send a message to a room `identity` is a member of.
    pub async fn send_room(
        &self,
        identity: IdentityId,
        room: RoomId,
        text: impl Into<String>,
    ) -> Result<(), ClientError> {
        let text = text.into();
        self.request(|reply| Command::SendRoom { identity, room, text, reply }).await
    }

    /// Join a room through the directory, then record the membership.
    pub async fn join_room(&self, room: RoomId, identity: IdentityId) -> Result<(), ClientError> {
        self.request(|reply| Command::JoinRoom { room, identity, reply }).await
    }

    /// Quit a room through the directory, then drop the membership.
    pub async fn leave_room(&self, room: RoomId, identity: IdentityId) -> Result<(), ClientError> {
        self.request(|reply| Command::LeaveRoom { room, identity, reply }).await
    }

    /// List rooms and cache their descriptions.
    pub async fn list_rooms(&self) -> Result<Vec<(RoomId, RoomInfo)>, ClientError> {
        self.request(|reply| Command::ListRooms { reply }).await
    }

    /// Create a room.
    pub async fn create_room(&self, max_units: u32) -> Result<RoomId, ClientError> {
        self.request(|reply| Command::CreateRoom { max_units, reply }).await
    }

    /// Delete a room.
    pub async fn delete_room(&self, room: RoomId) -> Result<(), ClientError> {
        self.request(|reply| Command::DeleteRoom { room, reply }).await
    }

    /// Snapshot of a room's history.
    pub async fn history(&self, room: RoomId) -> Result<Vec<LogEntry<I>>, ClientError> {
        self.query(|reply| Command::History { room, reply }).await
    }

    /// Current member belief for a room, in ascending order.
    pub async fn members(&self, room: RoomId) -> Result<Vec<IdentityId>, ClientError> {
        self.query(|reply| Command::Members { room, reply }).await
    }

    /// Snapshot of an identity's direct messages.
    pub async fn inbox(&self, identity: IdentityId) -> Result<Vec<InboxEntry<I>>, ClientError> {
        self.query(|reply| Command::Inbox { identity, reply }).await
    }

    /// Connection state of an identity.
    pub async fn state(&self, identity: IdentityId) -> Result<ConnectionState, ClientError> {
        self.query(|reply| Command::State { identity, reply }).await
    }

    /// Routing counters.
    pub async fn stats(&self) -> Result<RouteStats, ClientError> {
        self.query(|reply| Command::Stats { reply }).await
    }

    /// Receive every [`Update`] from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Update> {
        self.updates.subscribe()
    }

    /// Disconnect every identity and stop the runtime.
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        self.query(|reply| Command::Shutdown { reply }).await
    }
}

/// Single-task driver owning the engine, its sockets and directory calls.
pub struct Runtime<E: Environment, D> {
    env: E,
    engine: Engine<E>,
    directory: Arc<D>,
    config: ClientConfig,
    sockets: HashMap<IdentityId, Socket>,
    pending_connects: HashMap<IdentityId, PendingConnect>,
    commands: mpsc::Receiver<Command<E::Instant>>,
    transport_tx: mpsc::Sender<TransportMessage>,
    transport_rx: mpsc::Receiver<TransportMessage>,
    completion_tx: mpsc::Sender<Completion>,
    completion_rx: mpsc::Receiver<Completion>,
    updates: broadcast::Sender<Update>,
}

impl<E, D> Runtime<E, D>
where
    E: Environment,
    D: RoomDirectory,
{
    /// Create a runtime and a handle to it. Nothing happens until
    /// [`Runtime::run`] is awaited.
    pub fn new(env: E, directory: D, config: ClientConfig) -> (Self, RuntimeHandle<E::Instant>) {
        let capacity = config.channel_capacity.max(1);
        let (command_tx, command_rx) = mpsc::channel(capacity);
        let (transport_tx, transport_rx) = mpsc::channel(capacity);
        let (completion_tx, completion_rx) = mpsc::channel(capacity);
        let (updates, _) = broadcast::channel(capacity);

        let runtime = Self {
            engine: Engine::new(env.clone(), config.engine()),
            env,
            directory: Arc::new(directory),
            config,
            sockets: HashMap::new(),
            pending_connects: HashMap::new(),
            commands: command_rx,
            transport_tx,
            transport_rx,
            completion_tx,
            completion_rx,
            updates: updates.clone(),
        };

        (runtime, RuntimeHandle { commands: command_tx, updates })
    }

    /// Spawn the runtime onto the current tokio runtime.
    pub fn spawn(
        env: E,
        directory: D,
        config: ClientConfig,
    ) -> (RuntimeHandle<E::Instant>, tokio::task::JoinHandle<()>) {
        let (runtime, handle) = Self::new(env, directory, config);
        (handle, tokio::spawn(runtime.run()))
    }

    /// Run until shut down or every handle is dropped.
    pub async fn run(mut self) {
        let env = self.env.clone();
        let poll_interval = self.config.member_poll_interval;
        let mut poll = Box::pin(env.sleep(poll_interval.unwrap_or(Duration::from_secs(3600))));

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command) {
                            break;
                        }
                    },
                    None => {
                        self.shutdown();
                        break;
                    },
                },
                Some(message) = self.transport_rx.recv() => self.handle_transport(message),
                Some(completion) = self.completion_rx.recv() => self.handle_completion(completion),
                () = &mut poll, if poll_interval.is_some() => {
                    self.poll_members();
                    if let Some(interval) = poll_interval {
                        poll = Box::pin(env.sleep(interval));
                    }
                },
            }
        }

        tracing::debug!("runtime stopped");
    }

    /// Returns `false` once the runtime should stop.
    fn handle_command(&mut self, command: Command<E::Instant>) -> bool {
        match command {
            Command::Connect { identity, reply } => {
                match self.engine.handle(EngineEvent::Connect { identity }) {
                    Ok(actions) => {
                        let pending = PendingConnect { connection: None, reply };
                        self.pending_connects.insert(identity, pending);
                        if let Err(e) = self.execute(actions) {
                            tracing::warn!(identity, "{e}");
                        }
                    },
                    Err(e) => {
                        let _ = reply.send(Err(e.into()));
                    },
                }
            },
            Command::Disconnect { identity, reply } => {
                self.dispatch(EngineEvent::Disconnect { identity });
                let _ = reply.send(());
            },
            Command::SendDirect { from, to, text, reply } => {
                let result = self.apply(EngineEvent::SendDirect { from, to, text });
                let _ = reply.send(result);
            },
            Command::SendRoom { identity, room, text, reply } => {
                let result = self.apply(EngineEvent::SendRoom { identity, room, text });
                let _ = reply.send(result);
            },
            Command::JoinRoom { room, identity, reply } => {
                // The backend must not learn about a join we cannot record
                let state = self.engine.state(identity);
                if state != ConnectionState::Connected {
                    let err = EngineError::from(ConnectionError::NotConnected { state });
                    let _ = reply.send(Err(err.into()));
                    return true;
                }
                let directory = Arc::clone(&self.directory);
                self.complete(async move {
                    let result = directory.join_room(room, identity).await;
                    Completion::Joined { room, identity, result, reply }
                });
            },
            Command::LeaveRoom { room, identity, reply } => {
                let directory = Arc::clone(&self.directory);
                self.complete(async move {
                    let result = directory.quit_room(room, identity).await;
                    Completion::Left { room, identity, result, reply }
                });
            },
            Command::ListRooms { reply } => {
                let directory = Arc::clone(&self.directory);
                self.complete(async move {
                    let result = directory.list_rooms().await;
                    Completion::Listed { result, reply }
                });
            },
            Command::CreateRoom { max_units, reply } => {
                let directory = Arc::clone(&self.directory);
                tokio::spawn(async move {
                    let _ = reply.send(directory.create_room(max_units).await.map_err(Into::into));
                });
            },
            Command::DeleteRoom { room, reply } => {
                let directory = Arc::clone(&self.directory);
                tokio::spawn(async move {
                    let _ = reply.send(directory.delete_room(room).await.map_err(Into::into));
                });
            },
            Command::History { room, reply } => {
                let _ = reply.send(self.engine.rooms().history(room).to_vec());
            },
            Command::Members { room, reply } => {
                let _ = reply.send(self.engine.rooms().members_of(room).into_iter().collect());
            },
            Command::Inbox { identity, reply } => {
                let entries = self
                    .engine
                    .inbox(identity)
                    .map(|inbox| inbox.entries().to_vec())
                    .unwrap_or_default();
                let _ = reply.send(entries);
            },
            Command::State { identity, reply } => {
                let _ = reply.send(self.engine.state(identity));
            },
            Command::Stats { reply } => {
                let _ = reply.send(self.engine.stats());
            },
            Command::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return false;
            },
        }
        true
    }

    fn handle_transport(&mut self, message: TransportMessage) {
        let TransportMessage { identity, connection, event } = message;

        let event = match event {
            TransportEvent::Opened => EngineEvent::TransportOpened { identity, connection },
            TransportEvent::Payload(payload) => {
                EngineEvent::PayloadReceived { identity, connection, payload }
            },
            TransportEvent::Closed(reason) => {
                // Task is finished; nothing left to close
                drop(self.take_socket(identity, connection));
                if let Some(pending) = self.take_pending(identity, connection) {
                    let reason = reason.to_string();
                    let err = ClientError::ConnectFailed { identity, reason };
                    let _ = pending.reply.send(Err(err));
                }
                EngineEvent::TransportClosed { identity, connection, reason }
            },
        };

        self.dispatch(event);
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Joined { room, identity, result, reply } => {
                let result = match result {
                    Ok(()) => self.apply(EngineEvent::RoomJoined { room, identity }),
                    Err(e) => Err(e.into()),
                };
                if let Err(e) = &result {
                    tracing::warn!(room, identity, "join failed: {e}");
                }
                let _ = reply.send(result);
            },
            Completion::Left { room, identity, result, reply } => {
                let result = match result {
                    Ok(()) => self.apply(EngineEvent::RoomLeft { room, identity }),
                    Err(e) => Err(e.into()),
                };
                let _ = reply.send(result);
            },
            Completion::Members { room, result } => match result {
                Ok(units) => self.dispatch(EngineEvent::MembersRefreshed { room, units }),
                Err(e) => tracing::warn!(room, "member refresh failed: {e}"),
            },
            Completion::Listed { result, reply } => {
                let result = match result {
                    Ok(rooms) => {
                        self.dispatch(EngineEvent::RoomsListed { rooms: rooms.clone() });
                        Ok(rooms)
                    },
                    Err(e) => Err(e.into()),
                };
                let _ = reply.send(result);
            },
        }
    }

    fn poll_members(&mut self) {
        let rooms: Vec<RoomId> = self
            .engine
            .rooms()
            .rooms()
            .into_iter()
            .filter(|&room| !self.engine.rooms().members_of(room).is_empty())
            .collect();

        tracing::trace!(rooms = rooms.len(), "polling member lists");
        for room in rooms {
            self.refresh_members(room);
        }
    }

    fn refresh_members(&self, room: RoomId) {
        let directory = Arc::clone(&self.directory);
        self.complete(async move {
            let result = directory.members(room).await;
            Completion::Members { room, result }
        });
    }

    /// Run a directory call on its own task and feed its result back into
    /// the loop.
    fn complete(&self, call: impl std::future::Future<Output = Completion> + Send + 'static) {
        let completions = self.completion_tx.clone();
        tokio::spawn(async move {
            let completion = call.await;
            // Runtime gone: nobody is waiting for the result
            let _ = completions.send(completion).await;
        });
    }

    /// Feed an event whose failure is only worth a log line.
    fn dispatch(&mut self, event: EngineEvent) {
        if let Err(e) = self.apply(event) {
            tracing::warn!("event failed: {e}");
        }
    }

    /// Feed an event on behalf of a caller waiting for the outcome.
    fn apply(&mut self, event: EngineEvent) -> Result<(), ClientError> {
        let actions = self.engine.handle(event)?;
        self.execute(actions)
    }

    /// Run every action. Fails with the first outgoing frame that could not
    /// be handed to its socket; the remaining actions still run.
    fn execute(&mut self, actions: Vec<EngineAction>) -> Result<(), ClientError> {
        let mut result = Ok(());

        for action in actions {
            match action {
                EngineAction::OpenTransport { identity, connection, url } => {
                    if let Some(pending) = self.pending_connects.get_mut(&identity) {
                        pending.connection = Some(connection);
                    }
                    let socket = spawn_socket(
                        identity,
                        connection,
                        url,
                        self.transport_tx.clone(),
                        self.config.channel_capacity,
                    );
                    if let Some(previous) = self.sockets.insert(identity, socket) {
                        previous.close();
                    }
                },
                EngineAction::Transmit { identity, connection, bytes } => {
                    let sent = match self.sockets.get(&identity) {
                        Some(socket) if socket.connection() == connection => socket.transmit(bytes),
                        _ => Err(TransmitError::NoSocket),
                    };
                    if let Err(source) = sent {
                        tracing::warn!(identity, %connection, "dropped outgoing frame: {source}");
                        if result.is_ok() {
                            result = Err(ClientError::SendFailed { identity, source });
                        }
                    }
                },
                EngineAction::CloseTransport { identity, connection } => {
                    if let Some(socket) = self.take_socket(identity, connection) {
                        socket.close();
                    }
                },
                EngineAction::RefreshMembers { room } => self.refresh_members(room),
                EngineAction::StatusChanged { identity, state } => {
                    self.settle_connect(identity, state);
                    self.publish(Update::Status { identity, state });
                },
                EngineAction::RoomUpdated { room } => self.publish(Update::Room { room }),
                EngineAction::InboxUpdated { identity } => self.publish(Update::Inbox { identity }),
                EngineAction::Log { level, message } => match level {
                    LogLevel::Debug => tracing::debug!("{}", message),
                    LogLevel::Info => tracing::info!("{}", message),
                    LogLevel::Warn => tracing::warn!("{}", message),
                },
            }
        }

        result
    }

    fn settle_connect(&mut self, identity: IdentityId, state: ConnectionState) {
        let result = match state {
            ConnectionState::Connected => Ok(()),
            ConnectionState::Disconnected => Err(ClientError::ConnectFailed {
                identity,
                reason: "disconnected before the connection opened".to_string(),
            }),
            ConnectionState::Connecting => return,
        };
        if let Some(pending) = self.pending_connects.remove(&identity) {
            let _ = pending.reply.send(result);
        }
    }

    fn take_pending(
        &mut self,
        identity: IdentityId,
        connection: ConnectionId,
    ) -> Option<PendingConnect> {
        if self.pending_connects.get(&identity)?.connection != Some(connection) {
            return None;
        }
        self.pending_connects.remove(&identity)
    }

    fn take_socket(&mut self, identity: IdentityId, connection: ConnectionId) -> Option<Socket> {
        if self.sockets.get(&identity)?.connection() != connection {
            return None;
        }
        self.sockets.remove(&identity)
    }

    fn publish(&self, update: Update) {
        // No subscribers is fine
        let _ = self.updates.send(update);
    }

    fn shutdown(&mut self) {
        for identity in self.engine.registry().connected() {
            self.dispatch(EngineEvent::Disconnect { identity });
        }
        for (identity, pending) in self.pending_connects.drain() {
            tracing::debug!(identity, "connect abandoned by shutdown");
            let _ = pending.reply.send(Err(ClientError::Shutdown));
        }
        for (_, socket) in self.sockets.drain() {
            socket.close();
        }
    }
}
