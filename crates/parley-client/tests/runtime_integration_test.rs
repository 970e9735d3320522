//! Runtime integration tests
//!
//! Runs the real runtime, real sockets and a small in-process backend: a
//! tokio-tungstenite server that relays frames the way the chat server does,
//! sharing its room table with an in-memory [`RoomDirectory`].
//!
//! Backend behavior mirrored here:
//! - `?user_id=` identifies the socket; unknown users get a text rejection
//! - direct frames go to the target's socket only
//! - room data frames go to every member, sender included
//! - joins and quits are announced to the room with a notify frame

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    future::Future,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parley_client::{
    ClientConfig, ClientError, DirectoryError, Runtime, RuntimeHandle, RoomDirectory, SystemEnv,
    Update,
};
use parley_core::{
    ConnectionState, Direction, Endpoint, EntryOrigin, IdentityId, RoomId, RoomInfo, RoomStatus,
    Sender, Unit,
};
use parley_proto::{Frame, NotifyKind};
use tokio::{net::TcpListener, sync::mpsc};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        Message,
        handshake::server::{ErrorResponse, Request, Response},
    },
};

/// Identities the backend refuses.
const UNKNOWN_USER: IdentityId = 0;

#[derive(Default)]
struct BackendState {
    rooms: BTreeMap<RoomId, (u32, BTreeSet<IdentityId>)>,
    next_room: RoomId,
    sockets: HashMap<IdentityId, mpsc::UnboundedSender<Message>>,
}

impl BackendState {
    fn send_to(&self, identity: IdentityId, frame: &Frame) {
        if let Some(socket) = self.sockets.get(&identity) {
            let _ = socket.send(Message::Binary(frame.to_bytes().unwrap()));
        }
    }

    fn broadcast(&self, room: RoomId, frame: &Frame) {
        if let Some((_, members)) = self.rooms.get(&room) {
            for member in members {
                self.send_to(*member, frame);
            }
        }
    }
}

#[derive(Clone, Default)]
struct Backend {
    state: Arc<Mutex<BackendState>>,
}

impl Backend {
    async fn start(&self) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let backend = self.clone();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(backend.clone().serve(stream));
            }
        });

        addr
    }

    async fn serve(self, stream: tokio::net::TcpStream) {
        let mut user_id = None;
        let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            user_id = request
                .uri()
                .query()
                .and_then(|q| q.split('&').find_map(|kv| kv.strip_prefix("user_id=")))
                .and_then(|id| id.parse::<IdentityId>().ok());
            Ok(response)
        };

        let Ok(ws) = accept_hdr_async(stream, callback).await else { return };
        let (mut sink, mut stream) = ws.split();

        let Some(identity) = user_id.filter(|&id| id != UNKNOWN_USER) else {
            let _ = sink.send(Message::Text("User not found".into())).await;
            let _ = sink.close().await;
            return;
        };

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        self.state.lock().unwrap().sockets.insert(identity, tx);

        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if sink.send(message).await.is_err() {
                    break;
                }
            }
        });

        while let Some(Ok(message)) = stream.next().await {
            let Message::Binary(bytes) = message else { continue };
            let Ok(frame) = Frame::decode(&bytes) else { continue };

            let state = self.state.lock().unwrap();
            match &frame {
                Frame::Direct(msg) => state.send_to(msg.target, &frame),
                Frame::Room(msg) => state.broadcast(msg.room, &frame),
            }
        }

        let mut state = self.state.lock().unwrap();
        state.sockets.remove(&identity);
        for (_, members) in state.rooms.values_mut() {
            members.remove(&identity);
        }
        writer.abort();
    }

    /// Close `identity`'s socket from the backend side.
    fn kick(&self, identity: IdentityId) {
        if let Some(socket) = self.state.lock().unwrap().sockets.get(&identity) {
            let _ = socket.send(Message::Close(None));
        }
    }

    fn membership(&self, room: RoomId) -> BTreeSet<IdentityId> {
        self.state.lock().unwrap().rooms.get(&room).map(|(_, m)| m.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RoomDirectory for Backend {
    async fn list_rooms(&self) -> Result<Vec<(RoomId, RoomInfo)>, DirectoryError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .rooms
            .iter()
            .map(|(id, (max, members))| {
                let full = members.len() as u32 >= *max;
                let status = if full { RoomStatus::Full } else { RoomStatus::Normal };
                (*id, RoomInfo { max_units: *max, status })
            })
            .collect())
    }

    async fn create_room(&self, max_units: u32) -> Result<RoomId, DirectoryError> {
        let mut state = self.state.lock().unwrap();
        state.next_room += 1;
        let room = state.next_room;
        state.rooms.insert(room, (max_units, BTreeSet::new()));
        Ok(room)
    }

    async fn delete_room(&self, room: RoomId) -> Result<(), DirectoryError> {
        let mut state = self.state.lock().unwrap();
        match state.rooms.remove(&room) {
            Some(_) => Ok(()),
            None => Err(DirectoryError::Status { status: 500, message: "room not found".into() }),
        }
    }

    async fn join_room(&self, room: RoomId, identity: IdentityId) -> Result<(), DirectoryError> {
        let mut state = self.state.lock().unwrap();
        let Some((max, members)) = state.rooms.get_mut(&room) else {
            return Err(DirectoryError::Status { status: 500, message: "room not found".into() });
        };
        if members.len() as u32 >= *max {
            return Err(DirectoryError::Status { status: 500, message: "room is full".into() });
        }
        members.insert(identity);
        state.broadcast(room, &Frame::notify(room, NotifyKind::Joined, identity));
        Ok(())
    }

    async fn quit_room(&self, room: RoomId, identity: IdentityId) -> Result<(), DirectoryError> {
        let mut state = self.state.lock().unwrap();
        if let Some((_, members)) = state.rooms.get_mut(&room) {
            members.remove(&identity);
        }
        state.broadcast(room, &Frame::notify(room, NotifyKind::Left, identity));
        Ok(())
    }

    async fn members(&self, room: RoomId) -> Result<Vec<Unit>, DirectoryError> {
        Ok(self
            .membership(room)
            .into_iter()
            .map(|id| Unit { id, nickname: format!("user-{id}") })
            .collect())
    }
}

struct Fixture {
    backend: Backend,
    handle: RuntimeHandle<Instant>,
}

impl Fixture {
    async fn start() -> Self {
        let backend = Backend::default();
        let addr = backend.start().await;
        let config = ClientConfig {
            endpoint: Endpoint::parse(format!("ws://{addr}/ws")).unwrap(),
            lookback: Duration::from_secs(5),
            ..Default::default()
        };
        let (handle, _task) = Runtime::spawn(SystemEnv::new(), backend.clone(), config);
        Self { backend, handle }
    }

    async fn room_with(&self, identities: &[IdentityId]) -> RoomId {
        let room = self.handle.create_room(8).await.unwrap();
        for &identity in identities {
            self.handle.connect(identity).await.unwrap();
            self.handle.join_room(room, identity).await.unwrap();
        }
        room
    }
}

/// Poll `check` until it holds or two seconds pass.
async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn connect_then_disconnect() {
    let fx = Fixture::start().await;
    let mut updates = fx.handle.subscribe();

    fx.handle.connect(1).await.unwrap();
    assert_eq!(fx.handle.state(1).await.unwrap(), ConnectionState::Connected);

    let mut seen = Vec::new();
    while let Ok(update) = updates.try_recv() {
        seen.push(update);
    }
    assert!(seen.contains(&Update::Status { identity: 1, state: ConnectionState::Connected }));

    fx.handle.disconnect(1).await.unwrap();
    assert_eq!(fx.handle.state(1).await.unwrap(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn duplicate_connect_is_rejected() {
    let fx = Fixture::start().await;
    fx.handle.connect(1).await.unwrap();

    let err = fx.handle.connect(1).await.unwrap_err();
    assert!(err.is_duplicate_connection());
    assert_eq!(fx.handle.state(1).await.unwrap(), ConnectionState::Connected);
}

#[tokio::test]
async fn unreachable_backend_fails_connect() {
    // Bind then drop to get a port nobody listens on
    let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
    let config = ClientConfig {
        endpoint: Endpoint::parse(format!("ws://{addr}/ws")).unwrap(),
        ..Default::default()
    };
    let (handle, _task) = Runtime::spawn(SystemEnv::new(), Backend::default(), config);

    let err = handle.connect(1).await.unwrap_err();
    assert!(matches!(err, ClientError::ConnectFailed { identity: 1, .. }));
    assert_eq!(handle.state(1).await.unwrap(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn room_echo_collapses_into_optimistic_entry() {
    let fx = Fixture::start().await;
    let room = fx.room_with(&[1, 2]).await;

    fx.handle.send_room(1, room, "hello").await.unwrap();

    let handle = fx.handle.clone();
    eventually("both echoes to be folded in", || {
        let handle = handle.clone();
        async move {
            let history = handle.history(room).await.unwrap();
            history.iter().any(|e| {
                e.text == "hello" && e.receivers.iter().copied().collect::<Vec<_>>() == vec![1, 2]
            })
        }
    })
    .await;

    let history = fx.handle.history(room).await.unwrap();
    let chat: Vec<_> = history.iter().filter(|e| e.origin != EntryOrigin::System).collect();
    assert_eq!(chat.len(), 1);
    assert_eq!(chat[0].sender, Sender::Identity(1));
    assert!(chat[0].confirmed);
}

#[tokio::test]
async fn direct_message_reaches_target_inbox() {
    let fx = Fixture::start().await;
    fx.handle.connect(1).await.unwrap();
    fx.handle.connect(2).await.unwrap();

    fx.handle.send_direct(1, 2, "psst").await.unwrap();

    let handle = fx.handle.clone();
    eventually("direct message delivery", || {
        let handle = handle.clone();
        async move { !handle.inbox(2).await.unwrap().is_empty() }
    })
    .await;

    let received = fx.handle.inbox(2).await.unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].text, "psst");
    assert_eq!(received[0].peer, Some(1));
    assert_eq!(received[0].direction, Direction::Received);

    let sent = fx.handle.inbox(1).await.unwrap();
    assert_eq!(sent[0].direction, Direction::Sent);
}

#[tokio::test]
async fn rejected_identity_ends_disconnected() {
    let fx = Fixture::start().await;

    // Handshake succeeds; the rejection arrives as the first message
    let _ = fx.handle.connect(UNKNOWN_USER).await;

    let handle = fx.handle.clone();
    eventually("the rejection to be applied", || {
        let handle = handle.clone();
        async move { handle.stats().await.unwrap().auth_rejections == 1 }
    })
    .await;

    assert_eq!(fx.handle.state(UNKNOWN_USER).await.unwrap(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn join_and_leave_update_members() {
    let fx = Fixture::start().await;
    let room = fx.room_with(&[1, 2]).await;

    let handle = fx.handle.clone();
    eventually("member refresh after join", || {
        let handle = handle.clone();
        async move { handle.members(room).await.unwrap() == vec![1, 2] }
    })
    .await;

    fx.handle.leave_room(room, 2).await.unwrap();
    assert_eq!(fx.backend.membership(room), BTreeSet::from([1]));

    let handle = fx.handle.clone();
    eventually("member refresh after leave", || {
        let handle = handle.clone();
        async move { handle.members(room).await.unwrap() == vec![1] }
    })
    .await;

    let err = fx.handle.send_room(2, room, "still here?").await.unwrap_err();
    assert!(matches!(err, ClientError::Engine(_)));
}

#[tokio::test]
async fn send_after_backend_closes_fails() {
    let fx = Fixture::start().await;
    let room = fx.room_with(&[1, 2]).await;

    fx.backend.kick(2);

    let handle = fx.handle.clone();
    eventually("the peer close to be applied", || {
        let handle = handle.clone();
        async move { handle.state(2).await.unwrap() == ConnectionState::Disconnected }
    })
    .await;

    assert!(fx.handle.send_room(2, room, "anyone?").await.is_err());
    assert!(fx.handle.send_direct(2, 1, "anyone?").await.is_err());
    assert!(!fx.handle.members(room).await.unwrap().contains(&2));

    let history = fx.handle.history(room).await.unwrap();
    assert!(history.iter().all(|e| e.text != "anyone?"));
}

#[tokio::test]
async fn join_needs_a_live_connection() {
    let fx = Fixture::start().await;
    let room = fx.handle.create_room(4).await.unwrap();

    let err = fx.handle.join_room(room, 9).await.unwrap_err();
    assert!(matches!(err, ClientError::Engine(_)));
    assert!(fx.backend.membership(room).is_empty());
}

#[tokio::test]
async fn disconnect_leaves_every_room() {
    let fx = Fixture::start().await;
    let first = fx.room_with(&[1, 2]).await;
    let second = fx.handle.create_room(4).await.unwrap();
    fx.handle.join_room(second, 1).await.unwrap();

    fx.handle.disconnect(1).await.unwrap();

    assert!(!fx.handle.members(first).await.unwrap().contains(&1));
    assert!(!fx.handle.members(second).await.unwrap().contains(&1));
    assert!(fx.handle.members(first).await.unwrap().contains(&2));
}

#[tokio::test]
async fn list_rooms_reports_directory_state() {
    let fx = Fixture::start().await;
    let room = fx.handle.create_room(1).await.unwrap();
    fx.handle.connect(1).await.unwrap();
    fx.handle.join_room(room, 1).await.unwrap();

    let rooms = fx.handle.list_rooms().await.unwrap();
    assert_eq!(rooms, vec![(room, RoomInfo { max_units: 1, status: RoomStatus::Full })]);

    fx.handle.connect(2).await.unwrap();
    let err = fx.handle.join_room(room, 2).await.unwrap_err();
    assert!(matches!(err, ClientError::Directory(DirectoryError::Status { .. })));

    fx.handle.delete_room(room).await.unwrap();
    assert!(fx.handle.list_rooms().await.unwrap().is_empty());
}

#[tokio::test]
async fn shutdown_stops_the_runtime() {
    let fx = Fixture::start().await;
    fx.handle.connect(1).await.unwrap();

    fx.handle.shutdown().await.unwrap();

    let err = fx.handle.state(1).await.unwrap_err();
    assert!(matches!(err, ClientError::Shutdown));
}
