//! Fuzz target for Engine event sequences
//!
//! Drives the engine with arbitrary interleavings of intents, transport
//! callbacks (including stale ones) and inbound payloads.
//!
//! # Invariants
//!
//! - The engine never panics
//! - Room membership indices agree in both directions
//! - Room history never shrinks
//! - A local identity without an open connection is in no room

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use parley_core::{
    CloseReason, ConnectionId, Engine, EngineConfig, EngineEvent, Incoming, Presence,
    env::ManualEnv,
};
use parley_proto::{Frame, NotifyKind};

const IDENTITIES: i32 = 4;
const ROOMS: i32 = 3;

#[derive(Debug, Arbitrary)]
enum Step {
    Connect { identity: u8 },
    Disconnect { identity: u8 },
    Opened { identity: u8, connection: u8 },
    Closed { identity: u8, connection: u8 },
    Join { identity: u8, room: u8 },
    Leave { identity: u8, room: u8 },
    SendRoom { identity: u8, room: u8, text: u8 },
    SendDirect { from: u8, to: u8, text: u8 },
    Broadcast { receiver: u8, room: u8, text: u8, sender: Option<u8> },
    Notify { receiver: u8, room: u8, joined: bool, operator: u8 },
    Raw { receiver: u8, bytes: Vec<u8> },
    Advance { millis: u16 },
}

fn identity(raw: u8) -> i32 {
    i32::from(raw) % IDENTITIES
}

fn room(raw: u8) -> i32 {
    i32::from(raw) % ROOMS
}

fn text(raw: u8) -> String {
    format!("m{}", raw % 4)
}

fuzz_target!(|steps: Vec<Step>| {
    let env = ManualEnv::new();
    let mut engine = Engine::new(env.clone(), EngineConfig::default());

    for step in steps {
        let history_before: Vec<usize> =
            (0..ROOMS).map(|r| engine.rooms().history(r).len()).collect();

        let event = match step {
            Step::Connect { identity: i } => EngineEvent::Connect { identity: identity(i) },
            Step::Disconnect { identity: i } => EngineEvent::Disconnect { identity: identity(i) },
            Step::Opened { identity: i, connection } => EngineEvent::TransportOpened {
                identity: identity(i),
                connection: ConnectionId(u64::from(connection % 8)),
            },
            Step::Closed { identity: i, connection } => EngineEvent::TransportClosed {
                identity: identity(i),
                connection: ConnectionId(u64::from(connection % 8)),
                reason: CloseReason::Transport("fuzz".into()),
            },
            Step::Join { identity: i, room: r } => {
                EngineEvent::RoomJoined { room: room(r), identity: identity(i) }
            },
            Step::Leave { identity: i, room: r } => {
                EngineEvent::RoomLeft { room: room(r), identity: identity(i) }
            },
            Step::SendRoom { identity: i, room: r, text: t } => {
                EngineEvent::SendRoom { identity: identity(i), room: room(r), text: text(t) }
            },
            Step::SendDirect { from, to, text: t } => {
                EngineEvent::SendDirect { from: identity(from), to: identity(to), text: text(t) }
            },
            Step::Broadcast { receiver, room: r, text: t, sender } => {
                let mut frame = Frame::room_text(room(r), text(t));
                if let Some(sender) = sender {
                    frame = frame.with_sender(identity(sender));
                }
                let bytes = frame.to_bytes().expect("encodes");
                payload(&engine, identity(receiver), Incoming::Binary(bytes))
            },
            Step::Notify { receiver, room: r, joined, operator } => {
                let kind = if joined { NotifyKind::Joined } else { NotifyKind::Left };
                let frame = Frame::notify(room(r), kind, identity(operator));
                let bytes = frame.to_bytes().expect("encodes");
                payload(&engine, identity(receiver), Incoming::Binary(bytes))
            },
            Step::Raw { receiver, bytes } => {
                payload(&engine, identity(receiver), Incoming::Binary(Bytes::from(bytes)))
            },
            Step::Advance { millis } => {
                env.advance(Duration::from_millis(u64::from(millis)));
                continue;
            },
        };

        // Caller mistakes are errors, never panics
        let _ = engine.handle(event);

        for r in 0..ROOMS {
            assert!(engine.rooms().history(r).len() >= history_before[r as usize]);
            for member in engine.rooms().members_of(r) {
                assert!(engine.rooms().rooms_of(member).contains(&r));
            }
        }
        for i in 0..IDENTITIES {
            let rooms = engine.rooms().rooms_of(i);
            for &r in &rooms {
                assert!(engine.rooms().members_of(r).contains(&i));
            }
            if engine.registry().presence(i) == Presence::Offline {
                assert!(rooms.is_empty());
            }
        }
    }
});

fn payload(engine: &Engine<ManualEnv>, identity: i32, payload: Incoming) -> EngineEvent {
    let connection = engine.registry().find(identity).map_or(ConnectionId(0), |c| c.id());
    EngineEvent::PayloadReceived { identity, connection, payload }
}
