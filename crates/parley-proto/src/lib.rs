//! Parley wire protocol.
//!
//! A Parley frame is a single protobuf message carried in one binary
//! websocket message. The same `target_id` field addresses either an identity
//! or a room; the `is_user` flag is the only thing telling them apart.
//!
//! # Layers
//!
//! - [`wire`]: the raw protobuf schema ([`wire::ChatMessage`] and friends),
//!   exactly as it appears on the socket.
//! - [`Frame`]: the typed view the rest of the system works with. Decoding
//!   validates the raw message and rejects anything the router could not
//!   classify unambiguously.
//!
//! # Invariants
//!
//! - `Frame::decode(&frame.to_bytes()?) == Ok(frame)` for every frame built
//!   through the public constructors.
//! - `is_user` is always written explicitly, including when it is `false`.
//!   A message without it never decodes.

#![forbid(unsafe_code)]

pub mod errors;
mod frame;
pub mod wire;

pub use errors::{ProtocolError, Result};
pub use frame::{
    DirectMessage, Frame, IdentityId, MAX_FRAME_SIZE, MessageKind, NotifyEvent, NotifyKind,
    RoomBody, RoomId, RoomMessage,
};
