//! Typed frames.
//!
//! [`Frame`] is the decoded, validated form of a [`ChatMessage`]. The wire
//! overloads `target_id` for both identities and rooms; the typed form splits
//! it into [`DirectMessage::target`] and [`RoomMessage::room`] so the router
//! can never confuse the two.
//!
//! # Invariants
//!
//! - Direct frames never carry Notify semantics. A wire message with
//!   `is_user = true` and a Notify `message_type` is rejected.
//! - A Notify frame always carries a `notify_message`.
//! - `message_type` absent is Data. This is the only default the decoder
//!   applies; `is_user` has no default.

use bytes::{BufMut, Bytes, BytesMut};
use prost::Message as _;

use crate::{
    errors::{ProtocolError, Result},
    wire::{ChatMessage, Content, NotifyMessage},
};

/// Identity (simulated end-user) id.
pub type IdentityId = i32;

/// Room id.
pub type RoomId = i32;

/// Largest frame accepted by [`Frame::encode`] and [`Frame::decode`].
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Decoded wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Addressed to a single identity (`is_user = true`)
    Direct(DirectMessage),
    /// Addressed to a room (`is_user = false`)
    Room(RoomMessage),
}

/// Message addressed to one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectMessage {
    /// Recipient identity
    pub target: IdentityId,
    /// Originating identity, if the backend supplied one
    pub sender: Option<IdentityId>,
    /// Ordered payload batches
    pub payloads: Vec<Vec<String>>,
}

/// Message addressed to a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMessage {
    /// Target room
    pub room: RoomId,
    /// Originating identity, if the backend supplied one
    pub sender: Option<IdentityId>,
    /// Chat data or membership notification
    pub body: RoomBody,
}

/// Body of a room message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomBody {
    /// Chat payload batches
    Data(Vec<Vec<String>>),
    /// Membership change
    Notify(NotifyEvent),
}

/// Membership change inside a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotifyEvent {
    /// Joined or left
    pub kind: NotifyKind,
    /// Identity whose membership changed
    pub operator: IdentityId,
}

/// Kind of membership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyKind {
    /// Operator left the room (wire `Quit`, 0)
    Left,
    /// Operator joined the room (wire `Join`, 1)
    Joined,
}

impl NotifyKind {
    /// Wire value.
    pub const fn to_wire(self) -> i32 {
        match self {
            Self::Left => 0,
            Self::Joined => 1,
        }
    }

    /// Parse a wire value.
    pub const fn from_wire(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Self::Left),
            1 => Ok(Self::Joined),
            other => Err(ProtocolError::UnknownNotifyType(other)),
        }
    }
}

/// Room message classification (wire `message_type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Chat data (0)
    Data,
    /// Membership notification (1)
    Notify,
}

impl MessageKind {
    /// Wire value.
    pub const fn to_wire(self) -> i32 {
        match self {
            Self::Data => 0,
            Self::Notify => 1,
        }
    }

    /// Parse an optional wire value. Absent means Data.
    pub const fn from_wire(value: Option<i32>) -> Result<Self> {
        match value {
            None | Some(0) => Ok(Self::Data),
            Some(1) => Ok(Self::Notify),
            Some(other) => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

impl RoomMessage {
    /// Classification of this message.
    pub const fn kind(&self) -> MessageKind {
        match self.body {
            RoomBody::Data(_) => MessageKind::Data,
            RoomBody::Notify(_) => MessageKind::Notify,
        }
    }
}

impl DirectMessage {
    /// Payload strings across all batches, in order.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        flatten(&self.payloads)
    }
}

impl RoomBody {
    /// Payload strings across all batches, in order. Empty for Notify.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        let batches: &[Vec<String>] = match self {
            Self::Data(batches) => batches,
            Self::Notify(_) => &[],
        };
        flatten(batches)
    }
}

fn flatten(batches: &[Vec<String>]) -> impl Iterator<Item = &str> {
    batches.iter().flat_map(|batch| batch.iter().map(String::as_str))
}

impl Frame {
    /// Single-text direct message.
    pub fn direct(target: IdentityId, text: impl Into<String>) -> Self {
        Self::Direct(DirectMessage { target, sender: None, payloads: vec![vec![text.into()]] })
    }

    /// Single-text room message.
    pub fn room_text(room: RoomId, text: impl Into<String>) -> Self {
        Self::Room(RoomMessage {
            room,
            sender: None,
            body: RoomBody::Data(vec![vec![text.into()]]),
        })
    }

    /// Membership notification for `room`.
    pub fn notify(room: RoomId, kind: NotifyKind, operator: IdentityId) -> Self {
        Self::Room(RoomMessage {
            room,
            sender: None,
            body: RoomBody::Notify(NotifyEvent { kind, operator }),
        })
    }

    /// Same frame with `sender_id` set.
    #[must_use]
    pub fn with_sender(mut self, sender: IdentityId) -> Self {
        match &mut self {
            Self::Direct(msg) => msg.sender = Some(sender),
            Self::Room(msg) => msg.sender = Some(sender),
        }
        self
    }

    /// Wire `target_id`: identity for direct frames, room for room frames.
    pub const fn target_id(&self) -> i32 {
        match self {
            Self::Direct(msg) => msg.target,
            Self::Room(msg) => msg.room,
        }
    }

    /// Wire `is_user`.
    pub const fn is_user(&self) -> bool {
        matches!(self, Self::Direct(_))
    }

    /// Originating identity, if known.
    pub const fn sender(&self) -> Option<IdentityId> {
        match self {
            Self::Direct(msg) => msg.sender,
            Self::Room(msg) => msg.sender,
        }
    }

    /// Encode into `dst`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` if the encoded size exceeds
    ///   [`MAX_FRAME_SIZE`]
    pub fn encode(&self, dst: &mut impl BufMut) -> Result<()> {
        let wire = ChatMessage::from(self);
        let size = wire.encoded_len();
        if size > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge { size, max: MAX_FRAME_SIZE });
        }

        wire.encode(dst)?;
        Ok(())
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode and validate a wire message.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` before any parsing if `bytes` is over
    ///   the limit
    /// - `ProtocolError::MalformedFrame` if protobuf parsing fails or the
    ///   fields contradict each other
    /// - `ProtocolError::MissingField` if `is_user` or a Notify's
    ///   `notify_message` is absent
    /// - `ProtocolError::UnknownMessageType` / `UnknownNotifyType` for
    ///   out-of-range enum values
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge { size: bytes.len(), max: MAX_FRAME_SIZE });
        }

        let wire = ChatMessage::decode(bytes)?;
        Self::try_from(wire)
    }
}

impl TryFrom<ChatMessage> for Frame {
    type Error = ProtocolError;

    fn try_from(wire: ChatMessage) -> Result<Self> {
        let is_user = wire.is_user.ok_or(ProtocolError::MissingField("is_user"))?;
        let kind = MessageKind::from_wire(wire.message_type)?;
        let payloads: Vec<Vec<String>> =
            wire.contents.into_iter().map(|content| content.content).collect();

        if is_user {
            if kind == MessageKind::Notify || wire.notify_message.is_some() {
                return Err(ProtocolError::MalformedFrame(
                    "direct message carries a notify payload".to_string(),
                ));
            }

            return Ok(Self::Direct(DirectMessage {
                target: wire.target_id,
                sender: wire.sender_id,
                payloads,
            }));
        }

        let body = match kind {
            MessageKind::Data => RoomBody::Data(payloads),
            MessageKind::Notify => {
                let notify =
                    wire.notify_message.ok_or(ProtocolError::MissingField("notify_message"))?;
                RoomBody::Notify(NotifyEvent {
                    kind: NotifyKind::from_wire(notify.notify_type)?,
                    operator: notify.operator_id,
                })
            },
        };

        Ok(Self::Room(RoomMessage { room: wire.target_id, sender: wire.sender_id, body }))
    }
}

impl From<&Frame> for ChatMessage {
    fn from(frame: &Frame) -> Self {
        let to_contents = |payloads: &[Vec<String>]| {
            payloads.iter().map(|batch| Content { content: batch.clone() }).collect::<Vec<_>>()
        };

        match frame {
            Frame::Direct(msg) => Self {
                target_id: msg.target,
                is_user: Some(true),
                contents: to_contents(&msg.payloads),
                message_type: None,
                notify_message: None,
                sender_id: msg.sender,
            },
            Frame::Room(msg) => match &msg.body {
                RoomBody::Data(payloads) => Self {
                    target_id: msg.room,
                    is_user: Some(false),
                    contents: to_contents(payloads),
                    message_type: Some(MessageKind::Data.to_wire()),
                    notify_message: None,
                    sender_id: msg.sender,
                },
                RoomBody::Notify(event) => Self {
                    target_id: msg.room,
                    is_user: Some(false),
                    contents: Vec::new(),
                    message_type: Some(MessageKind::Notify.to_wire()),
                    notify_message: Some(NotifyMessage {
                        notify_type: event.kind.to_wire(),
                        operator_id: event.operator,
                    }),
                    sender_id: msg.sender,
                },
            },
        }
    }
}
