//! Parley core
//!
//! Pure, I/O-free state machines for a client that drives many simulated
//! identities against one chat backend at once.
//!
//! # Architecture
//!
//! Everything here follows the Sans-IO action pattern: methods take events
//! (and the current time) and return actions for the caller to execute. No
//! sockets, no timers, no tasks. The [`Engine`] is the single owner of all
//! state and the only type a driver needs to talk to.
//!
//! # Components
//!
//! - [`Connection`]: lifecycle of one identity's websocket
//! - [`ConnectionRegistry`]: at most one live connection per identity
//! - [`RoomStore`]: membership belief and chat history per room
//! - [`Router`]: classifies decoded frames and dispatches them
//! - [`Reconciler`]: folds echoed broadcasts into optimistic entries
//! - [`Inbox`]: per-identity direct messages
//! - [`Engine`]: owns all of the above behind an event/action interface

#![forbid(unsafe_code)]

pub mod connection;
mod engine;
pub mod env;
pub mod error;
mod event;
pub mod inbox;
pub mod reconciler;
pub mod registry;
pub mod rooms;
pub mod router;

pub use connection::{
    CloseReason, Connection, ConnectionAction, ConnectionId, ConnectionState, Endpoint, Inbound,
    Incoming,
};
pub use engine::{Engine, EngineConfig};
pub use env::Environment;
pub use error::{ConnectionError, EngineError, RegistryError};
pub use event::{EngineAction, EngineEvent, LogLevel};
pub use inbox::{Direction, Inbox, InboxEntry};
pub use parley_proto::{IdentityId, RoomId};
pub use reconciler::{DEFAULT_LOOKBACK, Reconciler, Reconciliation};
pub use registry::{ConnectionRegistry, Presence};
pub use rooms::{EntryOrigin, LogEntry, RoomInfo, RoomStatus, RoomStore, Sender, Unit};
pub use router::{RouteStats, Routed, Router};
