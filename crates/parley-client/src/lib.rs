//! Parley client
//!
//! Drives the Sans-IO [`parley_core::Engine`] against a real backend: one
//! websocket per identity, REST calls to the room directory, and a single
//! dispatcher task tying them together.
//!
//! # Components
//!
//! - [`Runtime`] / [`RuntimeHandle`]: dispatcher loop and its async API
//! - [`transport`]: tokio-tungstenite socket tasks
//! - [`RoomDirectory`] / [`HttpRoomDirectory`]: room management over REST
//! - [`SystemEnv`]: production clock
//! - [`sim`]: line commands for the `parley-sim` binary

#![forbid(unsafe_code)]

mod config;
pub mod directory;
mod error;
mod runtime;
pub mod sim;
mod system_env;
pub mod transport;

pub use config::{ClientConfig, DEFAULT_API_BASE};
pub use directory::{HttpRoomDirectory, RoomDirectory, RoomSummary};
pub use error::{ClientError, DirectoryError, TransmitError};
pub use runtime::{Runtime, RuntimeHandle, Update};
pub use system_env::SystemEnv;
