//! Parley multi-identity simulator.
//!
//! # Usage
//!
//! ```bash
//! # Connect identities 1, 2 and 3 and put them all in room 7
//! parley-sim --identities 1,2,3 --room 7
//!
//! # Then type lines on stdin:
//! #   1 hello room        (room message from 1)
//! #   2 @3 hi there       (direct message from 2 to 3)
//! ```

use std::time::Duration;

use clap::Parser;
use parley_client::{
    ClientConfig, HttpRoomDirectory, Runtime, RuntimeHandle, SystemEnv, Update,
    sim::{SimCommand, parse_line},
};
use parley_core::{Endpoint, IdentityId, RoomId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Drive several chat identities against one backend
#[derive(Parser, Debug)]
#[command(name = "parley-sim")]
#[command(about = "Multi-identity chat sync simulator")]
#[command(version)]
struct Args {
    /// Websocket endpoint
    #[arg(long, default_value = "ws://localhost:8081/ws")]
    endpoint: String,

    /// Room directory base URL
    #[arg(long, default_value = "http://localhost:8080")]
    api: String,

    /// Identities to connect
    #[arg(long, value_delimiter = ',', required = true)]
    identities: Vec<IdentityId>,

    /// Room every identity joins after connecting
    #[arg(long)]
    room: Option<RoomId>,

    /// Echo reconciliation window in milliseconds
    #[arg(long, default_value = "5000")]
    lookback_ms: u64,

    /// Member list polling interval in milliseconds (0 disables polling)
    #[arg(long, default_value = "0")]
    poll_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = ClientConfig {
        endpoint: Endpoint::parse(args.endpoint)?,
        api_base: args.api,
        lookback: Duration::from_millis(args.lookback_ms),
        member_poll_interval: (args.poll_ms > 0).then(|| Duration::from_millis(args.poll_ms)),
        ..Default::default()
    };

    tracing::info!("Parley simulator starting");
    tracing::info!("Websocket endpoint {}, directory {}", config.endpoint, config.api_base);

    let directory = HttpRoomDirectory::new(config.api_base.clone());
    let (handle, runtime) = Runtime::spawn(SystemEnv::new(), directory, config);

    let watcher = tokio::spawn(log_updates(handle.clone()));

    for &identity in &args.identities {
        if let Err(e) = handle.connect(identity).await {
            tracing::error!(identity, "connect failed: {e}");
            continue;
        }
        let Some(room) = args.room else { continue };
        if let Err(e) = handle.join_room(room, identity).await {
            tracing::error!(identity, room, "join failed: {e}");
        }
    }

    tokio::select! {
        result = read_commands(&handle, args.room) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
    }

    for &identity in &args.identities {
        handle.disconnect(identity).await?;
    }
    handle.shutdown().await?;
    runtime.await?;
    watcher.abort();

    Ok(())
}

async fn read_commands(
    handle: &RuntimeHandle<std::time::Instant>,
    room: Option<RoomId>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let result = match parse_line(&line) {
            Ok(SimCommand::Room { identity, text }) => match room {
                Some(room) => handle.send_room(identity, room, text).await,
                None => {
                    tracing::warn!("no --room given; use `<id> @<target> <text>`");
                    continue;
                },
            },
            Ok(SimCommand::Direct { from, to, text }) => handle.send_direct(from, to, text).await,
            Err(e) => {
                tracing::warn!("ignoring line: {e}");
                continue;
            },
        };

        if let Err(e) = result {
            tracing::warn!("send failed: {e}");
        }
    }

    Ok(())
}

async fn log_updates(handle: RuntimeHandle<std::time::Instant>) {
    let mut updates = handle.subscribe();

    loop {
        let update = match updates.recv().await {
            Ok(update) => update,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "update stream lagged");
                continue;
            },
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };

        match update {
            Update::Status { identity, state } => tracing::info!(identity, ?state, "status"),
            Update::Room { room } => {
                let Ok(history) = handle.history(room).await else { break };
                let Ok(members) = handle.members(room).await else { break };
                if let Some(last) = history.last() {
                    tracing::info!(room, ?members, "[{}] {}", last.nickname, last.text);
                }
            },
            Update::Inbox { identity } => {
                let Ok(inbox) = handle.inbox(identity).await else { break };
                if let Some(last) = inbox.last() {
                    tracing::info!(
                        identity,
                        peer = ?last.peer,
                        direction = ?last.direction,
                        "{}",
                        last.text
                    );
                }
            },
        }
    }
}
