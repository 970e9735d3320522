//! Websocket transport.
//!
//! One task per identity connection, bridging a tokio-tungstenite socket to
//! channels. This is a thin layer that only moves bytes; every decision about
//! what they mean stays in the Sans-IO engine.
//!
//! All sockets report into one shared event channel so the runtime can
//! serialize their callbacks. Every report carries the [`ConnectionId`] it was
//! spawned with; the engine discards reports from superseded attempts.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parley_core::{CloseReason, ConnectionId, IdentityId, Incoming};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::TransmitError;

/// What happened on a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake completed
    Opened,
    /// Data message received
    Payload(Incoming),
    /// Socket is gone. Always the last event of a socket
    Closed(CloseReason),
}

/// A [`TransportEvent`] tagged with the socket it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    /// Owning identity
    pub identity: IdentityId,
    /// Transport attempt
    pub connection: ConnectionId,
    /// Event
    pub event: TransportEvent,
}

/// Handle to one running socket task.
///
/// Dropping the handle (or calling [`Socket::close`]) closes the socket
/// gracefully once queued writes have gone out.
#[derive(Debug)]
pub struct Socket {
    connection: ConnectionId,
    outbound: mpsc::Sender<Bytes>,
}

impl Socket {
    pub(crate) fn new(connection: ConnectionId, outbound: mpsc::Sender<Bytes>) -> Self {
        Self { connection, outbound }
    }

    /// Transport attempt this socket belongs to.
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Queue one binary message.
    ///
    /// # Errors
    ///
    /// The message is dropped if the socket task is gone
    /// (`TransmitError::Closed`) or its queue is full (`TransmitError::Full`).
    pub fn transmit(&self, bytes: Bytes) -> Result<(), TransmitError> {
        self.outbound.try_send(bytes).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransmitError::Full,
            mpsc::error::TrySendError::Closed(_) => TransmitError::Closed,
        })
    }

    /// Close after flushing queued writes.
    pub fn close(self) {
        drop(self.outbound);
    }
}

/// Spawn a socket task connecting `identity` to `url`.
///
/// Reports `Opened` once the handshake completes, one `Payload` per data
/// message, and exactly one `Closed` at the end.
pub fn spawn_socket(
    identity: IdentityId,
    connection: ConnectionId,
    url: String,
    events: mpsc::Sender<TransportMessage>,
    capacity: usize,
) -> Socket {
    let (outbound_tx, outbound_rx) = mpsc::channel::<Bytes>(capacity.max(1));
    let reporter = Reporter { identity, connection, events };

    tokio::spawn(run_socket(url, outbound_rx, reporter));

    Socket::new(connection, outbound_tx)
}

struct Reporter {
    identity: IdentityId,
    connection: ConnectionId,
    events: mpsc::Sender<TransportMessage>,
}

impl Reporter {
    async fn report(&self, event: TransportEvent) -> bool {
        let message =
            TransportMessage { identity: self.identity, connection: self.connection, event };
        self.events.send(message).await.is_ok()
    }
}

async fn run_socket(url: String, mut outbound: mpsc::Receiver<Bytes>, reporter: Reporter) {
    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _response)) => ws,
        Err(e) => {
            tracing::debug!(identity = reporter.identity, %url, "websocket handshake failed: {e}");
            reporter.report(TransportEvent::Closed(CloseReason::Transport(e.to_string()))).await;
            return;
        },
    };

    if !reporter.report(TransportEvent::Opened).await {
        return;
    }

    let (mut sink, mut stream) = ws.split();

    let reason = loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(bytes) => {
                    if let Err(e) = sink.send(Message::Binary(bytes)).await {
                        break CloseReason::Transport(e.to_string());
                    }
                },
                None => {
                    // Close frame is best effort; the peer may already be gone
                    let _ = sink.send(Message::Close(None)).await;
                    break CloseReason::Local;
                },
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Binary(bytes))) => {
                    if !reporter.report(TransportEvent::Payload(Incoming::Binary(bytes))).await {
                        return;
                    }
                },
                Some(Ok(Message::Text(text))) => {
                    let payload = Incoming::Text(text.as_str().to_owned());
                    if !reporter.report(TransportEvent::Payload(payload)).await {
                        return;
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map(|f| f.reason.as_str().to_owned()).unwrap_or_default();
                    break CloseReason::Peer(reason);
                },
                // Pings are answered by tungstenite on the next write
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {},
                Some(Err(e)) => break CloseReason::Transport(e.to_string()),
                None => break CloseReason::Peer(String::new()),
            },
        }
    };

    tracing::debug!(
        identity = reporter.identity,
        connection = %reporter.connection,
        "socket finished: {reason}"
    );
    reporter.report(TransportEvent::Closed(reason)).await;
}
