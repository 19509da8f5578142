//! Transport boundary between the connection manager and the wire.
//!
//! The manager needs a message-framed, full-duplex channel that neither
//! drops nor duplicates frames. A [`Connector`] starts establishing one and
//! immediately hands back:
//!
//! - an outbound [`Transport`] handle (`transmit` / `shutdown`), and
//! - a stream of inbound [`TransportEvent`]s (`Opened`, `Frame`, `Closed`).
//!
//! ```text
//! ┌─────────────────────┐   TransportEvent stream   ┌─────────────────┐
//! │  ConnectionManager  │ ◄──────────────────────── │   Connector /   │
//! │                     │ ────────────────────────► │   Transport     │
//! └─────────────────────┘   transmit / shutdown     └─────────────────┘
//! ```
//!
//! Two implementations ship with the crate:
//!
//! - [`TcpConnector`]: `tcp://host:port` with Content-Length framing
//! - [`ChannelConnector`]: in-process peer, for embedding and tests

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::ServerAddress;
use crate::error::ClientError;

mod channel;
pub mod framing;
mod tcp;

pub use channel::{ChannelConnector, RemotePeer};
pub use tcp::TcpConnector;

/// Close code for a normal, requested shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when the connection drops without a shutdown.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Notifications flowing from the transport to the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is established.
    Opened,
    /// One complete inbound frame.
    Frame(String),
    /// The connection is gone; no further events follow.
    Closed { code: u16, reason: String },
}

/// Commands flowing from the manager to a transport's writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(String),
    Shutdown { code: u16, reason: String },
}

/// Receiving side of a transport's event stream.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Outbound half of an established (or establishing) connection.
///
/// Both operations enqueue and return immediately.
pub trait Transport: Send + Sync {
    fn transmit(&self, frame: String) -> Result<(), ClientError>;

    fn shutdown(&self, code: u16, reason: &str) -> Result<(), ClientError>;
}

/// Starts connections.
pub trait Connector: Send + Sync {
    /// Begin connecting to `address`.
    ///
    /// Must not block; the open acknowledgment is delivered later as
    /// [`TransportEvent::Opened`].
    fn connect(
        &self,
        address: &ServerAddress,
    ) -> Result<(Arc<dyn Transport>, TransportEvents), ClientError>;
}

/// Transport handle that forwards commands to a writer over a channel.
struct QueuedTransport {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl Transport for QueuedTransport {
    fn transmit(&self, frame: String) -> Result<(), ClientError> {
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| ClientError::Transport("Connection writer has stopped".to_string()))
    }

    fn shutdown(&self, code: u16, reason: &str) -> Result<(), ClientError> {
        self.outbound
            .send(Outbound::Shutdown {
                code,
                reason: reason.to_string(),
            })
            .map_err(|_| ClientError::Transport("Connection writer has stopped".to_string()))
    }
}
