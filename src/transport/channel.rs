//! In-process transport.
//!
//! Each `connect` produces a [`RemotePeer`] on the connector's peer stream.
//! Whoever holds the peer plays the server: it acknowledges the open,
//! delivers frames, closes the connection, and reads what the client sent.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::{Connector, Outbound, Transport, TransportEvent, TransportEvents};
use crate::config::ServerAddress;
use crate::envelope::Envelope;
use crate::error::ClientError;

/// Connector whose connections terminate at in-process [`RemotePeer`]s.
#[derive(Debug, Clone)]
pub struct ChannelConnector {
    peers: mpsc::UnboundedSender<RemotePeer>,
}

impl ChannelConnector {
    /// Create a connector and the stream of peers it will produce.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RemotePeer>) {
        let (peers, peer_rx) = mpsc::unbounded_channel();
        (Self { peers }, peer_rx)
    }
}

impl Connector for ChannelConnector {
    fn connect(
        &self,
        address: &ServerAddress,
    ) -> Result<(Arc<dyn Transport>, TransportEvents), ClientError> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let peer = RemotePeer {
            address: address.clone(),
            events: event_tx.clone(),
            outbound: outbound_rx,
        };
        self.peers
            .send(peer)
            .map_err(|_| ClientError::Transport(format!("No peer listening at {}", address)))?;

        let transport = ChannelTransport {
            outbound: outbound_tx,
            events: event_tx,
        };
        Ok((Arc::new(transport), event_rx))
    }
}

/// Client-side handle; a shutdown is echoed back as `Closed`.
struct ChannelTransport {
    outbound: mpsc::UnboundedSender<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Transport for ChannelTransport {
    fn transmit(&self, frame: String) -> Result<(), ClientError> {
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| ClientError::Transport("Peer has gone away".to_string()))
    }

    fn shutdown(&self, code: u16, reason: &str) -> Result<(), ClientError> {
        let _ = self.outbound.send(Outbound::Shutdown {
            code,
            reason: reason.to_string(),
        });
        self.events
            .send(TransportEvent::Closed {
                code,
                reason: reason.to_string(),
            })
            .map_err(|_| ClientError::Transport("Connection already released".to_string()))
    }
}

/// Server side of one in-process connection.
#[derive(Debug)]
pub struct RemotePeer {
    address: ServerAddress,
    events: mpsc::UnboundedSender<TransportEvent>,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

impl RemotePeer {
    /// Address the client asked for.
    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    /// Acknowledge the open. Returns `false` if the client is gone.
    pub fn accept(&self) -> bool {
        self.events.send(TransportEvent::Opened).is_ok()
    }

    /// Deliver a raw inbound frame.
    pub fn deliver(&self, frame: impl Into<String>) -> bool {
        self.events.send(TransportEvent::Frame(frame.into())).is_ok()
    }

    /// Serialize and deliver an envelope.
    pub fn deliver_envelope(&self, envelope: &Envelope) -> bool {
        match envelope.to_frame() {
            Ok(frame) => self.deliver(frame),
            Err(_) => false,
        }
    }

    /// Close the connection from the server side.
    pub fn close(&self, code: u16, reason: &str) -> bool {
        self.events
            .send(TransportEvent::Closed {
                code,
                reason: reason.to_string(),
            })
            .is_ok()
    }

    /// Next command the client issued, in order.
    pub async fn next_outbound(&mut self) -> Option<Outbound> {
        self.outbound.recv().await
    }

    /// Next transmitted envelope. Returns `None` once the client shut down
    /// or dropped the connection.
    pub async fn next_envelope(&mut self) -> Option<Envelope> {
        loop {
            match self.outbound.recv().await? {
                Outbound::Frame(frame) => {
                    if let Ok(envelope) = Envelope::from_frame(&frame) {
                        return Some(envelope);
                    }
                }
                Outbound::Shutdown { .. } => return None,
            }
        }
    }
}
