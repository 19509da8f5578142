//! TCP transport with Content-Length framing.
//!
//! `connect` spawns a connection task and returns at once. The task reports
//! `Opened` once the socket is up, then runs a reader task (frames in) next
//! to a writer loop (frames out). Whichever side ends the connection first
//! reports `Closed`; it is reported exactly once.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use super::framing::{read_frame, write_frame};
use super::{
    Connector, Outbound, QueuedTransport, Transport, TransportEvent, TransportEvents,
    ABNORMAL_CLOSURE, NORMAL_CLOSURE,
};
use crate::config::ServerAddress;
use crate::error::ClientError;

/// Scheme accepted by [`TcpConnector`].
pub const TCP_PROTOCOL: &str = "tcp";

/// Connector for `tcp://host:port` addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(
        &self,
        address: &ServerAddress,
    ) -> Result<(Arc<dyn Transport>, TransportEvents), ClientError> {
        if !address.protocol.eq_ignore_ascii_case(TCP_PROTOCOL) {
            return Err(ClientError::Config(format!(
                "Unsupported protocol '{}' (expected '{}')",
                address.protocol, TCP_PROTOCOL
            )));
        }

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let target = format!("{}:{}", address.host, address.port);

        tokio::spawn(run_connection(target, outbound_rx, event_tx));

        let transport = QueuedTransport {
            outbound: outbound_tx,
        };
        Ok((Arc::new(transport), event_rx))
    }
}

/// Reports `Closed` the first time it is called for a connection.
#[derive(Clone)]
struct CloseReporter {
    events: mpsc::UnboundedSender<TransportEvent>,
    closed: Arc<AtomicBool>,
}

impl CloseReporter {
    fn report(&self, code: u16, reason: impl Into<String>) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(TransportEvent::Closed {
                code,
                reason: reason.into(),
            });
        }
    }
}

async fn run_connection(
    target: String,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let reporter = CloseReporter {
        events: events.clone(),
        closed: Arc::new(AtomicBool::new(false)),
    };

    let stream = match TcpStream::connect(&target).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(target = %target, error = %e, "TCP connect failed");
            reporter.report(ABNORMAL_CLOSURE, format!("Connection failed: {}", e));
            return;
        }
    };
    debug!(target = %target, "TCP connection established");
    let _ = events.send(TransportEvent::Opened);

    let (read_half, write_half) = stream.into_split();
    let reader = tokio::spawn(read_loop(
        BufReader::new(read_half),
        events,
        reporter.clone(),
    ));

    write_loop(write_half, outbound, reporter, reader.abort_handle()).await;
}

async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    events: mpsc::UnboundedSender<TransportEvent>,
    reporter: CloseReporter,
) {
    loop {
        match read_frame(&mut reader).await {
            Ok(Some(frame)) => {
                if events.send(TransportEvent::Frame(frame)).is_err() {
                    // Nobody is listening anymore
                    return;
                }
            }
            Ok(None) => {
                reporter.report(ABNORMAL_CLOSURE, "Connection closed by server");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to read frame");
                reporter.report(ABNORMAL_CLOSURE, e.to_string());
                return;
            }
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    reporter: CloseReporter,
    reader: AbortHandle,
) {
    while let Some(command) = outbound.recv().await {
        match command {
            Outbound::Frame(frame) => {
                if let Err(e) = write_frame(&mut writer, &frame).await {
                    warn!(error = %e, "Failed to write frame");
                    reader.abort();
                    reporter.report(ABNORMAL_CLOSURE, e.to_string());
                    return;
                }
            }
            Outbound::Shutdown { code, reason } => {
                let _ = writer.shutdown().await;
                reader.abort();
                reporter.report(code, reason);
                return;
            }
        }
    }

    // Every transport handle was dropped
    let _ = writer.shutdown().await;
    reader.abort();
    reporter.report(NORMAL_CLOSURE, "Transport released");
}
