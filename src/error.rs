//! Error types surfaced by the GameServer client.
//!
//! Every request failure reaches the caller through the rejected [`Waiter`],
//! so these variants carry enough context to be acted on without logs.
//!
//! [`Waiter`]: crate::pending::Waiter

use thiserror::Error;

use crate::envelope::{Envelope, MessageId};

/// Client-side error types.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A request was attempted while the connection was not open.
    #[error("Not connected to server")]
    NotConnected,

    /// No response arrived before the request deadline.
    #[error("Message time out: {0}")]
    Timeout(MessageId),

    /// The server answered with an error-kind envelope.
    #[error("Server error: {}", .0.error_message.as_deref().unwrap_or("<no message>"))]
    RemoteError(Box<Envelope>),

    /// Correlation id generation ran out of attempts.
    #[error("Could not generate a unique message id after {attempts} attempts")]
    IdExhaustion {
        /// Number of candidates tried
        attempts: usize,
    },

    /// `open` was called on a connection that is connecting or open.
    #[error("Connection is already connecting or open")]
    AlreadyConnected,

    /// No server address has been configured yet.
    #[error("No server address configured; load a config first")]
    NotReady,

    /// A pending entry already exists for this id.
    #[error("Message id already pending: {0}")]
    DuplicateId(MessageId),

    /// The transport failed to carry a frame or to shut down.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A frame could not be encoded or decoded.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration is missing or malformed.
    #[error("Config error: {0}")]
    Config(String),

    /// I/O error while reading config or persisting the session.
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),
}

impl ClientError {
    /// Returns the remote envelope for [`ClientError::RemoteError`].
    pub fn remote_envelope(&self) -> Option<&Envelope> {
        match self {
            ClientError::RemoteError(envelope) => Some(envelope),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Io(err)
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Protocol(err.to_string())
    }
}
