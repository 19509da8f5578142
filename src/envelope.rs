//! Correlated message envelopes exchanged with the GameServer.
//!
//! Every frame on the wire is a JSON object carrying at least a
//! `message_id`, a `type` and an `action`; the remaining fields depend on the
//! action and are omitted when unset:
//!
//! ```text
//! {"message_id":"k3j9x0qa","type":"request","action":"enter_game","game_id":"lobby-1"}
//! ```

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Correlation id linking a request to its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl Borrow<str> for MessageId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Envelope kind, serialized as the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Request,
    Response,
    Error,
    Authenticate,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Request => "request",
            MessageKind::Response => "response",
            MessageKind::Error => "error",
            MessageKind::Authenticate => "authenticate",
        }
    }
}

/// Domain verb carried by an envelope.
///
/// Includes `Unknown` so a server speaking a newer protocol does not make
/// whole frames undecodable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Login,
    LoginGuest,
    Register,
    SignOut,
    /// Fetch a named value from the server.
    Value,
    /// Resume a session with a persisted token.
    SessionAuth,
    EnterGame,
    CreateGame,
    /// Forward-compatible fallback for unknown actions
    #[serde(other)]
    Unknown,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Login => "login",
            Action::LoginGuest => "login_guest",
            Action::Register => "register",
            Action::SignOut => "sign_out",
            Action::Value => "value",
            Action::SessionAuth => "session_auth",
            Action::EnterGame => "enter_game",
            Action::CreateGame => "create_game",
            Action::Unknown => "unknown",
        }
    }
}

/// A single correlated message unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: MessageId,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub action: Action,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,
    /// Arbitrary payload for `value` requests and their responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Envelope {
    /// Create an envelope with no payload fields set.
    ///
    /// Ids normally come from [`ConnectionManager::build_envelope`], which
    /// checks them against the pending set.
    ///
    /// [`ConnectionManager::build_envelope`]: crate::client::ConnectionManager::build_envelope
    pub fn new(message_id: MessageId, kind: MessageKind, action: Action) -> Self {
        Self {
            message_id,
            kind,
            action,
            username: None,
            password: None,
            session_id: None,
            game_id: None,
            value: None,
            error_message: None,
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == MessageKind::Error
    }

    /// Serialize to a JSON frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a JSON frame.
    pub fn from_frame(frame: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(frame)
    }
}
