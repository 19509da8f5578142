//! GameServer Client Library
//!
//! Turns a message-framed duplex connection into a request/response model
//! with correlation ids, deadlines and session resumption:
//!
//! - `envelope` - Wire message schema (id, kind, action, payload)
//! - `ids` - Collision-checked correlation id generation
//! - `pending` - In-flight request table and the caller-facing `Waiter`
//! - `dispatch` - Typed publish/subscribe for connection-wide events
//! - `client` - `ConnectionManager`, tying the pieces to a transport
//! - `transport` - Transport boundary plus TCP and in-process implementations
//! - `config` - Server address properties
//! - `session` - Session token persistence
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use gameserver_client::{Channel, ConnectionManager, FileSessionStore, TcpConnector};
//!
//! let store = FileSessionStore::open(default_session_path())?;
//! let manager = ConnectionManager::new(Arc::new(TcpConnector), Arc::new(store));
//! manager.load_config(Path::new("gameserver.properties")).await?;
//!
//! let opened = manager.next_event(Channel::Open);
//! manager.open_configured()?;
//! opened.await?;
//!
//! manager.login("alice", "hunter2").await?;
//! let game = manager.create_game().await?;
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod client;
pub mod config;
pub mod dispatch;
pub mod envelope;
pub mod error;
pub mod ids;
pub mod pending;
pub mod session;
pub mod transport;

pub use client::{ConnectionManager, ConnectionState};
pub use config::{ClientOptions, ServerAddress};
pub use dispatch::{Channel, Event, EventDispatcher, SubscriptionHandle};
pub use envelope::{Action, Envelope, MessageId, MessageKind};
pub use error::ClientError;
pub use pending::{PendingTable, Waiter, DEFAULT_REQUEST_TIMEOUT};
pub use session::{default_session_path, FileSessionStore, MemorySessionStore, SessionStore};
pub use transport::{ChannelConnector, Connector, RemotePeer, TcpConnector, Transport, TransportEvent};

/// Lock a mutex, recovering the data if a panicking holder poisoned it.
///
/// Every critical section in this crate leaves its data consistent before
/// any code that could panic runs.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
