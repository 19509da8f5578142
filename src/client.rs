//! Connection manager: lifecycle, request correlation and event dispatch.
//!
//! `ConnectionManager` owns the transport handle and the connection state,
//! and bridges both directions:
//!
//! - Outbound: build an envelope with a fresh id, register it in the pending
//!   table, transmit it, publish `send`, hand the caller a [`Waiter`].
//! - Inbound: decode the frame, settle the matching pending entry, then
//!   publish `message` (or `error` for error-kind envelopes).
//!
//! One reader task consumes all transport events of a connection in arrival
//! order, so a frame's dispatch completes before the next frame is read.
//!
//! # Connection Lifecycle
//!
//! ```text
//! Disconnected ──open()──► Connecting ──Opened──► Open ──close()/Closed──► Closed
//!                                                                  │
//!            ◄────────────────────── open() ───────────────────────┘
//! ```
//!
//! When a session token is stored, `Opened` triggers a session-authenticate
//! request, and the `open` event is published only after it settles.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use gameserver_client::{Channel, ConnectionManager, MemorySessionStore, TcpConnector};
//!
//! let manager = ConnectionManager::new(Arc::new(TcpConnector), Arc::new(MemorySessionStore::new()));
//! let opened = manager.next_event(Channel::Open);
//! manager.open("tcp://127.0.0.1:4800")?;
//! opened.await?;
//!
//! let response = manager.get_value("high_score").await?;
//! ```

use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ClientOptions, ServerAddress};
use crate::dispatch::{Channel, Event, EventDispatcher, SubscriptionHandle};
use crate::envelope::{Action, Envelope, MessageKind};
use crate::error::ClientError;
use crate::ids::IdGenerator;
use crate::lock_unpoisoned;
use crate::pending::{Outcome, PendingTable, SettleHook, Waiter};
use crate::session::{SessionStore, SESSION_TOKEN_KEY};
use crate::transport::{Connector, Transport, TransportEvent, TransportEvents};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closed,
}

/// The live transport link and its bookkeeping.
struct Link {
    state: ConnectionState,
    /// Bumped on every `open`; events from older connections are ignored.
    generation: u64,
    transport: Option<Arc<dyn Transport>>,
    reader: Option<JoinHandle<()>>,
}

struct Shared {
    connector: Arc<dyn Connector>,
    store: Arc<dyn SessionStore>,
    options: ClientOptions,
    pending: PendingTable,
    dispatcher: EventDispatcher,
    ids: Mutex<IdGenerator>,
    link: Mutex<Link>,
    address: Mutex<Option<ServerAddress>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let link = self.link.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(reader) = link.reader.take() {
            reader.abort();
        }
    }
}

/// Request/response client over one logical connection.
///
/// Cloning is cheap and yields another handle to the same connection.
/// Independent connections are independent `ConnectionManager::new` calls.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, store: Arc<dyn SessionStore>) -> Self {
        Self::with_options(connector, store, ClientOptions::default())
    }

    pub fn with_options(
        connector: Arc<dyn Connector>,
        store: Arc<dyn SessionStore>,
        options: ClientOptions,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                connector,
                store,
                options,
                pending: PendingTable::new(),
                dispatcher: EventDispatcher::new(),
                ids: Mutex::new(IdGenerator::new()),
                link: Mutex::new(Link {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                    transport: None,
                    reader: None,
                }),
                address: Mutex::new(None),
            }),
        }
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Load the server address from a properties file and publish `ready`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Io` if the file cannot be read, or
    /// `ClientError::Config` if the `server.*` keys are missing or invalid.
    pub async fn load_config(&self, path: &std::path::Path) -> Result<ServerAddress, ClientError> {
        let address = ServerAddress::load(path).await?;
        self.set_address(address.clone());
        Ok(address)
    }

    /// Use `address` for [`open_configured`](Self::open_configured) and publish `ready`.
    pub fn set_address(&self, address: ServerAddress) {
        info!(address = %address, "Server address configured");
        *lock_unpoisoned(&self.shared.address) = Some(address.clone());
        self.shared.dispatcher.publish(&Event::Ready(address));
    }

    pub fn address(&self) -> Option<ServerAddress> {
        lock_unpoisoned(&self.shared.address).clone()
    }

    // =========================================================================
    // Events
    // =========================================================================

    pub fn subscribe<F>(&self, channel: Channel, listener: F) -> SubscriptionHandle
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.shared.dispatcher.subscribe(channel, listener)
    }

    pub fn subscribe_once<F>(&self, channel: Channel, listener: F) -> SubscriptionHandle
    where
        F: FnOnce(&Event) + Send + 'static,
    {
        self.shared.dispatcher.subscribe_once(channel, listener)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.shared.dispatcher.unsubscribe(handle)
    }

    /// Receive the next event published on `channel`.
    ///
    /// Subscribes immediately, so call it before triggering the event.
    pub fn next_event(&self, channel: Channel) -> oneshot::Receiver<Event> {
        let (tx, rx) = oneshot::channel();
        self.shared.dispatcher.subscribe_once(channel, move |event| {
            let _ = tx.send(event.clone());
        });
        rx
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn state(&self) -> ConnectionState {
        lock_unpoisoned(&self.shared.link).state
    }

    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Number of requests still awaiting a response or deadline.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Start connecting to a `protocol://host:port` address.
    ///
    /// Returns once the connection attempt has started; `open` is published
    /// when it is established (and any session resumption has settled).
    ///
    /// # Errors
    ///
    /// Returns `ClientError::AlreadyConnected` if connecting or open,
    /// `ClientError::Config` for a malformed address, or the connector's
    /// error if the attempt cannot be started.
    pub fn open(&self, address: &str) -> Result<(), ClientError> {
        self.open_address(ServerAddress::parse(address)?)
    }

    /// Open the address loaded by [`load_config`](Self::load_config).
    ///
    /// # Errors
    ///
    /// Returns `ClientError::NotReady` if no address was configured.
    pub fn open_configured(&self) -> Result<(), ClientError> {
        let address = self.address().ok_or(ClientError::NotReady)?;
        self.open_address(address)
    }

    fn open_address(&self, address: ServerAddress) -> Result<(), ClientError> {
        let mut link = lock_unpoisoned(&self.shared.link);
        if matches!(
            link.state,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            return Err(ClientError::AlreadyConnected);
        }

        link.generation += 1;
        let generation = link.generation;
        link.state = ConnectionState::Connecting;
        info!(address = %address, "Connecting");

        let (transport, events) = match self.shared.connector.connect(&address) {
            Ok(connection) => connection,
            Err(e) => {
                warn!(address = %address, error = %e, "Failed to start connection");
                link.state = ConnectionState::Closed;
                return Err(e);
            }
        };

        link.transport = Some(transport);
        // A previous reader keeps draining until its own `Closed`
        link.reader = Some(tokio::spawn(run_events(
            Arc::downgrade(&self.shared),
            generation,
            events,
        )));
        Ok(())
    }

    /// Request transport shutdown.
    ///
    /// Still-pending requests are not rejected here; each runs to its own
    /// deadline. `close` is published when the transport reports the close.
    /// If session resumption was still in flight, its `open` is never
    /// published.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Transport` if the shutdown could not be queued.
    pub fn close(&self, code: u16, reason: &str) -> Result<(), ClientError> {
        let transport = {
            let mut link = lock_unpoisoned(&self.shared.link);
            match link.state {
                ConnectionState::Connecting | ConnectionState::Open => {
                    link.state = ConnectionState::Closed;
                    link.transport.take()
                }
                _ => None,
            }
        };

        match transport {
            Some(transport) => {
                info!(code, reason, "Closing connection");
                transport.shutdown(code, reason)
            }
            None => Ok(()),
        }
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Build an envelope with a fresh id and no payload fields.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::IdExhaustion` if no unused id could be generated.
    pub fn build_envelope(&self, kind: MessageKind, action: Action) -> Result<Envelope, ClientError> {
        let pending = &self.shared.pending;
        let id = lock_unpoisoned(&self.shared.ids).next_id(|candidate| pending.contains(candidate))?;
        Ok(Envelope::new(id, kind, action))
    }

    /// Transmit `envelope` and return a waiter for its response.
    ///
    /// Fails fast: when the connection is not open the returned waiter is
    /// already rejected with `NotConnected` and nothing is registered.
    pub fn send(&self, envelope: Envelope) -> Waiter {
        self.send_with(envelope, None)
    }

    fn send_with(&self, envelope: Envelope, on_settle: Option<SettleHook>) -> Waiter {
        let transport = {
            let link = lock_unpoisoned(&self.shared.link);
            if link.state == ConnectionState::Open {
                link.transport.clone()
            } else {
                None
            }
        };
        let Some(transport) = transport else {
            debug!(message_id = %envelope.message_id, "Send while not connected");
            return Waiter::failed(ClientError::NotConnected);
        };

        let frame = match envelope.to_frame() {
            Ok(frame) => frame,
            Err(e) => return Waiter::failed(e.into()),
        };

        let id = envelope.message_id.clone();
        let waiter = match self.shared.pending.register_with(
            id.clone(),
            self.shared.options.request_timeout,
            on_settle,
        ) {
            Ok(waiter) => waiter,
            Err(e) => return Waiter::failed(e),
        };

        if let Err(e) = transport.transmit(frame) {
            warn!(message_id = %id, error = %e, "Failed to transmit");
            self.shared.pending.reject(id.as_str(), e);
            return waiter;
        }

        debug!(
            message_id = %id,
            kind = envelope.kind.as_str(),
            action = envelope.action.as_str(),
            "Sent"
        );
        self.shared.dispatcher.publish(&Event::Send(envelope));
        waiter
    }

    fn request<F>(
        &self,
        kind: MessageKind,
        action: Action,
        fill: F,
        on_settle: Option<SettleHook>,
    ) -> Waiter
    where
        F: FnOnce(&mut Envelope),
    {
        match self.build_envelope(kind, action) {
            Ok(mut envelope) => {
                fill(&mut envelope);
                self.send_with(envelope, on_settle)
            }
            Err(e) => Waiter::failed(e),
        }
    }

    /// Authenticate with credentials.
    ///
    /// A successful response's `session_id` is persisted as the session
    /// token even if the returned waiter is dropped. Persistence failures are
    /// logged and never affect the waiter.
    pub fn authenticate(&self, username: &str, password: &str, action: Action) -> Waiter {
        self.request(
            MessageKind::Authenticate,
            action,
            |envelope| {
                envelope.username = Some(username.to_string());
                envelope.password = Some(password.to_string());
            },
            Some(self.persist_session_hook()),
        )
    }

    pub fn login(&self, username: &str, password: &str) -> Waiter {
        self.authenticate(username, password, Action::Login)
    }

    pub fn register(&self, username: &str, password: &str) -> Waiter {
        self.authenticate(username, password, Action::Register)
    }

    /// Log in as a guest (empty password).
    pub fn login_guest(&self, username: &str) -> Waiter {
        self.authenticate(username, "", Action::LoginGuest)
    }

    pub fn enter_game(&self, game_id: &str) -> Waiter {
        self.request(
            MessageKind::Request,
            Action::EnterGame,
            |envelope| envelope.game_id = Some(game_id.to_string()),
            None,
        )
    }

    pub fn create_game(&self) -> Waiter {
        self.request(MessageKind::Request, Action::CreateGame, |_| {}, None)
    }

    /// Request a value from the server.
    pub fn get_value(&self, value: impl Into<serde_json::Value>) -> Waiter {
        let value = value.into();
        self.request(
            MessageKind::Request,
            Action::Value,
            |envelope| envelope.value = Some(value),
            None,
        )
    }

    /// Sign out.
    ///
    /// `sign-out` is published once the exchange settles, whatever its
    /// outcome; on success the stored session token is dropped.
    pub fn sign_out(&self) -> Waiter {
        let shared = Arc::downgrade(&self.shared);
        let hook: SettleHook = Box::new(move |outcome: &Outcome| {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            if outcome.is_ok() {
                if let Err(e) = shared.store.remove(SESSION_TOKEN_KEY) {
                    warn!(error = %e, "Failed to clear session token");
                }
            }
            shared.dispatcher.publish(&Event::SignOut);
        });

        self.request(MessageKind::Request, Action::SignOut, |_| {}, Some(hook))
    }

    fn session_authenticate(&self, token: &str) -> Waiter {
        self.request(
            MessageKind::Authenticate,
            Action::SessionAuth,
            |envelope| envelope.session_id = Some(token.to_string()),
            Some(self.persist_session_hook()),
        )
    }

    fn persist_session_hook(&self) -> SettleHook {
        let store = Arc::clone(&self.shared.store);
        Box::new(move |outcome: &Outcome| {
            // Rejections belong to the request's own waiter
            let Ok(response) = outcome else {
                return;
            };
            let Some(token) = response.session_id.as_deref() else {
                debug!(message_id = %response.message_id, "Authentication response without session id");
                return;
            };
            if let Err(e) = store.set(SESSION_TOKEN_KEY, token) {
                warn!(error = %e, "Failed to persist session token");
            }
        })
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Returns `false` once this connection's event stream is finished.
    fn handle_transport_event(&self, generation: u64, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Opened => {
                self.on_opened(generation);
                true
            }
            TransportEvent::Frame(frame) => {
                self.on_frame(&frame);
                true
            }
            TransportEvent::Closed { code, reason } => {
                self.on_closed(generation, code, reason);
                false
            }
        }
    }

    fn on_opened(&self, generation: u64) {
        {
            let mut link = lock_unpoisoned(&self.shared.link);
            if link.generation != generation || link.state != ConnectionState::Connecting {
                warn!(generation, "Ignoring open acknowledgment for a stale connection");
                return;
            }
            link.state = ConnectionState::Open;
        }
        info!("Connection open");

        match self.shared.store.get(SESSION_TOKEN_KEY) {
            Some(token) => {
                debug!("Resuming session");
                let waiter = self.session_authenticate(&token);
                let manager = self.clone();
                tokio::spawn(async move {
                    if let Err(e) = waiter.await {
                        error!(error = %e, "Session resumption failed");
                    }
                    if !manager.is_current(generation) {
                        debug!(generation, "Connection closed during session resumption");
                        return;
                    }
                    manager.shared.dispatcher.publish(&Event::Open);
                });
            }
            None => {
                self.shared.dispatcher.publish(&Event::Open);
            }
        }
    }

    /// Whether `generation` is still the open connection.
    fn is_current(&self, generation: u64) -> bool {
        let link = lock_unpoisoned(&self.shared.link);
        link.generation == generation && link.state == ConnectionState::Open
    }

    fn on_frame(&self, frame: &str) {
        let envelope = match Envelope::from_frame(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable frame");
                return;
            }
        };

        let settled = self
            .shared
            .pending
            .settle(envelope.message_id.as_str(), envelope.clone());

        let event = if envelope.is_error() {
            error!(
                message_id = %envelope.message_id,
                action = envelope.action.as_str(),
                error = envelope.error_message.as_deref().unwrap_or("<no message>"),
                "GameServer error"
            );
            Event::Error(envelope)
        } else {
            debug!(message_id = %envelope.message_id, settled, "Received");
            Event::Message(envelope)
        };
        self.shared.dispatcher.publish(&event);
    }

    fn on_closed(&self, generation: u64, code: u16, reason: String) {
        {
            let mut link = lock_unpoisoned(&self.shared.link);
            if link.generation == generation {
                link.state = ConnectionState::Closed;
                link.transport = None;
            } else {
                debug!(generation, "Close of a superseded connection");
            }
        }
        info!(code, reason = %reason, "Connection closed");
        self.shared
            .dispatcher
            .publish(&Event::Close { code, reason });
    }
}

/// Consume one connection's transport events in arrival order.
async fn run_events(shared: Weak<Shared>, generation: u64, mut events: TransportEvents) {
    while let Some(event) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let manager = ConnectionManager { shared };
        if !manager.handle_transport_event(generation, event) {
            return;
        }
    }
}
