//! Pending-request table and the caller-facing [`Waiter`].
//!
//! Each outstanding request owns one entry keyed by its [`MessageId`]. The
//! entry is removed by whichever comes first:
//!
//! - [`PendingTable::settle`] with a matching inbound envelope
//! - its deadline timer, which rejects the waiter with `Timeout(id)`
//!
//! Removal and completion happen together, so the waiter's continuation can
//! only ever fire once; a late response after a timeout (or a second settle)
//! finds no entry and is a no-op.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::envelope::{Envelope, MessageId};
use crate::error::ClientError;
use crate::lock_unpoisoned;

/// Default time a request may stay pending (5 seconds).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

/// Final outcome of a request.
pub type Outcome = Result<Envelope, ClientError>;

/// Continuation run once with the final outcome, before the waiter completes.
pub type SettleHook = Box<dyn FnOnce(&Outcome) + Send + 'static>;

type Entries = Mutex<HashMap<MessageId, PendingEntry>>;

struct PendingEntry {
    /// Distinguishes this registration from a later one reusing the id.
    seq: u64,
    created_at: Instant,
    deadline: Instant,
    tx: oneshot::Sender<Outcome>,
    on_settle: Option<SettleHook>,
    timer: Option<AbortHandle>,
}

impl PendingEntry {
    fn finish(self, outcome: Outcome) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        if let Some(hook) = self.on_settle {
            hook(&outcome);
        }
        // The caller may have dropped its waiter; nothing left to notify then.
        let _ = self.tx.send(outcome);
    }
}

/// Bookkeeping view of one pending entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingInfo {
    pub created_at: Instant,
    pub deadline: Instant,
}

/// Table of in-flight requests.
///
/// Registration spawns the deadline timer on the current tokio runtime, so
/// [`register`](Self::register) must be called from within one.
#[derive(Default)]
pub struct PendingTable {
    entries: Arc<Entries>,
    next_seq: AtomicU64,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and start its deadline timer.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::DuplicateId` if `id` is already pending.
    pub fn register(&self, id: MessageId, timeout: Duration) -> Result<Waiter, ClientError> {
        self.register_with(id, timeout, None)
    }

    /// Register `id` with an optional continuation run on settlement.
    ///
    /// The continuation sees the same outcome the waiter receives (match,
    /// remote error or timeout) and runs even if the waiter was dropped.
    pub fn register_with(
        &self,
        id: MessageId,
        timeout: Duration,
        on_settle: Option<SettleHook>,
    ) -> Result<Waiter, ClientError> {
        let created_at = Instant::now();
        let deadline = created_at + timeout;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let mut entries = lock_unpoisoned(&self.entries);
        if entries.contains_key(id.as_str()) {
            return Err(ClientError::DuplicateId(id));
        }

        let table: Weak<Entries> = Arc::downgrade(&self.entries);
        let timer_id = id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(entries) = table.upgrade() {
                expire(&entries, &timer_id, seq);
            }
        });

        entries.insert(
            id.clone(),
            PendingEntry {
                seq,
                created_at,
                deadline,
                tx,
                on_settle,
                timer: Some(timer.abort_handle()),
            },
        );
        debug!(message_id = %id, timeout_ms = timeout.as_millis() as u64, "registered pending request");

        Ok(Waiter::pending(id, rx))
    }

    /// Settle the entry for `id` with an inbound envelope.
    ///
    /// Error-kind envelopes reject the waiter with `RemoteError`; anything
    /// else resolves it. Returns `false` if no entry exists, e.g. because the
    /// deadline already fired.
    pub fn settle(&self, id: &str, envelope: Envelope) -> bool {
        let entry = lock_unpoisoned(&self.entries).remove(id);

        match entry {
            Some(entry) => {
                debug!(
                    message_id = id,
                    elapsed_ms = entry.created_at.elapsed().as_millis() as u64,
                    "settled pending request"
                );
                let outcome = if envelope.is_error() {
                    Err(ClientError::RemoteError(Box::new(envelope)))
                } else {
                    Ok(envelope)
                };
                entry.finish(outcome);
                true
            }
            None => {
                debug!(message_id = id, "no pending request for response");
                false
            }
        }
    }

    /// Reject the entry for `id` with `err`, e.g. when transmission failed.
    ///
    /// Returns `false` if no entry exists.
    pub fn reject(&self, id: &str, err: ClientError) -> bool {
        let entry = lock_unpoisoned(&self.entries).remove(id);
        match entry {
            Some(entry) => {
                debug!(message_id = id, error = %err, "rejected pending request");
                entry.finish(Err(err));
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        lock_unpoisoned(&self.entries).contains_key(id)
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn info(&self, id: &str) -> Option<PendingInfo> {
        lock_unpoisoned(&self.entries)
            .get(id)
            .map(|entry| PendingInfo {
                created_at: entry.created_at,
                deadline: entry.deadline,
            })
    }
}

fn expire(entries: &Entries, id: &MessageId, seq: u64) {
    let entry = {
        let mut entries = lock_unpoisoned(entries);
        let current = entries
            .get(id.as_str())
            .is_some_and(|entry| entry.seq == seq);
        if current {
            entries.remove(id.as_str())
        } else {
            None
        }
    };

    if let Some(mut entry) = entry {
        debug!(message_id = %id, "pending request timed out");
        // Running inside the timer task itself
        entry.timer = None;
        entry.finish(Err(ClientError::Timeout(id.clone())));
    }
}

/// Eventual outcome of one request.
///
/// Resolves with the response envelope, or rejects with the error that
/// settled the request. A waiter may be created already rejected when the
/// request could not be sent at all.
#[derive(Debug)]
pub struct Waiter {
    id: Option<MessageId>,
    state: WaiterState,
}

#[derive(Debug)]
enum WaiterState {
    Pending(oneshot::Receiver<Outcome>),
    Failed(ClientError),
    Done,
}

impl Waiter {
    fn pending(id: MessageId, rx: oneshot::Receiver<Outcome>) -> Self {
        Self {
            id: Some(id),
            state: WaiterState::Pending(rx),
        }
    }

    /// A waiter that rejects immediately with `err`.
    pub fn failed(err: ClientError) -> Self {
        Self {
            id: None,
            state: WaiterState::Failed(err),
        }
    }

    /// Correlation id, if the request was registered.
    pub fn id(&self) -> Option<&MessageId> {
        self.id.as_ref()
    }
}

impl Future for Waiter {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        let outcome = match std::mem::replace(&mut this.state, WaiterState::Done) {
            WaiterState::Pending(mut rx) => match Pin::new(&mut rx).poll(cx) {
                Poll::Pending => {
                    this.state = WaiterState::Pending(rx);
                    return Poll::Pending;
                }
                Poll::Ready(Ok(outcome)) => outcome,
                Poll::Ready(Err(_)) => Err(ClientError::Transport(
                    "Request abandoned before it settled".to_string(),
                )),
            },
            WaiterState::Failed(err) => Err(err),
            WaiterState::Done => Err(ClientError::Protocol(
                "Waiter polled after completion".to_string(),
            )),
        };

        Poll::Ready(outcome)
    }
}
