//! Typed publish/subscribe for connection-wide events.
//!
//! Global channels ([`Channel`]) carry lifecycle and traffic notifications
//! to any number of listeners. Per-request completion is not routed through
//! here: it is keyed by [`MessageId`] in the pending table, so correlation
//! ids and subscription keys never share a namespace.
//!
//! Listeners run outside the registry lock, which lets a listener subscribe,
//! unsubscribe or call back into the connection manager.
//!
//! [`MessageId`]: crate::envelope::MessageId

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::ServerAddress;
use crate::envelope::Envelope;
use crate::lock_unpoisoned;

/// Global event channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Configuration loaded; the manager can open.
    Ready,
    /// Connection open (after any session resumption attempt).
    Open,
    Close,
    /// An envelope was transmitted.
    Send,
    /// A non-error envelope arrived.
    Message,
    /// An error-kind envelope arrived.
    Error,
    SignOut,
}

impl Channel {
    pub fn name(&self) -> &'static str {
        match self {
            Channel::Ready => "ready",
            Channel::Open => "open",
            Channel::Close => "close",
            Channel::Send => "send",
            Channel::Message => "message",
            Channel::Error => "error",
            Channel::SignOut => "sign-out",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Event payloads; each variant belongs to exactly one channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Ready(ServerAddress),
    Open,
    Close { code: u16, reason: String },
    Send(Envelope),
    Message(Envelope),
    Error(Envelope),
    SignOut,
}

impl Event {
    pub fn channel(&self) -> Channel {
        match self {
            Event::Ready(_) => Channel::Ready,
            Event::Open => Channel::Open,
            Event::Close { .. } => Channel::Close,
            Event::Send(_) => Channel::Send,
            Event::Message(_) => Channel::Message,
            Event::Error(_) => Channel::Error,
            Event::SignOut => Channel::SignOut,
        }
    }

    /// Envelope carried by `Send`, `Message` and `Error` events.
    pub fn envelope(&self) -> Option<&Envelope> {
        match self {
            Event::Send(envelope) | Event::Message(envelope) | Event::Error(envelope) => {
                Some(envelope)
            }
            _ => None,
        }
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    channel: Channel,
    id: u64,
}

impl SubscriptionHandle {
    pub fn channel(&self) -> Channel {
        self.channel
    }
}

type SharedListener = Arc<dyn Fn(&Event) + Send + Sync + 'static>;
type OnceListener = Box<dyn FnOnce(&Event) + Send + 'static>;

enum Listener {
    Persistent(SharedListener),
    Once(OnceListener),
}

/// Named-channel event dispatcher.
#[derive(Default)]
pub struct EventDispatcher {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<Channel, Vec<(u64, Listener)>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen on `channel` until unsubscribed.
    pub fn subscribe<F>(&self, channel: Channel, listener: F) -> SubscriptionHandle
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.insert(channel, Listener::Persistent(Arc::new(listener)))
    }

    /// Listen for the next event on `channel` only.
    ///
    /// The subscription is removed as part of the publish that fires it.
    pub fn subscribe_once<F>(&self, channel: Channel, listener: F) -> SubscriptionHandle
    where
        F: FnOnce(&Event) + Send + 'static,
    {
        self.insert(channel, Listener::Once(Box::new(listener)))
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        let mut listeners = lock_unpoisoned(&self.listeners);
        let Some(channel) = listeners.get_mut(&handle.channel) else {
            return false;
        };
        let before = channel.len();
        channel.retain(|(id, _)| *id != handle.id);
        channel.len() != before
    }

    /// Deliver `event` to every listener on its channel, in subscription order.
    ///
    /// Returns the number of listeners invoked.
    pub fn publish(&self, event: &Event) -> usize {
        let to_fire: Vec<Listener> = {
            let mut listeners = lock_unpoisoned(&self.listeners);
            let Some(channel) = listeners.get_mut(&event.channel()) else {
                return 0;
            };

            let mut fired = Vec::with_capacity(channel.len());
            let mut kept = Vec::with_capacity(channel.len());
            for (id, listener) in channel.drain(..) {
                match listener {
                    Listener::Persistent(shared) => {
                        fired.push(Listener::Persistent(Arc::clone(&shared)));
                        kept.push((id, Listener::Persistent(shared)));
                    }
                    once @ Listener::Once(_) => fired.push(once),
                }
            }
            *channel = kept;
            fired
        };

        let count = to_fire.len();
        for listener in to_fire {
            match listener {
                Listener::Persistent(listener) => listener(event),
                Listener::Once(listener) => listener(event),
            }
        }
        count
    }

    pub fn listener_count(&self, channel: Channel) -> usize {
        lock_unpoisoned(&self.listeners)
            .get(&channel)
            .map_or(0, Vec::len)
    }

    fn insert(&self, channel: Channel, listener: Listener) -> SubscriptionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock_unpoisoned(&self.listeners)
            .entry(channel)
            .or_default()
            .push((id, listener));
        SubscriptionHandle { channel, id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Action, MessageId, MessageKind};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(&Event) + Send + Sync>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        let make = move |tag: &str| {
            let log = Arc::clone(&log_clone);
            let tag = tag.to_string();
            Box::new(move |event: &Event| {
                log.lock().unwrap().push(format!("{}:{}", tag, event.channel()));
            }) as Box<dyn Fn(&Event) + Send + Sync>
        };
        (log, make)
    }

    #[test]
    fn test_publish_reaches_only_matching_channel() {
        let dispatcher = EventDispatcher::new();
        let (log, make) = recorder();

        dispatcher.subscribe(Channel::Open, make("a"));
        dispatcher.subscribe(Channel::Close, make("b"));
        dispatcher.subscribe(Channel::Open, make("c"));

        assert_eq!(dispatcher.publish(&Event::Open), 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:open".to_string(), "c:open".to_string()]
        );
    }

    #[test]
    fn test_publish_without_listeners_fires_nothing() {
        let dispatcher = EventDispatcher::new();
        assert_eq!(dispatcher.publish(&Event::SignOut), 0);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let dispatcher = EventDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let handle = dispatcher.subscribe(Channel::Message, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let envelope = Envelope::new(MessageId::from("m0000001"), MessageKind::Response, Action::Value);
        dispatcher.publish(&Event::Message(envelope.clone()));
        assert!(dispatcher.unsubscribe(handle));
        assert!(!dispatcher.unsubscribe(handle));
        dispatcher.publish(&Event::Message(envelope));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.listener_count(Channel::Message), 0);
    }

    #[test]
    fn test_subscribe_once_fires_a_single_time() {
        let dispatcher = EventDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        dispatcher.subscribe_once(Channel::Open, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(dispatcher.publish(&Event::Open), 1);
        assert_eq!(dispatcher.publish(&Event::Open), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_may_subscribe_during_publish() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let inner = Arc::clone(&dispatcher);
        dispatcher.subscribe_once(Channel::Open, move |_| {
            inner.subscribe(Channel::Close, |_| {});
        });

        dispatcher.publish(&Event::Open);
        assert_eq!(dispatcher.listener_count(Channel::Close), 1);
    }

    #[test]
    fn test_event_channel_mapping() {
        let envelope = Envelope::new(MessageId::from("e0000001"), MessageKind::Error, Action::Login);
        assert_eq!(Event::Error(envelope.clone()).channel(), Channel::Error);
        assert_eq!(Event::Message(envelope.clone()).channel(), Channel::Message);
        assert_eq!(Event::Send(envelope).channel(), Channel::Send);
        assert_eq!(
            Event::Close { code: 1000, reason: String::new() }.channel(),
            Channel::Close
        );
        assert_eq!(Channel::SignOut.to_string(), "sign-out");
    }
}
