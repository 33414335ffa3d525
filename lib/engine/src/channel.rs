//! Channel abstraction.
//!
//! A run talks to the outside world only through a [`Channel`]. Two kinds
//! exist: a live connection to an interactive client, and an emulated
//! channel for headless runs (see [`crate::emulated`]). Both fan
//! non-request traffic out through the shared [`Broadcaster`].

use crate::envelope::{Envelope, EnvelopeKind};
use crate::error::ChannelError;
use async_trait::async_trait;
use rootcause::Report;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

/// Callback invoked for each envelope of a subscribed kind.
pub type EnvelopeHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// Handle returned by [`Channel::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Send/subscribe contract shared by live and emulated channels.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Sends an envelope to the other side.
    ///
    /// # Errors
    ///
    /// Returns an error if the envelope cannot be delivered.
    async fn send(&self, envelope: Envelope) -> Result<(), Report<ChannelError>>;

    /// Registers a handler for envelopes of `kind` arriving on this channel.
    fn subscribe(&self, kind: EnvelopeKind, handler: EnvelopeHandler) -> SubscriptionId;

    /// Removes a handler. Returns false if it was not registered.
    fn unsubscribe(&self, kind: EnvelopeKind, id: SubscriptionId) -> bool;

    /// Returns true if a person can answer prompts on this channel.
    fn is_interactive(&self) -> bool;
}

/// Handler table used by channel implementations.
#[derive(Default)]
pub struct Subscribers {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<EnvelopeKind, Vec<(SubscriptionId, EnvelopeHandler)>>>,
}

impl Subscribers {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler for `kind`.
    pub fn subscribe(&self, kind: EnvelopeKind, handler: EnvelopeHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, handler));
        id
    }

    /// Removes a handler.
    pub fn unsubscribe(&self, kind: EnvelopeKind, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(&kind);
        }
        removed
    }

    /// Calls every handler registered for the envelope's kind.
    ///
    /// Handlers run outside the lock, so they may unsubscribe themselves.
    /// Returns the number of handlers called.
    pub fn dispatch(&self, envelope: &Envelope) -> usize {
        let handlers: Vec<EnvelopeHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&envelope.kind)
            .map(|list| list.iter().map(|(_, handler)| Arc::clone(handler)).collect())
            .unwrap_or_default();

        for handler in &handlers {
            handler(envelope);
        }
        handlers.len()
    }

    /// Returns the number of handlers for `kind`.
    #[must_use]
    pub fn count(&self, kind: EnvelopeKind) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

/// Process-wide fan-out of outbound envelopes.
///
/// Every live connection and every event-stream client holds a receiver.
/// Slow receivers lose the oldest envelopes rather than blocking senders.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    sender: broadcast::Sender<Envelope>,
}

impl Broadcaster {
    /// Creates a broadcaster buffering up to `capacity` envelopes per receiver.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an envelope. Returns how many receivers will see it.
    pub fn publish(&self, envelope: Envelope) -> usize {
        self.sender.send(envelope).unwrap_or(0)
    }

    /// Returns a new receiver.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.sender.subscribe()
    }

    /// Returns a stream of envelopes that skips over lagged gaps.
    pub fn stream(&self) -> impl Stream<Item = Envelope> + Send + 'static + use<> {
        BroadcastStream::new(self.sender.subscribe()).filter_map(Result::ok)
    }

    /// Returns the number of live receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Channel that records everything sent, for tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingChannel {
    sent: Mutex<Vec<Envelope>>,
    subscribers: Subscribers,
    interactive: bool,
}

#[cfg(test)]
impl RecordingChannel {
    pub(crate) fn interactive() -> Self {
        Self {
            interactive: true,
            ..Self::default()
        }
    }

    pub(crate) fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().expect("lock").clone()
    }

    pub(crate) fn deliver(&self, envelope: &Envelope) -> usize {
        self.subscribers.dispatch(envelope)
    }
}

#[cfg(test)]
#[async_trait]
impl Channel for RecordingChannel {
    async fn send(&self, envelope: Envelope) -> Result<(), Report<ChannelError>> {
        self.sent.lock().expect("lock").push(envelope);
        Ok(())
    }

    fn subscribe(&self, kind: EnvelopeKind, handler: EnvelopeHandler) -> SubscriptionId {
        self.subscribers.subscribe(kind, handler)
    }

    fn unsubscribe(&self, kind: EnvelopeKind, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(kind, id)
    }

    fn is_interactive(&self) -> bool {
        self.interactive
    }
}
