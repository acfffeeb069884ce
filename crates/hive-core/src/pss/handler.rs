//! Topic handlers.
//!
//! Any number of handlers can be registered per topic. Each declares whether
//! it accepts raw envelopes and whether it accepts envelopes delivered by
//! neighbourhood proximity rather than an address match. The router caches
//! the union of these per topic to decide how to treat incoming envelopes.

use crate::message::Topic;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Error a handler reports. Logged by the router, never propagated.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

type HandlerFn = dyn Fn(&Received<'_>) -> Result<(), HandlerError> + Send + Sync;

/// A delivered envelope as handlers see it.
#[derive(Debug, Clone, Copy)]
pub struct Received<'a> {
    /// Envelope topic
    pub topic: Topic,
    /// Opened payload
    pub payload: &'a [u8],
    /// Overlay address bound to the key that opened the envelope, if known
    pub from: Option<&'a [u8]>,
    /// Whether the envelope was sealed to this node's public key
    pub asymmetric: bool,
    /// Id of the key that opened the envelope; `None` for raw envelopes
    pub key_id: Option<&'a str>,
}

/// What a handler, or all handlers of a topic, accept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerCaps {
    /// Accepts raw envelopes
    pub raw: bool,
    /// Accepts envelopes delivered to the neighbourhood of the destination
    pub prox: bool,
}

/// Code run on delivery of an envelope.
#[derive(Clone)]
pub struct Handler {
    f: Arc<HandlerFn>,
    caps: HandlerCaps,
}

impl Handler {
    /// Create a handler accepting sealed, address-matched envelopes only.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Received<'_>) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        Self {
            f: Arc::new(f),
            caps: HandlerCaps::default(),
        }
    }

    /// Also accept raw envelopes.
    #[must_use]
    pub fn with_raw(mut self) -> Self {
        self.caps.raw = true;
        self
    }

    /// Also accept envelopes for any address within the neighbourhood depth.
    #[must_use]
    pub fn with_prox(mut self) -> Self {
        self.caps.prox = true;
        self
    }

    /// What this handler accepts.
    #[must_use]
    pub fn caps(&self) -> HandlerCaps {
        self.caps
    }

    pub(crate) fn call(&self, received: &Received<'_>) -> Result<(), HandlerError> {
        (self.f)(received)
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler").field("caps", &self.caps).finish()
    }
}

#[derive(Default)]
struct TopicHandlers {
    handlers: Vec<(u64, Handler)>,
    caps: HandlerCaps,
}

impl TopicHandlers {
    fn recompute_caps(&mut self) {
        self.caps = self
            .handlers
            .iter()
            .fold(HandlerCaps::default(), |acc, (_, h)| HandlerCaps {
                raw: acc.raw || h.caps.raw,
                prox: acc.prox || h.caps.prox,
            });
    }
}

/// Handlers by topic.
#[derive(Default)]
pub struct HandlerRegistry {
    topics: RwLock<HashMap<Topic, TopicHandlers>>,
    next_id: AtomicU64,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `handler` for `topic`.
    ///
    /// The handler stays registered until the returned [`Registration`] is
    /// dropped or deregistered.
    #[must_use = "dropping the registration removes the handler"]
    pub fn register(self: &Arc<Self>, topic: Topic, handler: Handler) -> Registration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let caps = handler.caps;
        let mut topics = self.topics.write();
        let entry = topics.entry(topic).or_default();
        entry.handlers.push((id, handler));
        entry.recompute_caps();
        debug!(%topic, raw = caps.raw, prox = caps.prox, "registered handler");

        Registration {
            registry: Arc::downgrade(self),
            topic,
            id,
            active: true,
        }
    }

    fn deregister(&self, topic: Topic, id: u64) {
        let mut topics = self.topics.write();
        let Some(entry) = topics.get_mut(&topic) else {
            return;
        };
        entry.handlers.retain(|(hid, _)| *hid != id);
        if entry.handlers.is_empty() {
            topics.remove(&topic);
        } else {
            entry.recompute_caps();
        }
        debug!(%topic, "deregistered handler");
    }

    /// Union of the capabilities of the handlers for `topic`, or `None` when
    /// the topic has no handlers.
    #[must_use]
    pub fn caps(&self, topic: &Topic) -> Option<HandlerCaps> {
        self.topics.read().get(topic).map(|entry| entry.caps)
    }

    /// Snapshot of the handlers for `topic`.
    #[must_use]
    pub fn handlers(&self, topic: &Topic) -> Vec<Handler> {
        self.topics
            .read()
            .get(topic)
            .map(|entry| entry.handlers.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    /// Number of handlers for `topic`.
    #[must_use]
    pub fn count(&self, topic: &Topic) -> usize {
        self.topics
            .read()
            .get(topic)
            .map_or(0, |entry| entry.handlers.len())
    }
}

/// Keeps a handler registered. Dropping it deregisters the handler.
#[derive(Debug)]
pub struct Registration {
    registry: Weak<HandlerRegistry>,
    topic: Topic,
    id: u64,
    active: bool,
}

impl Registration {
    /// Topic the handler is registered for.
    #[must_use]
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Remove the handler now.
    pub fn deregister(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(registry) = self.registry.upgrade() {
            registry.deregister(self.topic, self.id);
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.remove();
    }
}
