//! The router: handles incoming envelopes, delivers them to topic handlers
//! and forwards them toward their destination.

use super::config::RouterParams;
use super::handler::{Handler, HandlerRegistry, Received, Registration};
use super::keystore::KeyStore;
use super::peer::PeerSender;
use super::{
    CAPABILITY_EMPTY, CAPABILITY_FORWARD, CAPABILITY_PARTIAL, CAPABILITY_RECEIVE, CAPABILITY_SEND,
    PSS_CAPABILITY_ID, RouterError,
};
use crate::digest_cache::{DigestCache, TtlDigestCache};
use crate::load_balancer::LoadBalancer;
use crate::message::{Envelope, Flags, Topic, expiry_after, validate_address};
use crate::outbox::{Forwarder, Outbox};
use async_trait::async_trait;
use dashmap::DashMap;
use hive_crypto::x25519::{PrivateKey, PublicKey};
use hive_crypto::{WrapMode, WrapParams, wrap};
use hive_discovery::pot::{DefaultPof, MAX_PO, Pof};
use hive_discovery::{ADDRESS_LENGTH, Address, Capability, Kademlia, Peer};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Path an incoming envelope took through [`Router::handle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Expired before arrival; dropped
    Expired,
    /// Seen within the digest cache TTL; dropped
    Duplicate,
    /// Raw envelope for a topic whose handlers refuse raw; dropped
    NoRawHandler,
    /// Not for this node, or not openable here; queued for forwarding
    Forwarded,
    /// Delivered to the topic handlers
    Delivered,
}

struct RouterInner {
    kademlia: Arc<Kademlia>,
    params: RouterParams,
    capability: Capability,
    keys: KeyStore,
    handlers: Arc<HandlerRegistry>,
    digests: Arc<dyn DigestCache>,
    outbox: Outbox,
    balancer: LoadBalancer,
    peers: DashMap<Address, Arc<dyn PeerSender>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Hands outbox envelopes back to the router without keeping it alive.
struct RouterForwarder(Weak<RouterInner>);

#[async_trait]
impl Forwarder for RouterForwarder {
    async fn forward(&self, envelope: &Envelope) -> Result<(), RouterError> {
        let inner = self.0.upgrade().ok_or(RouterError::Stopped)?;
        inner.forward(envelope).await.map(|_| ())
    }
}

/// Envelope router over a Kademlia table.
///
/// # Example
///
/// ```no_run
/// use hive_core::{Handler, Router, RouterParams, Topic};
/// use hive_crypto::x25519::PrivateKey;
/// use hive_discovery::{Address, KadParams, Kademlia};
/// use rand_core::OsRng;
/// use std::sync::Arc;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let identity = PrivateKey::generate(&mut OsRng);
/// let base = Address::from_public_key(identity.public_key().as_bytes());
/// let kademlia = Arc::new(Kademlia::new(base, KadParams::default())?);
///
/// let params = RouterParams { allow_raw: true, ..RouterParams::default() };
/// let router = Router::new(kademlia, identity, params)?;
/// let _chat = router.register(
///     Topic::from_name("chat"),
///     Handler::new(|msg| {
///         println!("{}", String::from_utf8_lossy(msg.payload));
///         Ok(())
///     })
///     .with_raw(),
/// );
/// router.start();
/// router.send_raw(&[0xab], Topic::from_name("chat"), b"hello".to_vec())?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    /// Create a router and advertise its capability on `kademlia`.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::InvalidConfig`] for bad params and
    /// [`RouterError::Capability`] if the table already advertises the pss
    /// capability.
    pub fn new(
        kademlia: Arc<Kademlia>,
        identity: PrivateKey,
        params: RouterParams,
    ) -> Result<Self, RouterError> {
        let digests = Arc::new(TtlDigestCache::new(params.digest_cache_ttl));
        Self::with_digest_cache(kademlia, identity, params, digests)
    }

    /// [`Router::new`] with a caller-supplied digest cache.
    ///
    /// # Errors
    ///
    /// As [`Router::new`].
    pub fn with_digest_cache(
        kademlia: Arc<Kademlia>,
        identity: PrivateKey,
        params: RouterParams,
        digests: Arc<dyn DigestCache>,
    ) -> Result<Self, RouterError> {
        params.validate()?;
        let capability = Self::capability_for(&params)?;
        kademlia.add_capability(capability)?;

        let inner = Arc::new_cyclic(|weak: &Weak<RouterInner>| RouterInner {
            keys: KeyStore::new(identity, params.sym_key_cache_capacity),
            handlers: Arc::new(HandlerRegistry::new()),
            digests,
            outbox: Outbox::new(
                params.outbox_capacity,
                params.outbox_retry_delay,
                Arc::new(RouterForwarder(weak.clone())),
            ),
            balancer: LoadBalancer::new(Arc::clone(&kademlia)),
            peers: DashMap::new(),
            tasks: Mutex::new(Vec::new()),
            capability,
            kademlia,
            params,
        });
        Ok(Self { inner })
    }

    fn capability_for(params: &RouterParams) -> Result<Capability, RouterError> {
        let mut cap = Capability::with_flags(
            PSS_CAPABILITY_ID,
            &[
                CAPABILITY_SEND,
                CAPABILITY_RECEIVE,
                CAPABILITY_PARTIAL,
                CAPABILITY_EMPTY,
            ],
        )?;
        if params.allow_forward {
            cap.set(CAPABILITY_FORWARD)?;
        }
        Ok(cap)
    }

    /// Capability this router advertises.
    #[must_use]
    pub fn capability(&self) -> Capability {
        self.inner.capability
    }

    /// Overlay address of this node.
    #[must_use]
    pub fn base(&self) -> &Address {
        self.inner.kademlia.base()
    }

    /// Router params.
    #[must_use]
    pub fn params(&self) -> &RouterParams {
        &self.inner.params
    }

    /// Topology the router routes over.
    #[must_use]
    pub fn kademlia(&self) -> &Arc<Kademlia> {
        &self.inner.kademlia
    }

    /// Key store.
    #[must_use]
    pub fn keys(&self) -> &KeyStore {
        &self.inner.keys
    }

    /// This node's public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.inner.keys.public_key()
    }

    /// Envelopes queued or in flight in the outbox.
    #[must_use]
    pub fn outbox_len(&self) -> usize {
        self.inner.outbox.len()
    }

    /// Start the outbox, the load balancer and the cache cleanup timers.
    /// Must be called within a tokio runtime.
    pub fn start(&self) {
        self.inner.outbox.start();
        self.inner.balancer.start();

        let mut tasks = self.inner.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        tasks.push(spawn_ticker(self.inner.params.digest_cache_ttl, weak.clone(), |inner| {
            inner.digests.gc();
        }));
        tasks.push(spawn_ticker(self.inner.params.clean_interval, weak, |inner| {
            inner.keys.clean_keys();
        }));
        info!(base = %self.base().label(), "router started");
    }

    /// Stop background work. Queued envelopes are dropped.
    pub fn stop(&self) {
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        self.inner.outbox.stop();
        self.inner.balancer.stop();
        info!(base = %self.base().label(), "router stopped");
    }

    /// Register `sender` as the transport to the peer at `address`.
    pub fn add_peer(&self, address: Address, sender: Arc<dyn PeerSender>) {
        trace!(peer = %address.label(), "adding peer");
        self.inner.peers.insert(address, sender);
    }

    /// Remove the transport to the peer at `address`.
    pub fn remove_peer(&self, address: &Address) {
        trace!(peer = %address.label(), "removing peer");
        self.inner.peers.remove(address);
    }

    /// Run `handler` for envelopes on `topic` delivered to this node.
    #[must_use = "dropping the registration removes the handler"]
    pub fn register(&self, topic: Topic, handler: Handler) -> Registration {
        self.inner.handlers.register(topic, handler)
    }

    /// Decode wire bytes and [`handle`](Self::handle) the envelope.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Message`] for malformed or oversized input, and
    /// otherwise what [`handle`](Self::handle) returns.
    pub fn handle_bytes(&self, bytes: &[u8]) -> Result<Disposition, RouterError> {
        let envelope = Envelope::from_bytes(bytes, self.inner.params.max_msg_size)?;
        self.handle(envelope)
    }

    /// Handle an envelope received from a peer.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::Outbox`] if the envelope had to be forwarded
    /// and the outbox refused it.
    pub fn handle(&self, envelope: Envelope) -> Result<Disposition, RouterError> {
        self.inner.handle(envelope)
    }

    /// Forward `envelope` to the peers closest to its destination.
    ///
    /// Returns the number of peers reached.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::NoPeers`] if no peer accepted the envelope.
    pub async fn forward(&self, envelope: &Envelope) -> Result<usize, RouterError> {
        self.inner.forward(envelope).await
    }

    /// Send `payload` unsealed to the nodes whose address starts with `to`.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::RawNotAllowed`] unless `allow_raw` is set,
    /// [`RouterError::Message`] if `to` is too long, and
    /// [`RouterError::Outbox`] if the outbox is full.
    pub fn send_raw(&self, to: &[u8], topic: Topic, payload: Vec<u8>) -> Result<(), RouterError> {
        if !self.inner.params.allow_raw {
            return Err(RouterError::RawNotAllowed);
        }
        validate_address(to)?;
        let envelope = Envelope::new(
            to.to_vec(),
            topic,
            Flags::raw(),
            expiry_after(self.inner.params.msg_ttl),
            payload,
        )?;
        self.inner.digests.add(envelope.digest());
        self.inner.enqueue(envelope)
    }

    /// Seal `payload` under the symmetric key `key_id` and send it to the
    /// peer bound to that key for `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::UnknownKey`], [`RouterError::UnboundTopic`],
    /// [`RouterError::Crypto`] or [`RouterError::Outbox`].
    pub fn send_sym(&self, key_id: &str, topic: Topic, payload: &[u8]) -> Result<(), RouterError> {
        let keys = &self.inner.keys;
        let key = keys.get_symmetric_key(key_id)?;
        let binding = keys
            .symmetric_binding(key_id, &topic)
            .ok_or_else(|| unbound(key_id, topic))?;
        let sealed = wrap(
            payload,
            &WrapParams {
                sender: keys.identity(),
                mode: WrapMode::Symmetric(&key),
                aad: topic.as_bytes(),
            },
        )?;
        self.inner.send_sealed(binding.address, topic, Flags::symmetric(), sealed)
    }

    /// Seal `payload` to the public key `key_id` and send it to the peer
    /// bound to that key for `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::UnknownKey`], [`RouterError::UnboundTopic`],
    /// [`RouterError::Crypto`] or [`RouterError::Outbox`].
    pub fn send_asym(&self, key_id: &str, topic: Topic, payload: &[u8]) -> Result<(), RouterError> {
        let keys = &self.inner.keys;
        let recipient = keys.get_public_key(key_id)?;
        let binding = keys
            .public_binding(key_id, &topic)
            .ok_or_else(|| unbound(key_id, topic))?;
        let sealed = wrap(
            payload,
            &WrapParams {
                sender: keys.identity(),
                mode: WrapMode::Asymmetric(&recipient),
                aad: topic.as_bytes(),
            },
        )?;
        self.inner.send_sealed(binding.address, topic, Flags::asymmetric(), sealed)
    }
}

fn unbound(key_id: &str, topic: Topic) -> RouterError {
    RouterError::UnboundTopic {
        key_id: key_id.to_string(),
        topic: topic.to_string(),
    }
}

fn spawn_ticker<F>(period: Duration, inner: Weak<RouterInner>, tick: F) -> JoinHandle<()>
where
    F: Fn(&RouterInner) + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // the first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(router) = inner.upgrade() else {
                break;
            };
            tick(&router);
        }
    })
}

impl RouterInner {
    fn handle(&self, envelope: Envelope) -> Result<Disposition, RouterError> {
        let topic = envelope.topic();
        if envelope.is_expired() {
            warn!(%topic, to = %hex::encode(envelope.to()), "dropping expired envelope");
            return Ok(Disposition::Expired);
        }
        let digest = envelope.digest();
        if !self.digests.add(digest) {
            trace!(%topic, "dropping duplicate envelope");
            return Ok(Disposition::Duplicate);
        }

        let caps = self.handlers.caps(&topic);
        let raw = envelope.flags().is_raw();
        if raw && caps.is_some_and(|c| !c.raw) {
            warn!(%topic, "no handler for raw envelope");
            return Ok(Disposition::NoRawHandler);
        }
        let prox = caps.is_some_and(|c| c.prox);

        if !self.is_possible_recipient(&envelope, prox) {
            trace!(%topic, prox, "forwarding envelope");
            self.enqueue(envelope)?;
            return Ok(Disposition::Forwarded);
        }

        trace!(%topic, prox, raw, "processing envelope");
        match self.process(&envelope, raw, prox) {
            Ok(()) => Ok(Disposition::Delivered),
            Err(e) => {
                debug!(%topic, error = %e, "processing failed, forwarding");
                self.enqueue(envelope)?;
                Ok(Disposition::Forwarded)
            }
        }
    }

    /// The destination prefix matches this node, or the topic takes
    /// neighbourhood delivery and the destination is within depth.
    fn is_possible_recipient(&self, envelope: &Envelope, prox: bool) -> bool {
        let base = self.kademlia.base().as_bytes();
        let to = envelope.to();
        if base.starts_with(to) {
            return true;
        }
        if !prox {
            return false;
        }
        let depth = self.kademlia.neighbourhood_depth();
        let (po, _) = DefaultPof::default().pof(base, to, 0);
        trace!(po, depth, "possible recipient by proximity");
        depth <= po
    }

    fn process(&self, envelope: &Envelope, raw: bool, prox: bool) -> Result<(), RouterError> {
        let topic = envelope.topic();
        let opened;
        let (payload, key_id, from, asymmetric) = if raw {
            (envelope.payload(), None, None, false)
        } else if envelope.flags().is_symmetric() {
            let (unwrapped, id) = self
                .keys
                .open_symmetric(envelope.payload(), &topic)
                .ok_or(RouterError::DecryptionFailed)?;
            let from = self.keys.symmetric_binding(&id, &topic).map(|b| b.address);
            opened = unwrapped;
            (opened.payload.as_slice(), Some(id), from, false)
        } else {
            let (unwrapped, id) = self
                .keys
                .open_asymmetric(envelope.payload(), &topic)
                .map_err(|_| RouterError::DecryptionFailed)?;
            let from = self.keys.public_binding(&id, &topic).map(|b| b.address);
            opened = unwrapped;
            (opened.payload.as_slice(), Some(id), from, true)
        };

        if envelope.is_partial() || prox {
            if let Err(e) = self.enqueue(envelope.clone()) {
                warn!(%topic, error = %e, "could not queue delivered envelope for onward forwarding");
            }
        }

        let received = Received {
            topic,
            payload,
            from: from.as_deref(),
            asymmetric,
            key_id: key_id.as_deref(),
        };
        for handler in self.handlers.handlers(&topic) {
            let caps = handler.caps();
            if raw && !caps.raw {
                trace!(%topic, "skipping handler without raw support");
                continue;
            }
            if prox && !caps.prox {
                trace!(%topic, "skipping handler without prox support");
                continue;
            }
            if let Err(e) = handler.call(&received) {
                warn!(%topic, error = %e, "handler failed");
            }
        }
        Ok(())
    }

    fn enqueue(&self, envelope: Envelope) -> Result<(), RouterError> {
        self.outbox.enqueue(envelope).map_err(|e| {
            warn!(error = %e, "outbox refused envelope");
            RouterError::from(e)
        })
    }

    fn send_sealed(
        &self,
        to: Vec<u8>,
        topic: Topic,
        flags: Flags,
        sealed: Vec<u8>,
    ) -> Result<(), RouterError> {
        let envelope = Envelope::new(to, topic, flags, expiry_after(self.params.msg_ttl), sealed)?;
        trace!(%topic, to = %hex::encode(envelope.to()), "sending sealed envelope");
        self.enqueue(envelope)
    }

    /// Send to the closest peers, stopping below the broadcast threshold
    /// once any send succeeded.
    ///
    /// The threshold is the proximity of this node to the destination,
    /// capped by the bits the destination gives and by the neighbourhood
    /// depth. Below both caps a single send to the next closer bin suffices.
    async fn forward(&self, envelope: &Envelope) -> Result<usize, RouterError> {
        let mut to = [0u8; ADDRESS_LENGTH];
        to[..envelope.to().len()].copy_from_slice(envelope.to());
        let depth = self.kademlia.neighbourhood_depth();
        let luminosity = envelope.to().len() * 8;

        let (po, _) = DefaultPof::new(depth).pof(&to, self.kademlia.base().as_bytes(), 0);
        let mut threshold = po.min(luminosity);
        let mut send_once = false;
        if threshold < luminosity && threshold < depth {
            threshold += 1;
            send_once = true;
        }

        let bins = self.balancer.bins_desc(&to);
        let mut sent = 0usize;
        'bins: for bin in bins {
            if bin.po < threshold && sent > 0 {
                break;
            }
            for (peer, _) in &bin.peers {
                if !self.send_to(peer, envelope).await {
                    continue;
                }
                self.balancer.add_use_count(peer.address());
                sent += 1;
                if send_once || bin.po == MAX_PO {
                    break 'bins;
                }
            }
        }

        self.digests.add(envelope.digest());
        if sent == 0 {
            debug!(topic = %envelope.topic(), to = %hex::encode(envelope.to()), "no peer accepted envelope");
            return Err(RouterError::NoPeers);
        }
        trace!(topic = %envelope.topic(), sent, threshold, send_once, "forwarded envelope");
        Ok(sent)
    }

    async fn send_to(&self, peer: &Peer, envelope: &Envelope) -> bool {
        if peer.capabilities().get(PSS_CAPABILITY_ID).is_none() {
            trace!(peer = %peer.address().label(), "peer lacks pss capability");
            return false;
        }
        let Some(sender) = self.peers.get(peer.address()).map(|s| Arc::clone(s.value())) else {
            warn!(peer = %peer.address().label(), "peer has no transport, skipping");
            return false;
        };
        match sender.send(envelope).await {
            Ok(()) => true,
            Err(e) => {
                debug!(peer = %peer.address().label(), error = %e, "send failed");
                false
            }
        }
    }
}

impl Drop for RouterInner {
    fn drop(&mut self) {
        for task in self.tasks.get_mut().drain(..) {
            task.abort();
        }
    }
}
