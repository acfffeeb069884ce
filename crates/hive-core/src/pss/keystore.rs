//! Keys for sealing and opening envelopes.
//!
//! The store holds this node's X25519 identity, symmetric keys by id and peer
//! public keys by id. Each key can be bound, per topic, to the overlay
//! address (or address prefix) of the peer it is shared with; sending with a
//! key goes to that address, and envelopes opened with it are attributed to it.
//!
//! Incoming symmetric envelopes are tried against a bounded, most recent
//! first list of keys rather than every stored key.

use super::RouterError;
use crate::message::Topic;
use hive_crypto::aead::AeadKey;
use hive_crypto::x25519::{PrivateKey, PublicKey};
use hive_crypto::{CryptoError, Unwrapped, unwrap_asymmetric, unwrap_symmetric};
use parking_lot::RwLock;
use rand_core::OsRng;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, trace};

/// Peer bound to a key for one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerBinding {
    /// Overlay address or prefix of the peer
    pub address: Vec<u8>,
    /// Exempt from [`KeyStore::clean_keys`]
    pub protected: bool,
}

#[derive(Default)]
struct Keys {
    symmetric: HashMap<String, AeadKey>,
    sym_peers: HashMap<String, HashMap<Topic, PeerBinding>>,
    public: HashMap<String, PublicKey>,
    pub_peers: HashMap<String, HashMap<Topic, PeerBinding>>,
    decrypt_cache: VecDeque<String>,
}

/// Identity, symmetric and public keys.
pub struct KeyStore {
    identity: PrivateKey,
    cache_capacity: usize,
    keys: RwLock<Keys>,
}

impl KeyStore {
    /// Create a store around `identity`, trying at most `cache_capacity`
    /// symmetric keys per incoming envelope.
    #[must_use]
    pub fn new(identity: PrivateKey, cache_capacity: usize) -> Self {
        Self {
            identity,
            cache_capacity,
            keys: RwLock::new(Keys::default()),
        }
    }

    /// This node's public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.identity.public_key()
    }

    /// Id of this node's public key, as peers refer to it.
    #[must_use]
    pub fn public_key_id(&self) -> String {
        public_key_id(&self.public_key())
    }

    pub(crate) fn identity(&self) -> &PrivateKey {
        &self.identity
    }

    /// Store `key` and bind it to `address` for `topic`.
    ///
    /// With `add_to_cache` the key is also tried on incoming envelopes.
    /// Returns the key id.
    pub fn add_symmetric_key(
        &self,
        key: AeadKey,
        topic: Topic,
        address: Vec<u8>,
        add_to_cache: bool,
    ) -> String {
        self.insert_symmetric_key(key, topic, address, add_to_cache, true)
    }

    /// Like [`add_symmetric_key`](Self::add_symmetric_key), but the binding
    /// is dropped by [`clean_keys`](Self::clean_keys) once the key leaves the
    /// decrypt cache.
    pub fn add_ephemeral_symmetric_key(&self, key: AeadKey, topic: Topic, address: Vec<u8>) -> String {
        self.insert_symmetric_key(key, topic, address, true, false)
    }

    /// Generate and store a fresh symmetric key. Returns the key id.
    pub fn generate_symmetric_key(&self, topic: Topic, address: Vec<u8>, add_to_cache: bool) -> String {
        self.add_symmetric_key(AeadKey::generate(&mut OsRng), topic, address, add_to_cache)
    }

    fn insert_symmetric_key(
        &self,
        key: AeadKey,
        topic: Topic,
        address: Vec<u8>,
        add_to_cache: bool,
        protected: bool,
    ) -> String {
        let id = key.id();
        let mut keys = self.keys.write();
        keys.symmetric.insert(id.clone(), key);
        keys.sym_peers
            .entry(id.clone())
            .or_default()
            .insert(topic, PeerBinding { address, protected });
        if add_to_cache {
            keys.decrypt_cache.retain(|cached| cached != &id);
            keys.decrypt_cache.push_front(id.clone());
            keys.decrypt_cache.truncate(self.cache_capacity);
        }
        debug!(key_id = %id, %topic, add_to_cache, "stored symmetric key");
        id
    }

    /// Symmetric key stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::UnknownKey`] if no such key exists.
    pub fn get_symmetric_key(&self, id: &str) -> Result<AeadKey, RouterError> {
        self.keys
            .read()
            .symmetric
            .get(id)
            .cloned()
            .ok_or_else(|| RouterError::UnknownKey(id.to_string()))
    }

    /// Parse a peer public key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError`] for wrong length or a low-order point.
    pub fn unmarshal_public_key(&self, bytes: &[u8]) -> Result<PublicKey, CryptoError> {
        PublicKey::from_slice(bytes)
    }

    /// Store a peer public key bound to `address` for `topic`. Returns the
    /// key id.
    pub fn set_peer_public_key(&self, key: PublicKey, topic: Topic, address: Vec<u8>) -> String {
        let id = public_key_id(&key);
        let mut keys = self.keys.write();
        keys.public.insert(id.clone(), key);
        keys.pub_peers.entry(id.clone()).or_default().insert(
            topic,
            PeerBinding {
                address,
                protected: true,
            },
        );
        debug!(key_id = %id, %topic, "stored peer public key");
        id
    }

    /// Public key stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::UnknownKey`] if no such key exists.
    pub fn get_public_key(&self, id: &str) -> Result<PublicKey, RouterError> {
        self.keys
            .read()
            .public
            .get(id)
            .copied()
            .ok_or_else(|| RouterError::UnknownKey(id.to_string()))
    }

    /// Peer bound to symmetric key `id` for `topic`.
    #[must_use]
    pub fn symmetric_binding(&self, id: &str, topic: &Topic) -> Option<PeerBinding> {
        self.keys.read().sym_peers.get(id)?.get(topic).cloned()
    }

    /// Peer bound to public key `id` for `topic`.
    #[must_use]
    pub fn public_binding(&self, id: &str, topic: &Topic) -> Option<PeerBinding> {
        self.keys.read().pub_peers.get(id)?.get(topic).cloned()
    }

    /// Try the cached symmetric keys, most recent first. Returns the opened
    /// envelope and the id of the key that opened it.
    #[must_use]
    pub fn open_symmetric(&self, sealed: &[u8], topic: &Topic) -> Option<(Unwrapped, String)> {
        let keys = self.keys.read();
        for id in &keys.decrypt_cache {
            let Some(key) = keys.symmetric.get(id) else {
                continue;
            };
            if let Ok(opened) = unwrap_symmetric(sealed, key, topic.as_bytes()) {
                trace!(key_id = %id, "opened symmetric envelope");
                return Some((opened, id.clone()));
            }
        }
        None
    }

    /// Open an envelope sealed to this node. Returns the opened envelope and
    /// the id of the sender's public key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError`] if the envelope was not sealed to this node.
    pub fn open_asymmetric(&self, sealed: &[u8], topic: &Topic) -> Result<(Unwrapped, String), CryptoError> {
        let opened = unwrap_asymmetric(sealed, &self.identity, topic.as_bytes())?;
        let id = public_key_id(&opened.sender);
        Ok((opened, id))
    }

    /// Drop unprotected symmetric key bindings whose key is no longer in the
    /// decrypt cache. Returns how many were dropped.
    pub fn clean_keys(&self) -> usize {
        let mut keys = self.keys.write();
        let Keys {
            sym_peers,
            decrypt_cache,
            ..
        } = &mut *keys;

        let mut count = 0;
        for (id, topics) in sym_peers.iter_mut() {
            if decrypt_cache.contains(id) {
                continue;
            }
            let before = topics.len();
            topics.retain(|_, binding| binding.protected);
            count += before - topics.len();
        }
        sym_peers.retain(|_, topics| !topics.is_empty());
        if count > 0 {
            debug!(count, "cleaned symmetric key bindings");
        }
        count
    }
}

/// Id of a public key: its hex encoding.
#[must_use]
pub fn public_key_id(key: &PublicKey) -> String {
    hex::encode(key.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_crypto::{WrapMode, WrapParams, wrap};

    fn store(capacity: usize) -> KeyStore {
        KeyStore::new(PrivateKey::generate(&mut OsRng), capacity)
    }

    #[test]
    fn test_symmetric_key_roundtrip() {
        let keys = store(4);
        let topic = Topic::from_name("sym");
        let id = keys.generate_symmetric_key(topic, vec![0xaa], true);
        let key = keys.get_symmetric_key(&id).unwrap();
        assert_eq!(key.id(), id);
        assert_eq!(
            keys.symmetric_binding(&id, &topic).map(|b| b.address),
            Some(vec![0xaa])
        );
        assert!(keys.symmetric_binding(&id, &Topic::from_name("other")).is_none());
        assert!(matches!(
            keys.get_symmetric_key("missing"),
            Err(RouterError::UnknownKey(_))
        ));
    }

    #[test]
    fn test_open_symmetric_uses_cache() {
        let sender = store(4);
        let receiver = store(4);
        let topic = Topic::from_name("sym");
        let key = AeadKey::generate(&mut OsRng);

        let sealed = wrap(
            b"hello",
            &WrapParams {
                sender: sender.identity(),
                mode: WrapMode::Symmetric(&key),
                aad: topic.as_bytes(),
            },
        )
        .unwrap();

        // stored but not cached: not tried
        let id = receiver.add_symmetric_key(key.clone(), topic, vec![1], false);
        assert!(receiver.open_symmetric(&sealed, &topic).is_none());

        receiver.add_symmetric_key(key, topic, vec![1], true);
        let (opened, opened_id) = receiver.open_symmetric(&sealed, &topic).unwrap();
        assert_eq!(opened.payload, b"hello");
        assert_eq!(opened.sender, sender.public_key());
        assert_eq!(opened_id, id);

        // wrong topic fails authentication
        assert!(receiver.open_symmetric(&sealed, &Topic::from_name("x")).is_none());
    }

    #[test]
    fn test_decrypt_cache_is_bounded() {
        let keys = store(2);
        let topic = Topic::default();
        let first = keys.generate_symmetric_key(topic, vec![], true);
        keys.generate_symmetric_key(topic, vec![], true);
        keys.generate_symmetric_key(topic, vec![], true);
        let cache = keys.keys.read().decrypt_cache.clone();
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(&first));
    }

    #[test]
    fn test_open_asymmetric() {
        let sender = store(1);
        let receiver = store(1);
        let topic = Topic::from_name("asym");
        let recipient = receiver.public_key();

        let sealed = wrap(
            b"secret",
            &WrapParams {
                sender: sender.identity(),
                mode: WrapMode::Asymmetric(&recipient),
                aad: topic.as_bytes(),
            },
        )
        .unwrap();

        let (opened, id) = receiver.open_asymmetric(&sealed, &topic).unwrap();
        assert_eq!(opened.payload, b"secret");
        assert_eq!(id, sender.public_key_id());
        assert!(sender.open_asymmetric(&sealed, &topic).is_err());
    }

    #[test]
    fn test_public_keys() {
        let keys = store(1);
        let peer = store(1);
        let topic = Topic::from_name("asym");
        let parsed = keys.unmarshal_public_key(peer.public_key().as_bytes()).unwrap();
        let id = keys.set_peer_public_key(parsed, topic, vec![9, 9]);
        assert_eq!(id, peer.public_key_id());
        assert_eq!(keys.get_public_key(&id).unwrap(), peer.public_key());
        assert_eq!(keys.public_binding(&id, &topic).unwrap().address, vec![9, 9]);
        assert!(keys.unmarshal_public_key(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_clean_keys() {
        let keys = store(1);
        let topic = Topic::default();
        let ephemeral = keys.add_ephemeral_symmetric_key(AeadKey::generate(&mut OsRng), topic, vec![]);
        let protected = keys.generate_symmetric_key(topic, vec![], false);
        // still cached
        assert_eq!(keys.clean_keys(), 0);

        // pushes the ephemeral key out of the one-slot cache
        keys.generate_symmetric_key(topic, vec![], true);
        assert_eq!(keys.clean_keys(), 1);
        assert!(keys.symmetric_binding(&ephemeral, &topic).is_none());
        assert!(keys.symmetric_binding(&protected, &topic).is_some());
        // the key itself stays usable for sending
        assert!(keys.get_symmetric_key(&ephemeral).is_ok());
    }
}
