//! Peer records stored in the topology tries.

use super::capability::Capabilities;
use crate::address::Address;
use crate::pot::Keyed;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

/// A known peer: its overlay address, how to reach it and what it supports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddr {
    /// Overlay address
    pub overlay: Address,
    /// Transport-level address, opaque to the topology
    pub underlay: Vec<u8>,
    /// Advertised capabilities
    pub capabilities: Capabilities,
}

impl PeerAddr {
    /// Peer record without capabilities.
    #[must_use]
    pub fn new(overlay: Address, underlay: impl Into<Vec<u8>>) -> Self {
        Self {
            overlay,
            underlay: underlay.into(),
            capabilities: Capabilities::new(),
        }
    }

    /// Attach advertised capabilities.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

impl Keyed for PeerAddr {
    fn key(&self) -> &[u8] {
        self.overlay.as_bytes()
    }
}

/// A live connection to a peer.
#[derive(Debug)]
pub struct Peer {
    addr: Arc<PeerAddr>,
    connected_at: Instant,
}

impl Peer {
    /// Mark `addr` as connected now.
    #[must_use]
    pub fn new(addr: PeerAddr) -> Self {
        Self {
            addr: Arc::new(addr),
            connected_at: Instant::now(),
        }
    }

    /// Overlay address of the peer.
    #[must_use]
    pub fn address(&self) -> &Address {
        &self.addr.overlay
    }

    /// Full peer record.
    #[must_use]
    pub fn peer_addr(&self) -> &Arc<PeerAddr> {
        &self.addr
    }

    /// Capabilities the peer advertised.
    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.addr.capabilities
    }

    /// When the connection was established.
    #[must_use]
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }
}

impl Keyed for Peer {
    fn key(&self) -> &[u8] {
        self.addr.key()
    }
}

/// Topology entry: a peer record plus dial state.
///
/// Entries in a connection trie always carry the connection. An address trie
/// entry carries it while the peer is connected, so an offline copy of a
/// connected peer never sits in the same slot.
pub struct Entry {
    addr: Arc<PeerAddr>,
    conn: Option<Arc<Peer>>,
    seen_at: Instant,
    retries: AtomicU32,
}

impl Entry {
    /// Offline entry for a known address.
    #[must_use]
    pub fn offline(addr: Arc<PeerAddr>) -> Self {
        Self {
            addr,
            conn: None,
            seen_at: Instant::now(),
            retries: AtomicU32::new(0),
        }
    }

    /// Entry for a live connection.
    #[must_use]
    pub fn connected(peer: Arc<Peer>) -> Self {
        Self {
            addr: Arc::clone(peer.peer_addr()),
            conn: Some(peer),
            seen_at: Instant::now(),
            retries: AtomicU32::new(0),
        }
    }

    /// Fresh record for `addr` that keeps this entry's connection.
    #[must_use]
    pub(crate) fn replace_addr(&self, addr: Arc<PeerAddr>) -> Self {
        Self {
            addr,
            conn: self.conn.clone(),
            seen_at: Instant::now(),
            retries: AtomicU32::new(0),
        }
    }

    #[cfg(test)]
    pub(crate) fn seen_at_mut(&mut self) -> &mut Instant {
        &mut self.seen_at
    }

    /// Overlay address.
    #[must_use]
    pub fn address(&self) -> &Address {
        &self.addr.overlay
    }

    /// Peer record.
    #[must_use]
    pub fn peer_addr(&self) -> &Arc<PeerAddr> {
        &self.addr
    }

    /// Live connection, if any.
    #[must_use]
    pub fn conn(&self) -> Option<&Arc<Peer>> {
        self.conn.as_ref()
    }

    /// Whether the peer is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// When the entry was created.
    #[must_use]
    pub fn seen_at(&self) -> Instant {
        self.seen_at
    }

    /// Dial attempts suggested so far.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::Relaxed)
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Short label: the first 2 address bytes and the retry count.
    #[must_use]
    pub fn label(&self) -> String {
        format!(
            "{} ({})",
            hex::encode(&self.addr.overlay.as_bytes()[..2]),
            self.retries()
        )
    }
}

impl Keyed for Entry {
    fn key(&self) -> &[u8] {
        self.addr.key()
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("address", &self.addr.overlay)
            .field("connected", &self.is_connected())
            .field("retries", &self.retries())
            .finish()
    }
}
