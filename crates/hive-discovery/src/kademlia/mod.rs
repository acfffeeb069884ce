//! Kademlia connectivity table.
//!
//! The table keeps two proximity tries relative to this node's base address:
//! every known peer address, and the live connections. Named capability
//! indices keep the same pair restricted to peers advertising a capability.
//!
//! # Architecture
//!
//! ```text
//!              register / on / off
//!                      │
//!        ┌─────────────▼──────────────┐
//!        │ RwLock<State>              │
//!        │  default: addrs  conns     │──► depth (watch)
//!        │  "index": addrs  conns     │──► peer events (broadcast)
//!        └─────────────┬──────────────┘
//!                      │ snapshot (Arc clone)
//!        each_conn / each_addr / each_bin_desc / suggest_peer
//! ```
//!
//! Mutations take the write lock, swap in new trie roots and recompute the
//! neighbourhood depth. Queries clone the current roots under the read lock
//! and iterate the snapshot without holding it.

mod capability;
mod depth;
mod entry;
mod error;
mod health;
mod info;
mod params;
mod suggest;

pub use capability::{Capabilities, Capability, CapabilityError, MAX_FLAGS};
pub use entry::{Entry, Peer, PeerAddr};
pub use error::KademliaError;
pub use health::{Health, PeerPot, new_peer_pot_map};
pub use info::KademliaInfo;
pub use params::{KadParams, ReachableFn};
pub use suggest::Suggestion;

use crate::address::Address;
use crate::pot::{Bin, DefaultPof, Keyed, MAX_PO, Pof, Pot, Update, distance_cmp};
use depth::depth_for_pot;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace, warn};

/// Capacity of the peer event channel.
pub const PEER_EVENT_CAPACITY: usize = 100;

/// Bin of connected entries passed to [`Kademlia::each_bin_desc`].
pub type PeerBin<'a> = Bin<'a, Arc<Entry>>;

/// A peer joined or left the connection table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEvent {
    /// Overlay address of the peer
    pub address: Address,
    /// Proximity order to the base address
    pub po: usize,
    /// Whether the peer connected
    pub on: bool,
}

/// A pair of tries restricted to peers matching a capability.
#[derive(Clone)]
struct CapabilityIndex {
    capability: Option<Capability>,
    conns: Pot<Arc<Entry>>,
    addrs: Pot<Arc<Entry>>,
    depth: usize,
}

impl CapabilityIndex {
    fn new(capability: Option<Capability>) -> Self {
        Self {
            capability,
            conns: Pot::new(),
            addrs: Pot::new(),
            depth: 0,
        }
    }

    fn matches(&self, entry: &Entry) -> bool {
        self.capability
            .as_ref()
            .is_none_or(|cap| entry.peer_addr().capabilities.matches(cap))
    }
}

struct State {
    default_index: CapabilityIndex,
    indices: BTreeMap<String, CapabilityIndex>,
    saturation_depth: u8,
    capabilities: Capabilities,
}

impl State {
    fn index_addr<P: Pof + ?Sized>(&mut self, entry: &Arc<Entry>, pof: &P) {
        for (name, idx) in &mut self.indices {
            if idx.matches(entry) {
                trace!(index = %name, peer = %entry.address().label(), "indexed address");
                idx.addrs = idx.addrs.add(Arc::clone(entry), pof).0;
            }
        }
    }

    fn index_conn<P: Pof + ?Sized>(&mut self, entry: &Arc<Entry>, pof: &P) {
        for (name, idx) in &mut self.indices {
            if idx.matches(entry) {
                trace!(index = %name, peer = %entry.address().label(), "indexed connection");
                idx.conns = idx.conns.add(Arc::clone(entry), pof).0;
            }
        }
    }

    /// Drop the connection under `key` from every index and mark the address
    /// entries offline.
    fn unindex_conn<P: Pof + ?Sized>(&mut self, key: &[u8], offline: &Arc<Entry>, pof: &P) {
        for idx in self.indices.values_mut() {
            let swapped = idx.conns.swap(key, pof, |_| Update::Remove);
            if swapped.changed {
                idx.conns = swapped.pot;
            }
            let swapped = idx.addrs.swap(key, pof, |existing| match existing {
                Some(_) => Update::Set(Arc::clone(offline)),
                None => Update::Keep,
            });
            idx.addrs = swapped.pot;
        }
    }
}

/// Kademlia table of known and connected peers.
pub struct Kademlia {
    base: Address,
    params: KadParams,
    pof: DefaultPof,
    state: RwLock<State>,
    depth: watch::Sender<usize>,
    peer_events: broadcast::Sender<PeerEvent>,
}

impl Kademlia {
    /// Create a table for base address `base`.
    ///
    /// # Errors
    ///
    /// Returns [`KademliaError::InvalidParams`] if `params` fails validation.
    pub fn new(base: Address, params: KadParams) -> Result<Self, KademliaError> {
        params.validate()?;
        let (depth, _) = watch::channel(0);
        let (peer_events, _) = broadcast::channel(PEER_EVENT_CAPACITY);
        Ok(Self {
            base,
            params,
            pof: DefaultPof::default(),
            state: RwLock::new(State {
                default_index: CapabilityIndex::new(None),
                indices: BTreeMap::new(),
                saturation_depth: 0,
                capabilities: Capabilities::new(),
            }),
            depth,
            peer_events,
        })
    }

    /// Base address of the table.
    #[must_use]
    pub fn base(&self) -> &Address {
        &self.base
    }

    /// Table parameters.
    #[must_use]
    pub fn params(&self) -> &KadParams {
        &self.params
    }

    /// Proximity function used by every trie in the table.
    #[must_use]
    pub fn pof(&self) -> &DefaultPof {
        &self.pof
    }

    fn base_key(&self) -> &[u8] {
        self.base.key()
    }

    /// Advertise `capability` for this node.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Duplicate`] if a capability with the same
    /// id is already advertised.
    pub fn add_capability(&self, capability: Capability) -> Result<(), CapabilityError> {
        self.state.write().capabilities.add(capability)
    }

    /// Capabilities this node advertises.
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.state.read().capabilities.clone()
    }

    /// Add a named index for peers matching `capability`.
    ///
    /// Known addresses and live connections that match are added right away.
    ///
    /// # Errors
    ///
    /// Returns [`KademliaError::EmptyIndexName`] or
    /// [`KademliaError::DuplicateIndex`].
    pub fn register_capability_index(
        &self,
        name: &str,
        capability: Capability,
    ) -> Result<(), KademliaError> {
        if name.is_empty() {
            return Err(KademliaError::EmptyIndexName);
        }
        let mut state = self.state.write();
        if state.indices.contains_key(name) {
            return Err(KademliaError::DuplicateIndex(name.to_string()));
        }

        let mut index = CapabilityIndex::new(Some(capability));
        state.default_index.addrs.each(|entry| {
            if index.matches(entry) {
                index.addrs = index.addrs.add(Arc::clone(entry), &self.pof).0;
            }
            true
        });
        state.default_index.conns.each(|entry| {
            if index.matches(entry) {
                index.conns = index.conns.add(Arc::clone(entry), &self.pof).0;
            }
            true
        });
        index.depth = depth_for_pot(
            &index.conns,
            self.params.neighbourhood_size,
            self.base_key(),
            &self.pof,
        );

        debug!(
            index = name,
            capability = %capability,
            known = index.addrs.size(),
            connected = index.conns.size(),
            "registered capability index"
        );
        state.indices.insert(name.to_string(), index);
        Ok(())
    }

    /// Add peer records to the known addresses.
    ///
    /// A record for an already known peer is kept unless its underlay
    /// changed, in which case it replaces the old record as a fresh entry
    /// (keeping a live connection if there is one).
    ///
    /// # Errors
    ///
    /// Returns [`KademliaError::SelfAddress`] if any record carries the base
    /// address. Nothing is registered in that case.
    pub fn register<I>(&self, peers: I) -> Result<(), KademliaError>
    where
        I: IntoIterator<Item = PeerAddr>,
    {
        let peers: Vec<Arc<PeerAddr>> = peers.into_iter().map(Arc::new).collect();
        if let Some(own) = peers.iter().find(|p| p.overlay == self.base) {
            return Err(KademliaError::SelfAddress(own.overlay));
        }

        let mut state = self.state.write();
        for addr in peers {
            let mut stored = None;
            let swapped = state
                .default_index
                .addrs
                .swap(addr.key(), &self.pof, |existing| {
                    let entry = match existing {
                        None => {
                            trace!(peer = %addr.overlay.label(), "registering new peer");
                            Arc::new(Entry::offline(Arc::clone(&addr)))
                        }
                        Some(old) if old.peer_addr().underlay != addr.underlay => {
                            trace!(peer = %addr.overlay.label(), "underlay changed, replacing record");
                            Arc::new(old.replace_addr(Arc::clone(&addr)))
                        }
                        Some(old) => {
                            stored = Some(Arc::clone(old));
                            return Update::Keep;
                        }
                    };
                    stored = Some(Arc::clone(&entry));
                    Update::Set(entry)
                });
            state.default_index.addrs = swapped.pot;
            if let Some(entry) = stored {
                state.index_addr(&entry, &self.pof);
            }
        }

        self.set_neighbourhood_depth(&mut state);
        Ok(())
    }

    /// Add a live connection.
    ///
    /// Returns the saturation depth and whether it changed.
    pub fn on(&self, peer: Arc<Peer>) -> (u8, bool) {
        let entry = Arc::new(Entry::connected(Arc::clone(&peer)));
        let po = self.base.proximity(peer.address());

        let mut state = self.state.write();
        let mut inserted = false;
        let swapped = state
            .default_index
            .conns
            .swap(peer.key(), &self.pof, |existing| match existing {
                None => {
                    inserted = true;
                    Update::Set(Arc::clone(&entry))
                }
                Some(_) => Update::Keep,
            });
        state.default_index.conns = swapped.pot;

        if inserted {
            state.index_conn(&entry, &self.pof);
            let swapped = state
                .default_index
                .addrs
                .swap(peer.key(), &self.pof, |_| Update::Set(Arc::clone(&entry)));
            state.default_index.addrs = swapped.pot;
            state.index_addr(&entry, &self.pof);
            debug!(peer = %peer.address().label(), po, "peer connected");
        }

        let _ = self.peer_events.send(PeerEvent {
            address: *peer.address(),
            po,
            on: true,
        });

        let depth = u8::try_from(self.saturation_of(&state)).unwrap_or(u8::MAX);
        let changed = depth != state.saturation_depth;
        state.saturation_depth = depth;
        self.set_neighbourhood_depth(&mut state);
        (depth, changed)
    }

    /// Remove a live connection, keeping the peer as a known address.
    pub fn off(&self, peer: &Peer) {
        let po = self.base.proximity(peer.address());
        let offline = Arc::new(Entry::offline(Arc::clone(peer.peer_addr())));

        let mut state = self.state.write();
        let swapped = state
            .default_index
            .addrs
            .swap(peer.key(), &self.pof, |existing| match existing {
                Some(_) => Update::Set(Arc::clone(&offline)),
                None => {
                    warn!(peer = %peer.address().label(), "disconnected peer not among known addresses");
                    Update::Keep
                }
            });
        state.default_index.addrs = swapped.pot;

        let swapped = state
            .default_index
            .conns
            .swap(peer.key(), &self.pof, |_| Update::Remove);
        state.default_index.conns = swapped.pot;
        state.unindex_conn(peer.key(), &offline, &self.pof);
        self.set_neighbourhood_depth(&mut state);
        drop(state);

        debug!(peer = %peer.address().label(), po, "peer disconnected");
        let _ = self.peer_events.send(PeerEvent {
            address: *peer.address(),
            po,
            on: false,
        });
    }

    /// Recompute the neighbourhood depth of every index and notify depth
    /// subscribers if the default depth changed.
    fn set_neighbourhood_depth(&self, state: &mut State) {
        let nsize = self.params.neighbourhood_size;
        let depth = depth_for_pot(&state.default_index.conns, nsize, self.base_key(), &self.pof);
        state.default_index.depth = depth;
        for idx in state.indices.values_mut() {
            idx.depth = depth_for_pot(&idx.conns, nsize, self.base_key(), &self.pof);
        }

        let changed = self.depth.send_if_modified(|current| {
            if *current == depth {
                return false;
            }
            *current = depth;
            true
        });
        if changed {
            debug!(depth, "neighbourhood depth changed");
        }
    }

    /// Current neighbourhood depth.
    #[must_use]
    pub fn neighbourhood_depth(&self) -> usize {
        *self.depth.borrow()
    }

    /// Neighbourhood depth of the capability index `name`.
    ///
    /// # Errors
    ///
    /// Returns [`KademliaError::UnknownIndex`] if no such index exists.
    pub fn neighbourhood_depth_capability(&self, name: &str) -> Result<usize, KademliaError> {
        self.state
            .read()
            .indices
            .get(name)
            .map(|idx| idx.depth)
            .ok_or_else(|| KademliaError::UnknownIndex(name.to_string()))
    }

    /// Receive depth changes.
    ///
    /// The receiver holds the latest depth; changes between reads coalesce.
    /// Dropping the receiver unsubscribes.
    #[must_use]
    pub fn subscribe_to_neighbourhood_depth_change(&self) -> watch::Receiver<usize> {
        self.depth.subscribe()
    }

    /// Receive connect and disconnect events.
    #[must_use]
    pub fn subscribe_to_peer_changes(&self) -> broadcast::Receiver<PeerEvent> {
        self.peer_events.subscribe()
    }

    /// Smallest proximity order whose bin holds fewer connections than
    /// expected, stopping at the neighbourhood radius.
    #[must_use]
    pub fn saturation(&self) -> usize {
        let state = self.state.read();
        self.saturation_of(&state)
    }

    fn saturation_of(&self, state: &State) -> usize {
        let conns = &state.default_index.conns;
        let nsize = self.params.neighbourhood_size;
        let radius = depth::neighbourhood_radius(conns, nsize, self.base_key(), &self.pof);
        let depth = depth_for_pot(conns, nsize, self.base_key(), &self.pof);

        let mut prev: isize = -1;
        conns.each_bin(
            self.base_key(),
            &self.pof,
            0,
            |bin| {
                prev += 1;
                let po = bin.proximity_order();
                if po >= radius {
                    return false;
                }
                prev == po as isize && bin.size() >= self.params.expected_min_bin_size(po, depth)
            },
            true,
        );
        usize::try_from(prev).unwrap_or(0)
    }

    /// Number of live connections.
    #[must_use]
    pub fn conn_count(&self) -> usize {
        self.state.read().default_index.conns.size()
    }

    /// Number of known addresses, connected ones included.
    #[must_use]
    pub fn addr_count(&self) -> usize {
        self.state.read().default_index.addrs.size()
    }

    fn conns_snapshot(&self, index: Option<&str>) -> Result<Pot<Arc<Entry>>, KademliaError> {
        let state = self.state.read();
        match index {
            None => Ok(state.default_index.conns.clone()),
            Some(name) => state
                .indices
                .get(name)
                .map(|idx| idx.conns.clone())
                .ok_or_else(|| KademliaError::UnknownIndex(name.to_string())),
        }
    }

    fn addrs_snapshot(&self, index: Option<&str>) -> Result<Pot<Arc<Entry>>, KademliaError> {
        let state = self.state.read();
        match index {
            None => Ok(state.default_index.addrs.clone()),
            Some(name) => state
                .indices
                .get(name)
                .map(|idx| idx.addrs.clone())
                .ok_or_else(|| KademliaError::UnknownIndex(name.to_string())),
        }
    }

    /// Visit live peers closest-first relative to `base` (the table's base
    /// address when `None`), skipping peers closer than `max_po`.
    pub fn each_conn<F>(&self, base: Option<&[u8]>, max_po: usize, f: F)
    where
        F: FnMut(&Arc<Peer>, usize) -> bool,
    {
        let conns = self.state.read().default_index.conns.clone();
        self.each_conn_in(&conns, base, max_po, f);
    }

    /// [`Kademlia::each_conn`] over the capability index `index`.
    ///
    /// # Errors
    ///
    /// Returns [`KademliaError::UnknownIndex`] if no such index exists.
    pub fn each_conn_filtered<F>(
        &self,
        base: Option<&[u8]>,
        index: &str,
        max_po: usize,
        f: F,
    ) -> Result<(), KademliaError>
    where
        F: FnMut(&Arc<Peer>, usize) -> bool,
    {
        let conns = self.conns_snapshot(Some(index))?;
        self.each_conn_in(&conns, base, max_po, f);
        Ok(())
    }

    fn each_conn_in<F>(&self, conns: &Pot<Arc<Entry>>, base: Option<&[u8]>, max_po: usize, mut f: F)
    where
        F: FnMut(&Arc<Peer>, usize) -> bool,
    {
        let base = base.unwrap_or(self.base_key());
        conns.each_neighbour(base, &self.pof, |entry, po| {
            if po > max_po {
                return true;
            }
            match entry.conn() {
                Some(peer) => f(peer, po),
                None => true,
            }
        });
    }

    /// Visit known addresses closest-first relative to `base` (the table's
    /// base address when `None`), skipping addresses closer than `max_po`.
    pub fn each_addr<F>(&self, base: Option<&[u8]>, max_po: usize, f: F)
    where
        F: FnMut(&Arc<PeerAddr>, usize) -> bool,
    {
        let addrs = self.state.read().default_index.addrs.clone();
        self.each_addr_in(&addrs, base, max_po, f);
    }

    /// [`Kademlia::each_addr`] over the capability index `index`.
    ///
    /// # Errors
    ///
    /// Returns [`KademliaError::UnknownIndex`] if no such index exists.
    pub fn each_addr_filtered<F>(
        &self,
        base: Option<&[u8]>,
        index: &str,
        max_po: usize,
        f: F,
    ) -> Result<(), KademliaError>
    where
        F: FnMut(&Arc<PeerAddr>, usize) -> bool,
    {
        let addrs = self.addrs_snapshot(Some(index))?;
        self.each_addr_in(&addrs, base, max_po, f);
        Ok(())
    }

    fn each_addr_in<F>(&self, addrs: &Pot<Arc<Entry>>, base: Option<&[u8]>, max_po: usize, mut f: F)
    where
        F: FnMut(&Arc<PeerAddr>, usize) -> bool,
    {
        let base = base.unwrap_or(self.base_key());
        addrs.each_neighbour(base, &self.pof, |entry, po| {
            if po > max_po {
                return true;
            }
            f(entry.peer_addr(), po)
        });
    }

    /// Visit bins of live peers closest-first relative to `base`, stopping
    /// below `min_po`.
    pub fn each_bin_desc<F>(&self, base: &[u8], min_po: usize, consume: F)
    where
        F: FnMut(&PeerBin<'_>) -> bool,
    {
        let conns = self.state.read().default_index.conns.clone();
        conns.each_bin(base, &self.pof, min_po, consume, false);
    }

    /// [`Kademlia::each_bin_desc`] over the capability index `index`.
    ///
    /// # Errors
    ///
    /// Returns [`KademliaError::UnknownIndex`] if no such index exists.
    pub fn each_bin_desc_filtered<F>(
        &self,
        base: &[u8],
        index: &str,
        min_po: usize,
        consume: F,
    ) -> Result<(), KademliaError>
    where
        F: FnMut(&PeerBin<'_>) -> bool,
    {
        let conns = self.conns_snapshot(Some(index))?;
        conns.each_bin(base, &self.pof, min_po, consume, false);
        Ok(())
    }

    /// Whether no live peer passing `filter` is closer to `addr` than this
    /// node.
    ///
    /// Peers at the same proximity order as this node are compared by XOR
    /// distance.
    pub fn is_closest_to<F>(&self, addr: &[u8], filter: F) -> bool
    where
        F: Fn(&Peer) -> bool,
    {
        let (my_po, _) = self.pof.pof(addr, self.base_key(), 0);
        let mut closest = true;
        self.each_conn(Some(addr), MAX_PO, |peer, po| {
            if !filter(peer) {
                return true;
            }
            if po != my_po {
                closest = po < my_po;
                return false;
            }
            if distance_cmp(addr, peer.key(), self.base_key()) == Ordering::Less {
                closest = false;
                return false;
            }
            true
        });
        closest
    }

    /// Whether `addr` falls within the neighbourhood depth.
    #[must_use]
    pub fn is_within_depth(&self, addr: &[u8]) -> bool {
        let (po, _) = self.pof.pof(addr, self.base_key(), 0);
        po >= self.neighbourhood_depth()
    }
}
