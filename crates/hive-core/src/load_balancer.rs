//! Spreads forwarding load across the peers of each bin.
//!
//! The balancer counts how often each connected peer was used and hands out
//! the peers of every bin least used first. A newly connected peer starts at
//! the lowest count of its bin, so it is neither flooded nor starved.

use dashmap::DashMap;
use hive_discovery::{Address, Kademlia, Peer, PeerEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Peers of one bin, least used first.
#[derive(Debug, Clone)]
pub struct BalancedBin {
    /// Proximity order of the bin relative to the pivot
    pub po: usize,
    /// Peers in the bin with their use counts
    pub peers: Vec<(Arc<Peer>, u64)>,
}

/// Use counts of connected peers.
pub struct LoadBalancer {
    kademlia: Arc<Kademlia>,
    counts: Arc<DashMap<Address, u64>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl LoadBalancer {
    /// Create a balancer over the connections of `kademlia`.
    #[must_use]
    pub fn new(kademlia: Arc<Kademlia>) -> Self {
        Self {
            kademlia,
            counts: Arc::new(DashMap::new()),
            listener: Mutex::new(None),
        }
    }

    /// Start following connection changes. Must be called within a tokio
    /// runtime.
    pub fn start(&self) {
        let mut listener = self.listener.lock();
        if listener.is_some() {
            return;
        }
        let events = self.kademlia.subscribe_to_peer_changes();
        let kademlia = Arc::clone(&self.kademlia);
        let counts = Arc::clone(&self.counts);
        *listener = Some(tokio::spawn(follow_peers(events, kademlia, counts)));
    }

    /// Stop following connection changes.
    pub fn stop(&self) {
        if let Some(handle) = self.listener.lock().take() {
            handle.abort();
        }
    }

    /// Record a successful send to `peer`.
    pub fn add_use_count(&self, peer: &Address) {
        *self.counts.entry(*peer).or_insert(0) += 1;
    }

    /// Sends recorded for `peer`.
    #[must_use]
    pub fn use_count(&self, peer: &Address) -> Option<u64> {
        self.counts.get(peer).map(|count| *count)
    }

    /// Connection bins relative to `pivot`, closest first, each with its
    /// peers sorted least used first.
    ///
    /// Peers without a recorded count rank at the lowest count of their bin.
    #[must_use]
    pub fn bins_desc(&self, pivot: &[u8]) -> Vec<BalancedBin> {
        let mut bins = Vec::new();
        self.kademlia.each_bin_desc(pivot, 0, |bin| {
            let mut peers: Vec<(Arc<Peer>, Option<u64>)> = Vec::with_capacity(bin.size());
            bin.each(|entry| {
                if let Some(peer) = entry.conn() {
                    peers.push((Arc::clone(peer), self.use_count(peer.address())));
                }
                true
            });
            let floor = peers.iter().filter_map(|(_, c)| *c).min().unwrap_or(0);
            let mut peers: Vec<(Arc<Peer>, u64)> = peers
                .into_iter()
                .map(|(peer, count)| (peer, count.unwrap_or(floor)))
                .collect();
            peers.sort_by_key(|(_, count)| *count);
            bins.push(BalancedBin {
                po: bin.proximity_order(),
                peers,
            });
            true
        });
        bins
    }
}

impl Drop for LoadBalancer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn follow_peers(
    mut events: broadcast::Receiver<PeerEvent>,
    kademlia: Arc<Kademlia>,
    counts: Arc<DashMap<Address, u64>>,
) {
    loop {
        match events.recv().await {
            Ok(event) if event.on => {
                let floor = bin_floor(&kademlia, &counts, &event.address);
                counts.entry(event.address).or_insert(floor);
                trace!(peer = %event.address.label(), count = floor, "seeded use count");
            }
            Ok(event) => {
                counts.remove(&event.address);
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "load balancer missed peer events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("load balancer stopped following peers");
}

/// Lowest use count among the other peers in the bin of `peer`.
fn bin_floor(kademlia: &Kademlia, counts: &DashMap<Address, u64>, peer: &Address) -> u64 {
    let po = kademlia.base().proximity(peer);
    let mut floor = None;
    kademlia.each_bin_desc(kademlia.base().as_bytes(), po, |bin| {
        if bin.proximity_order() != po {
            return true;
        }
        bin.each(|entry| {
            if entry.address() != peer {
                if let Some(count) = counts.get(entry.address()) {
                    floor = Some(floor.map_or(*count, |f: u64| f.min(*count)));
                }
            }
            true
        });
        false
    });
    floor.unwrap_or(0)
}
