//! Connectivity health against a full view of the network.
//!
//! Simulations know every address in the network. [`new_peer_pot_map`]
//! derives from that view what each node's neighbourhood should be, and
//! [`Kademlia::health`] compares a live table against it.

use super::{Entry, Kademlia};
use super::depth::depth_for_pot;
use crate::address::Address;
use crate::pot::{DefaultPof, MAX_PO, Pot};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{trace, warn};

/// Expected neighbourhood of one node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerPot {
    /// Nearest neighbours: every address at or deeper than the depth
    pub nn_set: Vec<Address>,
    /// Number of addresses in each bin shallower than the depth
    pub peers_per_bin: Vec<usize>,
}

/// Build the expected [`PeerPot`] of every address in `addrs`.
#[must_use]
pub fn new_peer_pot_map(neighbourhood_size: usize, addrs: &[Address]) -> HashMap<Address, PeerPot> {
    let pof = DefaultPof::default();
    let all = addrs
        .iter()
        .fold(Pot::new(), |pot, addr| pot.add(*addr, &pof).0);

    addrs
        .iter()
        .map(|addr| {
            let depth = depth_for_pot(&all, neighbourhood_size, addr.as_bytes(), &pof);
            let mut nn_set = Vec::new();
            let mut peers_per_bin = vec![0; depth];
            all.each_neighbour(addr.as_bytes(), &pof, |other, po| {
                if po == MAX_PO {
                    return true;
                }
                if po >= depth {
                    nn_set.push(*other);
                } else {
                    peers_per_bin[po] += 1;
                }
                true
            });
            trace!(node = %addr.label(), depth, nn = nn_set.len(), "peer pot");
            (
                *addr,
                PeerPot {
                    nn_set,
                    peers_per_bin,
                },
            )
        })
        .collect()
}

/// Health of a table relative to its expected [`PeerPot`].
#[derive(Debug, Clone, Default)]
pub struct Health {
    /// Every expected neighbour is known
    pub know_nn: bool,
    /// Number of expected neighbours known
    pub count_know_nn: usize,
    /// Expected neighbours not known
    pub missing_know_nn: Vec<Address>,
    /// Every expected neighbour is connected
    pub connect_nn: bool,
    /// Number of expected neighbours connected
    pub count_connect_nn: usize,
    /// Expected neighbours not connected
    pub missing_connect_nn: Vec<Address>,
    /// Every bin shallower than depth has its expected connections, or as
    /// many as there are peers in it
    pub saturated: bool,
    /// Table rendering at the time of the check
    pub hive: String,
}

impl Health {
    /// Strict health: at least one neighbour known, all neighbours known and
    /// connected, and saturated.
    #[must_use]
    pub fn healthy(&self) -> bool {
        self.know_nn && self.connect_nn && self.count_know_nn > 0 && self.saturated
    }
}

/// Split `expected` into found and missing against `present`.
fn compare(expected: &[Address], present: &HashSet<Address>) -> (bool, usize, Vec<Address>) {
    let missing: Vec<Address> = expected
        .iter()
        .filter(|addr| !present.contains(addr))
        .copied()
        .collect();
    (
        missing.is_empty(),
        expected.len() - missing.len(),
        missing,
    )
}

impl Kademlia {
    /// Compare this table with the expected neighbourhood `pp`.
    #[must_use]
    pub fn health(&self, pp: &PeerPot) -> Health {
        let state = self.state.read();
        if pp.nn_set.len() < self.params.neighbourhood_size {
            warn!(
                expected = pp.nn_set.len(),
                neighbourhood_size = self.params.neighbourhood_size,
                "peer pot has fewer neighbours than the neighbourhood size"
            );
        }

        let conns = &state.default_index.conns;
        let addrs = &state.default_index.addrs;
        let base = self.base_key();
        let depth = depth_for_pot(conns, self.params.neighbourhood_size, base, &self.pof);

        let mut known = HashSet::new();
        addrs.each_neighbour(base, &self.pof, |entry, po| {
            if po < depth {
                return false;
            }
            known.insert(*entry.address());
            true
        });
        let mut connected = HashSet::new();
        conns.each_neighbour(base, &self.pof, |entry, po| {
            if po < depth {
                return false;
            }
            connected.insert(*entry.address());
            true
        });

        let (know_nn, count_know_nn, missing_know_nn) = compare(&pp.nn_set, &known);
        let (connect_nn, count_connect_nn, missing_connect_nn) = compare(&pp.nn_set, &connected);
        let saturated = self.is_saturated(conns, &pp.peers_per_bin, depth);

        trace!(
            base = %self.base.label(),
            know_nn,
            connect_nn,
            saturated,
            "health"
        );
        Health {
            know_nn,
            count_know_nn,
            missing_know_nn,
            connect_nn,
            count_connect_nn,
            missing_connect_nn,
            saturated,
            hive: self.render(&state),
        }
    }

    /// Whether every bin shallower than `depth` holds its expected number of
    /// connections, or all the peers the network has in it.
    fn is_saturated(
        &self,
        conns: &Pot<Arc<Entry>>,
        peers_per_bin: &[usize],
        depth: usize,
    ) -> bool {
        if depth != peers_per_bin.len() {
            return false;
        }
        let mut saturated = true;
        conns.each_bin(
            self.base_key(),
            &self.pof,
            0,
            |bin| {
                let po = bin.proximity_order();
                if po >= depth {
                    return false;
                }
                let size = bin.size();
                if size < self.params.expected_min_bin_size(po, depth) && size < peers_per_bin[po] {
                    trace!(po, size, "unsaturated bin");
                    saturated = false;
                }
                true
            },
            true,
        );
        saturated
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{addr_at, base, kad, peer};
    use super::super::PeerAddr;
    use super::*;

    #[test]
    fn test_peer_pot_map() {
        let addrs: Vec<Address> = (0..6).map(|po| addr_at(po, 1)).collect();
        let map = new_peer_pot_map(2, &addrs);
        assert_eq!(map.len(), 6);

        // from addr_at(0, 1), all others are at po 0
        let pp = &map[&addrs[0]];
        assert_eq!(pp.nn_set.len() + pp.peers_per_bin.iter().sum::<usize>(), 5);
        assert!(!pp.nn_set.contains(&addrs[0]));
    }

    #[test]
    fn test_healthy_when_fully_connected() {
        let k = kad();
        let addrs: Vec<Address> = (0..4).map(|po| addr_at(po, 1)).collect();
        for addr in &addrs {
            k.on(peer(*addr));
        }

        let mut all = addrs.clone();
        all.push(base());
        let map = new_peer_pot_map(2, &all);
        let health = k.health(&map[&base()]);
        assert!(health.know_nn);
        assert!(health.connect_nn);
        assert!(health.saturated);
        assert!(health.healthy());
        assert!(health.hive.contains("DEPTH"));
    }

    #[test]
    fn test_unhealthy_when_neighbour_not_connected() {
        let k = kad();
        let addrs: Vec<Address> = (0..4).map(|po| addr_at(po, 1)).collect();
        for addr in &addrs[..3] {
            k.on(peer(*addr));
        }
        k.register([PeerAddr::new(addrs[3], vec![])]).unwrap();

        let mut all = addrs.clone();
        all.push(base());
        let map = new_peer_pot_map(2, &all);
        let health = k.health(&map[&base()]);
        assert!(!health.connect_nn);
        assert!(health.missing_connect_nn.contains(&addrs[3]));
        assert!(!health.healthy());
    }

    #[test]
    fn test_empty_table_is_unhealthy() {
        let k = kad();
        let health = k.health(&PeerPot::default());
        assert!(!health.healthy());
    }
}
