//! Peer suggestion: which known address to dial next.

use super::depth::{depth_for_pot, neighbourhood_radius};
use super::{Entry, Kademlia, PeerAddr, PeerBin};
use crate::pot::{Keyed, MAX_PO, Pof, Pot};
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

/// Jitter applied to the retry exponent, as a fraction.
const RETRY_JITTER: f64 = 0.15;

/// Result of [`Kademlia::suggest_peer`].
#[derive(Debug, Clone, Default)]
pub struct Suggestion {
    /// Address to dial, if any callable one was found
    pub peer: Option<Arc<PeerAddr>>,
    /// New saturation depth when `changed`, otherwise 0
    pub saturation_depth: usize,
    /// Whether the saturation depth decreased since the last report
    pub changed: bool,
}

impl Kademlia {
    /// Suggest a known, unconnected peer to dial.
    ///
    /// Connection bins are scanned shallow to deep and every bin holding
    /// fewer connections than expected is recorded, keyed by its size. Empty
    /// bins count as size 0, and so do the bins between the closest
    /// connection and the closest known address. Bins past the neighbourhood
    /// depth stay unsaturated until every neighbour is connected. Address
    /// bins are then searched smallest size first, shallow to deep, for a
    /// callable entry.
    ///
    /// Each suggestion counts as a dial attempt for the suggested entry.
    pub fn suggest_peer(&self) -> Suggestion {
        let mut state = self.state.write();
        let base = self.base_key();
        let conns = state.default_index.conns.clone();
        let addrs = state.default_index.addrs.clone();
        let nsize = self.params.neighbourhood_size;
        let radius = neighbourhood_radius(&conns, nsize, base, &self.pof);
        let depth = depth_for_pot(&conns, nsize, base, &self.pof);

        let mut saturation: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        let mut last_po = 0;
        let mut saturation_depth: Option<usize> = None;
        let mut past_depth = false;
        let mut current_max_bin_size = self.params.min_bin_size;

        conns.each_bin(
            base,
            &self.pof,
            0,
            |bin| {
                let po = bin.proximity_order();
                let mut size = bin.size();
                let expected = self.params.expected_min_bin_size(po, depth);
                current_max_bin_size = current_max_bin_size.max(expected);

                // skipped bins are empty, so depth is surely passed
                while last_po < po {
                    saturation_depth.get_or_insert(last_po);
                    past_depth = true;
                    saturation.entry(0).or_default().push(last_po);
                    last_po += 1;
                }
                last_po = po + 1;
                if po >= radius {
                    past_depth = true;
                }
                if past_depth && size >= expected {
                    size = expected - 1;
                }
                if size < expected {
                    saturation_depth.get_or_insert(po);
                    saturation.entry(size).or_default().push(po);
                }
                true
            },
            true,
        );

        // ask for peers closer than the closest connection
        let mut nearest_addr_at = 0;
        addrs.each_neighbour(base, &self.pof, |_, po| {
            nearest_addr_at = po;
            false
        });
        while last_po <= nearest_addr_at {
            saturation.entry(0).or_default().push(last_po);
            last_po += 1;
        }

        if saturation.is_empty() {
            return Suggestion::default();
        }

        let mut suggested = None;
        for size in 0..current_max_bin_size {
            if suggested.is_some() {
                break;
            }
            let Some(bins) = saturation.get(&size) else {
                continue;
            };
            let mut cur = 0;
            addrs.each_bin(
                base,
                &self.pof,
                bins[0],
                |bin| {
                    let po = bin.proximity_order();
                    let mut cur_po = bins[cur];
                    if cur_po == po {
                        cur += 1;
                    } else {
                        // skip unsaturated bins without addresses
                        while cur < bins.len() && cur_po < po {
                            cur_po = bins[cur];
                            cur += 1;
                        }
                        if po < cur_po {
                            cur = cur.saturating_sub(1);
                            return true;
                        }
                        if cur_po < po {
                            return false;
                        }
                    }
                    suggested = self.suggest_peer_in_bin(bin, &conns);
                    cur < bins.len() && suggested.is_none()
                },
                true,
            );
        }

        let depth = saturation_depth.map_or(u8::MAX, |d| u8::try_from(d).unwrap_or(u8::MAX));
        if depth < state.saturation_depth {
            state.saturation_depth = depth;
            return Suggestion {
                peer: suggested,
                saturation_depth: usize::from(depth),
                changed: true,
            };
        }
        Suggestion {
            peer: suggested,
            saturation_depth: 0,
            changed: false,
        }
    }

    fn suggest_peer_in_bin(&self, bin: &PeerBin<'_>, conns: &Pot<Arc<Entry>>) -> Option<Arc<PeerAddr>> {
        if self.params.prefer_address_gaps {
            return self.suggest_peer_in_bin_by_gap(bin, conns);
        }
        self.first_callable(bin)
    }

    fn first_callable(&self, bin: &PeerBin<'_>) -> Option<Arc<PeerAddr>> {
        let mut found = None;
        bin.each(|entry| {
            if self.callable(entry) {
                found = Some(Arc::clone(entry.peer_addr()));
                return false;
            }
            true
        });
        found
    }

    /// Pick the callable address that falls into the biggest gap of the
    /// connections at the same proximity order, or failing that the one
    /// farthest from the gap's reference connection.
    fn suggest_peer_in_bin_by_gap(
        &self,
        bin: &PeerBin<'_>,
        conns: &Pot<Arc<Entry>>,
    ) -> Option<Arc<PeerAddr>> {
        let po = bin.proximity_order();
        let Some((gap_po, gap_ref)) = conns
            .pot_with_po(self.base_key(), po, &self.pof)
            .and_then(|conn_bin| conn_bin.biggest_address_gap())
        else {
            return self.first_callable(bin);
        };

        let mut found = None;
        let mut candidate = None;
        let mut furthest = MAX_PO;
        bin.each(|entry| {
            if !self.callable(entry) {
                return true;
            }
            let (addr_po, _) = self.pof.pof(gap_ref.key(), entry.key(), po);
            if addr_po == gap_po {
                found = Some(Arc::clone(entry.peer_addr()));
                return false;
            }
            if addr_po < furthest {
                furthest = addr_po;
                candidate = Some(Arc::clone(entry.peer_addr()));
            }
            true
        });
        found.or(candidate)
    }

    /// Whether `entry` may be dialed now. Counts a dial attempt if so.
    ///
    /// Connected entries and entries past `max_retries` never are. Otherwise
    /// the time since the entry was recorded allows one more attempt each
    /// time it exceeds `retry_interval` after repeated division by
    /// `retry_exponent` (with jitter).
    pub(crate) fn callable(&self, entry: &Entry) -> bool {
        if entry.is_connected() || entry.retries() > self.params.max_retries {
            return false;
        }

        let jitter = rand::thread_rng().gen_range(-RETRY_JITTER..RETRY_JITTER);
        let div = f64::from(self.params.retry_exponent.max(2)) * (1.0 + jitter);
        let interval = self.params.retry_interval.as_secs_f64();
        let mut delta = entry.seen_at().elapsed().as_secs_f64();
        let mut allowed = 0;
        while delta > interval {
            allowed += 1;
            delta /= div;
        }
        if allowed < entry.retries() {
            trace!(
                peer = %entry.address().label(),
                retries = entry.retries(),
                allowed,
                "not callable yet"
            );
            return false;
        }

        if let Some(reachable) = &self.params.reachable {
            if !reachable(entry.peer_addr()) {
                trace!(peer = %entry.address().label(), "peer not reachable");
                return false;
            }
        }

        entry.record_retry();
        trace!(peer = %entry.address().label(), retries = entry.retries(), "peer callable");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{addr_at, base, kad, peer};
    use super::super::KadParams;
    use super::*;
    use std::time::{Duration, Instant};

    fn aged(secs: u64) -> Entry {
        let mut entry = Entry::offline(Arc::new(PeerAddr::new(addr_at(1, 1), vec![])));
        *entry.seen_at_mut() = Instant::now()
            .checked_sub(Duration::from_secs(secs))
            .unwrap();
        entry
    }

    #[test]
    fn test_fresh_entry_callable_once() {
        let k = kad();
        let entry = Entry::offline(Arc::new(PeerAddr::new(addr_at(1, 1), vec![])));
        assert!(k.callable(&entry));
        assert_eq!(entry.retries(), 1);
        assert!(!k.callable(&entry));
        assert_eq!(entry.retries(), 1);
    }

    #[test]
    fn test_backoff_allows_more_retries_over_time() {
        let k = kad();
        // 10s against 4.2s and an exponent near 2 allows two halvings
        let entry = aged(10);
        assert!(k.callable(&entry));
        assert!(k.callable(&entry));
        assert!(k.callable(&entry));
        assert!(!k.callable(&entry));
        assert_eq!(entry.retries(), 3);
    }

    #[test]
    fn test_connected_not_callable() {
        let k = kad();
        let entry = Entry::connected(peer(addr_at(1, 1)));
        assert!(!k.callable(&entry));
    }

    #[test]
    fn test_max_retries() {
        let k = Kademlia::new(
            base(),
            KadParams {
                max_retries: 0,
                ..KadParams::default()
            },
        )
        .unwrap();
        let entry = aged(100);
        assert!(k.callable(&entry));
        // retries (1) now exceeds max_retries (0)
        assert!(!k.callable(&entry));
    }

    #[test]
    fn test_reachable_predicate() {
        let k = Kademlia::new(
            base(),
            KadParams {
                reachable: Some(Arc::new(|_: &PeerAddr| false)),
                ..KadParams::default()
            },
        )
        .unwrap();
        let entry = aged(100);
        assert!(!k.callable(&entry));
        assert_eq!(entry.retries(), 0);
    }

    #[test]
    fn test_empty_table_suggests_nothing() {
        let k = kad();
        let s = k.suggest_peer();
        assert!(s.peer.is_none());
    }

    #[test]
    fn test_suggests_shallowest_unsaturated_bin() {
        let k = kad();
        k.on(peer(addr_at(3, 1)));
        let known: Vec<_> = (1..=5)
            .flat_map(|po| [PeerAddr::new(addr_at(po, 2), vec![]), PeerAddr::new(addr_at(po, 4), vec![])])
            .collect();
        k.register(known).unwrap();

        // bin 0 has no addresses, bin 1 is the shallowest with some
        let first = k.suggest_peer().peer.unwrap();
        assert_eq!(base().proximity(&first.overlay), 1);
        let second = k.suggest_peer().peer.unwrap();
        assert_eq!(base().proximity(&second.overlay), 1);
        assert_ne!(first.overlay, second.overlay);
        // bin 1 exhausted for now
        let third = k.suggest_peer().peer.unwrap();
        assert_eq!(base().proximity(&third.overlay), 2);
    }

    #[test]
    fn test_saturated_bin_never_suggested() {
        let k = kad();
        // two connections at bin 3 reach min_bin_size, and they are the only
        // addresses known there
        k.on(peer(addr_at(3, 1)));
        k.on(peer(addr_at(3, 2)));
        let known: Vec<_> = [1, 2, 4, 5]
            .into_iter()
            .map(|po| PeerAddr::new(addr_at(po, 8), vec![]))
            .collect();
        k.register(known).unwrap();

        let mut suggested = Vec::new();
        while let Some(p) = k.suggest_peer().peer {
            suggested.push(base().proximity(&p.overlay));
        }
        suggested.sort_unstable();
        assert_eq!(suggested, vec![1, 2, 4, 5]);
    }

    #[test]
    fn test_saturation_depth_decrease_reported() {
        let k = kad();
        k.on(peer(addr_at(3, 1)));
        k.register([PeerAddr::new(addr_at(0, 1), vec![])]).unwrap();
        // saturation after on() is 0, nothing lower to report
        let s = k.suggest_peer();
        assert!(s.peer.is_some());
        assert!(!s.changed);
    }

    #[test]
    fn test_gap_suggestion_prefers_uncovered_region() {
        let k = Kademlia::new(
            base(),
            KadParams {
                prefer_address_gaps: true,
                ..KadParams::default()
            },
        )
        .unwrap();
        // connection in bin 0 at 0x80..; its only gap is one bit deeper
        let conn = {
            let mut b = [0u8; 32];
            b[0] = 0x80;
            crate::Address::from_bytes(b)
        };
        k.on(peer(conn));

        // candidates in bin 0: 0xc0.. falls into the gap at po 1 from conn,
        // 0x81.. shares 7 bits with it
        let close = {
            let mut b = [0u8; 32];
            b[0] = 0x81;
            crate::Address::from_bytes(b)
        };
        let gap = {
            let mut b = [0u8; 32];
            b[0] = 0xc0;
            crate::Address::from_bytes(b)
        };
        k.register([PeerAddr::new(close, vec![]), PeerAddr::new(gap, vec![])])
            .unwrap();

        let first = k.suggest_peer().peer.unwrap();
        assert_eq!(first.overlay, gap);
    }
}
