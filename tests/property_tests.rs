//! Property-based tests for Hive
//!
//! Uses proptest to verify trie, topology and envelope invariants across
//! large input spaces.

use proptest::prelude::*;
use std::collections::BTreeSet;

/// Two-byte keys keep the trie dense enough that bins collide often.
type Key = [u8; 2];

fn keys() -> impl Strategy<Value = Vec<Key>> {
    prop::collection::vec(any::<Key>(), 0..64)
}

// ============================================================================
// Proximity Trie Properties
// ============================================================================

mod trie_properties {
    use super::*;
    use hive_discovery::pot::{DefaultPof, MAX_PO, Pof, Pot};
    use parking_lot::Mutex;
    use std::sync::Arc;

    const POF: DefaultPof = DefaultPof::new(16);

    fn build(values: &[Key]) -> Pot<Key> {
        values
            .iter()
            .fold(Pot::new(), |pot, v| pot.add(*v, &POF).0)
    }

    fn contents(pot: &Pot<Key>) -> BTreeSet<Key> {
        let mut set = BTreeSet::new();
        pot.each(|v| {
            set.insert(*v);
            true
        });
        set
    }

    proptest! {
        /// Size matches the number of values visited, with no repeats
        #[test]
        fn size_matches_each(values in keys()) {
            let pot = build(&values);
            let mut visited = Vec::new();
            pot.each(|v| {
                visited.push(*v);
                true
            });
            let distinct: BTreeSet<Key> = values.iter().copied().collect();
            prop_assert_eq!(pot.size(), visited.len());
            prop_assert_eq!(pot.size(), distinct.len());
            prop_assert_eq!(visited.into_iter().collect::<BTreeSet<_>>(), distinct);
        }

        /// Adding then removing a new value restores size and membership
        #[test]
        fn add_remove_roundtrip(values in keys(), v in any::<Key>()) {
            let pot = build(&values);
            prop_assume!(!contents(&pot).contains(&v));

            let (added, _, found) = pot.add(v, &POF);
            prop_assert!(!found);
            prop_assert_eq!(added.size(), pot.size() + 1);

            let (removed, _, found) = added.remove(&v, &POF);
            prop_assert!(found);
            prop_assert_eq!(removed.size(), pot.size());
            prop_assert_eq!(contents(&removed), contents(&pot));
        }

        /// A second add of the same key reports it found and keeps the size
        #[test]
        fn add_is_idempotent(values in keys(), v in any::<Key>()) {
            let pot = build(&values);
            let (once, _, _) = pot.add(v, &POF);
            let (twice, _, found) = once.add(v, &POF);
            prop_assert!(found);
            prop_assert_eq!(twice.size(), once.size());
            prop_assert!(twice.size() <= pot.size() + 1);
        }

        /// Mutations leave earlier roots untouched
        #[test]
        fn mutation_is_persistent(values in keys(), v in any::<Key>()) {
            let pot = build(&values);
            let before = contents(&pot);
            let _ = pot.add(v, &POF);
            if let Some(first) = values.first() {
                let _ = pot.remove(first, &POF);
            }
            prop_assert_eq!(contents(&pot), before);
        }

        /// Removing an absent key returns the same root
        #[test]
        fn remove_absent_is_noop(values in keys(), v in any::<Key>()) {
            let pot = build(&values);
            prop_assume!(!contents(&pot).contains(&v));
            let (same, _, found) = pot.remove(&v, &POF);
            prop_assert!(!found);
            prop_assert!(same.ptr_eq(&pot));
        }

        /// Bins cover every value exactly once, in proximity order
        #[test]
        fn each_bin_covers_all(values in keys(), pivot in any::<Key>(), ascending in any::<bool>()) {
            let pot = build(&values);
            let mut pos = Vec::new();
            let mut seen = Vec::new();
            pot.each_bin(&pivot, &POF, 0, |bin| {
                pos.push(bin.proximity_order());
                bin.each(|v| {
                    if *v != pivot {
                        assert_eq!(POF.pof(&pivot, v, 0).0, bin.proximity_order());
                    }
                    seen.push(*v);
                    true
                });
                true
            }, ascending);

            let mut sorted = pos.clone();
            sorted.dedup();
            prop_assert_eq!(sorted.len(), pos.len(), "bin orders repeat: {:?}", pos);
            for pair in pos.windows(2) {
                if ascending {
                    prop_assert!(pair[0] < pair[1]);
                } else {
                    prop_assert!(pair[0] > pair[1]);
                }
            }
            prop_assert_eq!(seen.len(), pot.size());
            prop_assert_eq!(seen.into_iter().collect::<BTreeSet<_>>(), contents(&pot));
        }

        /// Bins below the minimum order are skipped
        #[test]
        fn each_bin_respects_min_po(values in keys(), pivot in any::<Key>(), min_po in 0usize..16) {
            let pot = build(&values);
            let mut count = 0;
            pot.each_bin(&pivot, &POF, min_po, |bin| {
                assert!(bin.proximity_order() >= min_po);
                count += bin.size();
                true
            }, true);
            let expected = contents(&pot)
                .iter()
                .filter(|v| POF.pof(&pivot, *v, 0).0 >= min_po)
                .count();
            prop_assert_eq!(count, expected);
        }

        /// Neighbours arrive closest first
        #[test]
        fn each_neighbour_non_increasing(values in keys(), pivot in any::<Key>()) {
            let pot = build(&values);
            let mut pos = Vec::new();
            pot.each_neighbour(&pivot, &POF, |v, po| {
                if *v != pivot {
                    assert_eq!(POF.pof(&pivot, v, 0).0, po);
                }
                pos.push(po);
                true
            });
            prop_assert_eq!(pos.len(), pot.size());
            for pair in pos.windows(2) {
                prop_assert!(pair[0] >= pair[1], "orders increased: {:?}", pos);
            }
        }

        /// Union size is the sum less the keys in common
        #[test]
        fn union_counts_common(left in keys(), right in keys()) {
            let a = build(&left);
            let b = build(&right);
            let (merged, common) = a.union(&b, &POF);

            let sa = contents(&a);
            let sb = contents(&b);
            prop_assert_eq!(common, sa.intersection(&sb).count());
            prop_assert_eq!(merged.size(), a.size() + b.size() - common);
            prop_assert_eq!(contents(&merged), sa.union(&sb).copied().collect::<BTreeSet<_>>());
            // inputs are untouched
            prop_assert_eq!(contents(&a), sa);
            prop_assert_eq!(contents(&b), sb);
        }

        /// Concurrent visits never exceed the quota or repeat a value
        #[test]
        fn async_visit_respects_quota(values in keys(), pivot in any::<Key>(), max in 0usize..80) {
            let pot = build(&values);
            let visited = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&visited);
            pot.each_neighbour_async(&pivot, &POF, max, MAX_PO, move |v: &Key, _| {
                sink.lock().push(*v);
            }, true);

            let visited = visited.lock();
            prop_assert!(visited.len() <= max);
            let distinct: BTreeSet<Key> = visited.iter().copied().collect();
            prop_assert_eq!(distinct.len(), visited.len());
        }
    }
}

// ============================================================================
// Topology Properties
// ============================================================================

mod topology_properties {
    use super::*;
    use hive_discovery::{Address, KadParams, Kademlia, Peer, PeerAddr};
    use hive_integration_tests::addr_at_po;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    /// Peers placed at chosen proximity orders from an all-zero base.
    fn placements() -> impl Strategy<Value = Vec<(usize, u8)>> {
        prop::collection::vec((0usize..12, any::<u8>()), 1..24)
    }

    /// Depth recomputed from the connection proximities alone.
    fn reference_depth(pos: &[usize], nsize: usize) -> usize {
        if pos.len() <= nsize {
            return 0;
        }
        let mut desc = pos.to_vec();
        desc.sort_unstable_by(|a, b| b.cmp(a));
        let radius = desc[nsize - 1];
        let present: BTreeSet<usize> = pos.iter().copied().collect();
        let mut depth = 0;
        while depth < radius && present.contains(&depth) {
            depth += 1;
        }
        depth
    }

    fn connected_pos(kad: &Kademlia) -> Vec<usize> {
        let mut pos = Vec::new();
        kad.each_conn(None, 255, |_, po| {
            pos.push(po);
            true
        });
        pos
    }

    proptest! {
        /// Depth stays within the radius and every shallower bin is known
        #[test]
        fn depth_within_radius(placed in placements(), drop_mask in any::<u32>()) {
            let base = Address::from_bytes([0u8; 32]);
            let kad = Kademlia::new(base, KadParams::default()).unwrap();
            let nsize = kad.params().neighbourhood_size;

            let mut peers = BTreeMap::new();
            for (po, tail) in placed {
                let address = addr_at_po(&base, po, u64::from(tail) + 1);
                peers.entry(address).or_insert_with(|| {
                    Arc::new(Peer::new(PeerAddr::new(address, Vec::new())))
                });
            }
            for peer in peers.values() {
                kad.on(Arc::clone(peer));
            }
            for (i, peer) in peers.values().enumerate() {
                if drop_mask & (1 << (i % 32)) != 0 {
                    kad.off(peer);
                }
            }

            let pos = connected_pos(&kad);
            let depth = kad.neighbourhood_depth();
            prop_assert_eq!(depth, reference_depth(&pos, nsize));

            let mut known = BTreeSet::new();
            kad.each_addr(None, 255, |_, po| {
                known.insert(po);
                true
            });
            prop_assert_eq!(kad.addr_count(), peers.len());
            for po in 0..depth {
                prop_assert!(known.contains(&po), "bin {} empty below depth {}", po, depth);
            }
        }

        /// Connections and known addresses are counted apart
        #[test]
        fn off_keeps_address_known(placed in placements()) {
            let base = Address::from_bytes([0xffu8; 32]);
            let kad = Kademlia::new(base, KadParams::default()).unwrap();
            let mut peers = BTreeMap::new();
            for (po, tail) in placed {
                let address = addr_at_po(&base, po, u64::from(tail));
                peers.entry(address).or_insert_with(|| {
                    Arc::new(Peer::new(PeerAddr::new(address, Vec::new())))
                });
            }
            for peer in peers.values() {
                kad.on(Arc::clone(peer));
            }
            prop_assert_eq!(kad.conn_count(), peers.len());
            for peer in peers.values() {
                kad.off(peer);
            }
            prop_assert_eq!(kad.conn_count(), 0);
            prop_assert_eq!(kad.addr_count(), peers.len());
            prop_assert_eq!(kad.neighbourhood_depth(), 0);
        }
    }
}

// ============================================================================
// Envelope Properties
// ============================================================================

mod envelope_properties {
    use super::*;
    use hive_core::{Envelope, Flags, Topic, validate_address};

    const MAX_SIZE: usize = 1 << 16;

    proptest! {
        /// Decoding arbitrary bytes fails cleanly instead of panicking
        #[test]
        fn decode_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
            let _ = Envelope::from_bytes(&bytes, MAX_SIZE);
        }

        /// Destinations longer than an address are refused
        #[test]
        fn address_length_is_bounded(to in prop::collection::vec(any::<u8>(), 0..64)) {
            prop_assert_eq!(validate_address(&to).is_ok(), to.len() <= 32);
        }

        /// The digest covers the payload
        #[test]
        fn digest_depends_on_payload(
            to in prop::collection::vec(any::<u8>(), 0..=32),
            payload in prop::collection::vec(any::<u8>(), 1..256),
            flip in any::<prop::sample::Index>(),
        ) {
            let envelope = Envelope::new(to.clone(), Topic::from_name("p"), Flags::raw(), 1, payload.clone()).unwrap();
            let mut altered = payload;
            let i = flip.index(altered.len());
            altered[i] ^= 0x01;
            let other = Envelope::new(to, Topic::from_name("p"), Flags::raw(), 1, altered).unwrap();
            prop_assert_ne!(envelope.digest(), other.digest());
            prop_assert_eq!(envelope.digest(), envelope.clone().digest());
        }
    }
}
