//! Fuzz target for proximity trie operations
//!
//! Applies arbitrary sequences of inserts, removals and unions and checks the
//! trie against a plain set after every step.

#![no_main]

use arbitrary::Arbitrary;
use hive_discovery::pot::{DefaultPof, Pot, Update};
use libfuzzer_sys::fuzz_target;
use std::collections::BTreeSet;

#[derive(Debug, Arbitrary)]
enum Op {
    Add([u8; 2]),
    Remove([u8; 2]),
    Swap([u8; 2], bool),
    Union(Vec<[u8; 2]>),
}

fuzz_target!(|ops: Vec<Op>| {
    let pof = DefaultPof::new(16);
    let mut pot: Pot<[u8; 2]> = Pot::new();
    let mut model = BTreeSet::new();

    for op in ops {
        match op {
            Op::Add(key) => {
                let (next, _, found) = pot.add(key, &pof);
                assert_eq!(found, !model.insert(key));
                pot = next;
            }
            Op::Remove(key) => {
                let (next, _, found) = pot.remove(&key, &pof);
                assert_eq!(found, model.remove(&key));
                pot = next;
            }
            Op::Swap(key, keep) => {
                let swapped = pot.swap(&key, &pof, |current| match (current, keep) {
                    (_, true) => Update::Keep,
                    (Some(_), false) => Update::Remove,
                    (None, false) => Update::Set(key),
                });
                if !keep && !model.remove(&key) {
                    model.insert(key);
                }
                assert_eq!(swapped.changed, !keep);
                pot = swapped.pot;
            }
            Op::Union(keys) => {
                let other = keys.iter().fold(Pot::new(), |p, k| p.add(*k, &pof).0);
                let (merged, _) = pot.union(&other, &pof);
                model.extend(keys);
                pot = merged;
            }
        }

        assert_eq!(pot.size(), model.len());
        let mut seen = BTreeSet::new();
        pot.each(|v| {
            seen.insert(*v);
            true
        });
        assert_eq!(seen, model);
    }
});
