//! Synchronous iteration: whole-set, per-bin and closest-first.

use super::{Keyed, Pof, Pot};

/// Values at one proximity order relative to a pivot.
///
/// Bins are not stored. They are assembled while walking the trie and their
/// values are produced lazily by [`Bin::each`].
pub struct Bin<'a, V> {
    po: usize,
    size: usize,
    values: BinValues<'a, V>,
}

enum BinValues<'a, V> {
    Subtree(&'a Pot<V>),
    Pin(&'a V),
    From(&'a Pot<V>, usize),
}

impl<V> Bin<'_, V> {
    /// Proximity order of every value in the bin relative to the pivot.
    #[must_use]
    pub fn proximity_order(&self) -> usize {
        self.po
    }

    /// Number of values in the bin.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Feed the bin's values to `consume` until it returns `false`.
    ///
    /// Returns the last value returned by `consume`.
    pub fn each<F: FnMut(&V) -> bool>(&self, mut consume: F) -> bool {
        match self.values {
            BinValues::Subtree(pot) => pot.each_inner(&mut consume),
            BinValues::Pin(pin) => consume(pin),
            BinValues::From(pot, po) => pot.each_from_inner(&mut consume, po),
        }
    }
}

impl<V> Pot<V> {
    /// Visit every value until `consume` returns `false`.
    ///
    /// Returns `false` if iteration stopped early or the trie is empty.
    pub fn each<F: FnMut(&V) -> bool>(&self, mut consume: F) -> bool {
        self.each_inner(&mut consume)
    }

    /// Visit the pin and every bin at proximity order `po` or above.
    pub fn each_from<F: FnMut(&V) -> bool>(&self, mut consume: F, po: usize) -> bool {
        self.each_from_inner(&mut consume, po)
    }

    pub(crate) fn each_inner<F: FnMut(&V) -> bool>(&self, consume: &mut F) -> bool {
        let Some(pin) = self.pin() else {
            return false;
        };
        for n in self.bins() {
            if !n.each_inner(consume) {
                return false;
            }
        }
        consume(pin)
    }

    fn each_from_inner<F: FnMut(&V) -> bool>(&self, consume: &mut F, po: usize) -> bool {
        let Some(pin) = self.pin() else {
            return false;
        };
        let (_, beg) = self.get_pos(po);
        for n in &self.bins()[beg..] {
            if !n.each_inner(consume) {
                return false;
            }
        }
        consume(pin)
    }
}

impl<V: Keyed> Pot<V> {
    /// Group the values into bins relative to `pivot` and feed them to
    /// `consume`.
    ///
    /// With `ascending` the bins arrive farthest first (lowest proximity
    /// order), otherwise closest first. Bins below `min_po` are skipped. A
    /// value equal to the pivot forms a bin of its own at the maximum order.
    pub fn each_bin<P, F>(&self, pivot: &[u8], pof: &P, min_po: usize, mut consume: F, ascending: bool)
    where
        P: Pof + ?Sized,
        F: FnMut(&Bin<'_, V>) -> bool,
    {
        if ascending {
            self.each_bin_asc(pivot, pof, min_po, &mut consume);
        } else {
            self.each_bin_desc(pivot, pof, min_po, &mut consume);
        }
    }

    fn each_bin_asc<P, F>(&self, pivot: &[u8], pof: &P, min_po: usize, consume: &mut F) -> bool
    where
        P: Pof + ?Sized,
        F: FnMut(&Bin<'_, V>) -> bool,
    {
        let Some(pin) = self.pin() else {
            return false;
        };
        let (pivot_po, _) = pof.pof(pin.key(), pivot, self.po());
        let (_, pivot_idx) = self.get_pos(pivot_po);
        let bins = self.bins();

        let mut size = 0;
        for n in &bins[..pivot_idx] {
            size += n.size();
            if n.po() < min_po {
                continue;
            }
            let bin = Bin {
                po: n.po(),
                size: n.size(),
                values: BinValues::Subtree(n),
            };
            if !consume(&bin) {
                return false;
            }
        }

        if pivot_idx == bins.len() {
            if pivot_po >= min_po {
                let bin = Bin {
                    po: pivot_po,
                    size: 1,
                    values: BinValues::Pin(pin),
                };
                return consume(&bin);
            }
            return true;
        }

        let sub = &bins[pivot_idx];
        let mut from = pivot_po;
        if sub.po() == pivot_po {
            from += 1;
            size += sub.size();
        }
        if pivot_po >= min_po {
            let bin = Bin {
                po: pivot_po,
                size: self.size() - size,
                values: BinValues::From(self, from),
            };
            if !consume(&bin) {
                return false;
            }
        }
        if sub.po() == pivot_po {
            return sub.each_bin_asc(pivot, pof, min_po, consume);
        }
        true
    }

    fn each_bin_desc<P, F>(&self, pivot: &[u8], pof: &P, min_po: usize, consume: &mut F) -> bool
    where
        P: Pof + ?Sized,
        F: FnMut(&Bin<'_, V>) -> bool,
    {
        let Some(pin) = self.pin() else {
            return false;
        };
        let (pivot_po, _) = pof.pof(pin.key(), pivot, self.po());
        let (_, pivot_idx) = self.get_pos(pivot_po);
        let bins = self.bins();

        if pivot_idx == bins.len() {
            if pivot_po >= min_po {
                let bin = Bin {
                    po: pivot_po,
                    size: 1,
                    values: BinValues::Pin(pin),
                };
                if !consume(&bin) {
                    return false;
                }
            }
        } else {
            let sub = &bins[pivot_idx];
            let mut from = pivot_po;
            let mut rest = pivot_idx;
            if sub.po() == pivot_po {
                if !sub.each_bin_desc(pivot, pof, min_po, consume) {
                    return false;
                }
                from += 1;
                rest += 1;
            }
            if pivot_po >= min_po {
                let size = 1 + bins[rest..].iter().map(Pot::size).sum::<usize>();
                let bin = Bin {
                    po: pivot_po,
                    size,
                    values: BinValues::From(self, from),
                };
                if !consume(&bin) {
                    return false;
                }
            }
        }

        for n in bins[..pivot_idx].iter().rev() {
            if n.po() < min_po {
                return true;
            }
            let bin = Bin {
                po: n.po(),
                size: n.size(),
                values: BinValues::Subtree(n),
            };
            if !consume(&bin) {
                return false;
            }
        }
        true
    }

    /// Visit every value closest-first relative to `pivot`, together with its
    /// proximity order. Orders never increase along the walk.
    ///
    /// Returns `false` if `consume` stopped the walk or the trie is empty.
    pub fn each_neighbour<P, F>(&self, pivot: &[u8], pof: &P, mut consume: F) -> bool
    where
        P: Pof + ?Sized,
        F: FnMut(&V, usize) -> bool,
    {
        self.each_neighbour_inner(pivot, pof, &mut consume)
    }

    fn each_neighbour_inner<P, F>(&self, pivot: &[u8], pof: &P, consume: &mut F) -> bool
    where
        P: Pof + ?Sized,
        F: FnMut(&V, usize) -> bool,
    {
        let Some(pin) = self.pin() else {
            return false;
        };
        let bins = self.bins();
        let l = bins.len();
        // `right` is the index after which bins sit on the pin's side of the
        // pivot; it may be -1 when every bin does.
        let mut right = l as isize;
        let mut left = l;

        let (po, eq) = pof.pof(pin.key(), pivot, self.po());
        if !eq {
            let (sub, idx) = self.get_pos(po);
            left = idx;
            match sub {
                Some(n) => {
                    if !n.each_neighbour_inner(pivot, pof, consume) {
                        return false;
                    }
                    right = idx as isize;
                }
                None => right = idx as isize - 1,
            }
        }

        if !consume(pin, po) {
            return false;
        }

        let start = (right + 1) as usize;
        for n in bins[start.min(l)..].iter().rev() {
            if !n.each_inner(&mut |v: &V| consume(v, po)) {
                return false;
            }
        }

        for n in bins[..left].iter().rev() {
            let bin_po = n.po();
            if !n.each_inner(&mut |v: &V| consume(v, bin_po)) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{build, pof8};
    use super::*;

    fn bins_of(pot: &Pot<[u8; 1]>, pivot: u8, ascending: bool) -> Vec<(usize, usize, Vec<u8>)> {
        let mut out = Vec::new();
        pot.each_bin(
            &[pivot],
            &pof8(),
            0,
            |bin| {
                let mut values = Vec::new();
                bin.each(|v| {
                    values.push(v[0]);
                    true
                });
                values.sort_unstable();
                out.push((bin.proximity_order(), bin.size(), values));
                true
            },
            ascending,
        );
        out
    }

    #[test]
    fn test_each_counts_size() {
        let pot = build(&[0x00, 0x80, 0x01, 0x40, 0x20, 0xff]);
        let mut count = 0;
        pot.each(|_| {
            count += 1;
            true
        });
        assert_eq!(count, pot.size());
    }

    #[test]
    fn test_each_stops_early() {
        let pot = build(&[0x00, 0x80, 0x01, 0x40]);
        let mut seen = 0;
        let finished = pot.each(|_| {
            seen += 1;
            seen < 2
        });
        assert!(!finished);
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_each_on_empty() {
        let pot: Pot<[u8; 1]> = Pot::new();
        assert!(!pot.each(|_| true));
    }

    #[test]
    fn test_each_bin_ascending_scenario() {
        // A = 0x00, B = 0x80 (po 0), C = 0x01 (po 7)
        let pot = build(&[0x00, 0x80, 0x01]);
        let bins = bins_of(&pot, 0x00, true);
        assert_eq!(
            bins,
            vec![
                (0, 1, vec![0x80]),
                (7, 1, vec![0x01]),
                (8, 1, vec![0x00]),
            ]
        );
    }

    #[test]
    fn test_each_bin_descending_is_reverse() {
        let pot = build(&[0x00, 0x80, 0x01, 0x40, 0x41, 0xc0]);
        for pivot in [0x00u8, 0x41, 0x99, 0xc0] {
            let mut asc = bins_of(&pot, pivot, true);
            let desc = bins_of(&pot, pivot, false);
            asc.reverse();
            assert_eq!(asc, desc, "pivot {pivot:#x}");
        }
    }

    #[test]
    fn test_each_bin_covers_every_value() {
        let values = [0x00, 0x80, 0x01, 0x40, 0x41, 0xc0, 0x10, 0x11];
        let pot = build(&values);
        for pivot in [0x00u8, 0x41, 0x7f] {
            let mut all: Vec<u8> = bins_of(&pot, pivot, true)
                .into_iter()
                .flat_map(|(po, size, v)| {
                    assert_eq!(size, v.len(), "bin {po} size");
                    v
                })
                .collect();
            all.sort_unstable();
            let mut expected = values.to_vec();
            expected.sort_unstable();
            assert_eq!(all, expected);
        }
    }

    #[test]
    fn test_each_bin_min_po_filters() {
        let pot = build(&[0x00, 0x80, 0x40, 0x01]);
        let mut orders = Vec::new();
        pot.each_bin(
            &[0x00],
            &pof8(),
            2,
            |bin| {
                orders.push(bin.proximity_order());
                true
            },
            true,
        );
        assert_eq!(orders, vec![7, 8]);
    }

    #[test]
    fn test_each_bin_values_relative_to_pivot() {
        let pot = build(&[0x00, 0x80, 0x40, 0x01, 0xc0]);
        let pof = pof8();
        for pivot in [0x00u8, 0x81, 0x41] {
            pot.each_bin(
                &[pivot],
                &pof,
                0,
                |bin| {
                    bin.each(|v| {
                        assert_eq!(pof.pof(v, &[pivot], 0).0, bin.proximity_order());
                        true
                    });
                    true
                },
                true,
            );
        }
    }

    #[test]
    fn test_each_neighbour_non_increasing() {
        let pot = build(&[0x00, 0x80, 0x01, 0x40, 0x41, 0xc0, 0x10, 0x11, 0x12]);
        let pof = pof8();
        for pivot in [0x00u8, 0x11, 0x42, 0xff] {
            let mut last = usize::MAX;
            let mut count = 0;
            pot.each_neighbour(&[pivot], &pof, |v, po| {
                assert!(po <= last, "order increased for pivot {pivot:#x}");
                assert_eq!(po, pof.pof(v, &[pivot], 0).0);
                last = po;
                count += 1;
                true
            });
            assert_eq!(count, pot.size());
        }
    }

    #[test]
    fn test_each_neighbour_closest_first() {
        let pot = build(&[0x00, 0x80, 0x01]);
        let mut order = Vec::new();
        pot.each_neighbour(&[0x80], &pof8(), |v, _| {
            order.push(v[0]);
            true
        });
        assert_eq!(order[0], 0x80);
    }

    #[test]
    fn test_each_neighbour_stops() {
        let pot = build(&[0x00, 0x80, 0x01, 0x40]);
        let mut n = 0;
        let done = pot.each_neighbour(&[0x00], &pof8(), |_, _| {
            n += 1;
            false
        });
        assert!(!done);
        assert_eq!(n, 1);
    }
}
