//! Applicative set union.

use super::pof::MAX_KEY_LEN;
use super::{Keyed, Pof, Pot};

impl<V: Keyed + Clone> Pot<V> {
    /// Merge two tries.
    ///
    /// Values present in both (equal keys under `pof`) are kept once. Neither
    /// input is modified.
    ///
    /// # Returns
    ///
    /// The merged trie and the number of keys common to both inputs, so that
    /// `merged.size() == self.size() + other.size() - common`.
    #[must_use]
    pub fn union<P: Pof + ?Sized>(&self, other: &Self, pof: &P) -> (Self, usize) {
        let Some(first) = self.pin() else {
            return (other.clone(), 0);
        };
        let Some(second) = other.pin() else {
            return (self.clone(), 0);
        };

        let mut pin0 = first.clone();
        let mut pin1 = second.clone();
        let mut bins0 = self.bins().to_vec();
        let mut bins1 = other.bins().to_vec();
        let mut i0 = 0;
        let mut i1 = 0;
        let mut bins: Vec<Pot<V>> = Vec::new();
        // Drops to -1 while the last pivot is being folded in.
        let mut common: isize = 0;

        let (mut po, mut eq) = pof.pof(pin0.key(), pin1.key(), 0);

        let pin = loop {
            let l0 = bins0.len();
            let l1 = bins1.len();
            let mut n0: Option<Pot<V>> = None;
            let mut n1: Option<Pot<V>> = None;
            let mut p0 = 0;
            let mut p1 = 0;
            let mut a0 = false;
            let mut a1 = false;

            // Merge the bins shallower than the fork between the two pins.
            loop {
                if !a0 && i0 < l0 && bins0[i0].po() <= po {
                    p0 = bins0[i0].po();
                    n0 = Some(bins0[i0].clone());
                    a0 = p0 == po;
                } else {
                    a0 = true;
                }

                if !a1 && i1 < l1 && bins1[i1].po() <= po {
                    p1 = bins1[i1].po();
                    n1 = Some(bins1[i1].clone());
                    a1 = p1 == po;
                } else {
                    a1 = true;
                }

                if a0 && a1 {
                    break;
                }

                if (p0 < p1 || a1) && !a0 {
                    bins.extend(n0.take());
                    i0 += 1;
                } else if (p1 < p0 || a0) && !a1 {
                    bins.extend(n1.take());
                    i1 += 1;
                } else {
                    if let (Some(m0), Some(m1)) = (n0.take(), n1.take()) {
                        let (merged, c) = m0.union(&m1, pof);
                        bins.push(merged);
                        common += c as isize;
                    }
                    i0 += 1;
                    i1 += 1;
                }
            }

            if eq {
                common += 1;
                break pin1;
            }

            // Everything in bins0 deeper than the fork stays with pin0 and
            // becomes a single bin at the fork order relative to pin1.
            let mut i = i0;
            if i < bins0.len() && bins0[i].po() == po {
                i += 1;
            }
            let rest = bins0[i..].to_vec();
            let size0: usize = rest.iter().map(Pot::size).sum();
            let forked = Pot::from_parts(Some(pin0), rest, size0 + 1, po);

            let mut bins2 = vec![forked];
            let next = n0
                .as_ref()
                .and_then(|n| n.pin().map(|p| (n.po(), p.clone(), n.bins().to_vec())));
            match next {
                None => {
                    pin0 = pin1.clone();
                    po = MAX_KEY_LEN + 1;
                    eq = true;
                    common -= 1;
                }
                Some((n_po, n_pin, n_bins)) => {
                    bins2.extend(n_bins);
                    pin0 = pin1;
                    pin1 = n_pin;
                    (po, eq) = pof.pof(pin0.key(), pin1.key(), n_po);
                }
            }
            bins0 = std::mem::replace(&mut bins1, bins2);
            i0 = i1;
            i1 = 0;
        };

        let common = common.max(0) as usize;
        let size = self.size() + other.size() - common;
        (Pot::from_parts(Some(pin), bins, size, self.po()), common)
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{build, check_invariants, collect, pof8};

    #[test]
    fn test_union_disjoint() {
        let a = build(&[0x00, 0x80, 0x40]);
        let b = build(&[0x01, 0xc0, 0x21]);
        let (merged, common) = a.union(&b, &pof8());
        assert_eq!(common, 0);
        assert_eq!(merged.size(), 6);
        assert_eq!(collect(&merged), vec![0x00, 0x01, 0x21, 0x40, 0x80, 0xc0]);
        check_invariants(&merged, &pof8());
    }

    #[test]
    fn test_union_overlapping() {
        let a = build(&[0x00, 0x80, 0x40, 0x10]);
        let b = build(&[0x80, 0x10, 0x11, 0xff]);
        let (merged, common) = a.union(&b, &pof8());
        assert_eq!(common, 2);
        assert_eq!(merged.size(), a.size() + b.size() - common);
        assert_eq!(collect(&merged), vec![0x00, 0x10, 0x11, 0x40, 0x80, 0xff]);
        check_invariants(&merged, &pof8());
    }

    #[test]
    fn test_union_identical() {
        let a = build(&[0x00, 0x80, 0x40, 0x10]);
        let (merged, common) = a.union(&a, &pof8());
        assert_eq!(common, 4);
        assert_eq!(merged.size(), 4);
        check_invariants(&merged, &pof8());
    }

    #[test]
    fn test_union_with_empty() {
        let a = build(&[0x00, 0x80]);
        let empty = build(&[]);
        let (merged, common) = a.union(&empty, &pof8());
        assert_eq!(common, 0);
        assert!(merged.ptr_eq(&a));
        let (merged, _) = empty.union(&a, &pof8());
        assert!(merged.ptr_eq(&a));
    }

    #[test]
    fn test_union_leaves_inputs_untouched() {
        let a = build(&[0x00, 0x80, 0x40]);
        let b = build(&[0x01, 0x81, 0x41]);
        let _ = a.union(&b, &pof8());
        assert_eq!(collect(&a), vec![0x00, 0x40, 0x80]);
        assert_eq!(collect(&b), vec![0x01, 0x41, 0x81]);
    }
}
