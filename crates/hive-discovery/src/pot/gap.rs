//! Coverage queries used by peer selection.

use super::pof::MAX_PO;
use super::{Keyed, Pof, Pot};

impl<V: Keyed + Clone> Pot<V> {
    /// Sub-trie holding exactly the values at proximity order `po` relative
    /// to `pivot`, or `None` if there are none.
    ///
    /// Unlike a bin, the result keeps the tree shape, so it can be searched
    /// for gaps with [`Pot::biggest_address_gap`].
    #[must_use]
    pub fn pot_with_po<P: Pof + ?Sized>(&self, pivot: &[u8], po: usize, pof: &P) -> Option<Self> {
        let pin = self.pin()?;
        let (pivot_po, _) = pof.pof(pin.key(), pivot, 0);
        let (sub, idx) = self.get_pos(pivot_po);

        if pivot_po < po {
            return match sub {
                Some(n) if n.po() == pivot_po => n.pot_with_po(pivot, po, pof),
                _ => None,
            };
        }

        if pivot_po == po {
            // Keep the pin and the bins on its side of the fork.
            let keep_from = if sub.is_some() { idx + 1 } else { idx };
            let bins = self.bins();
            let keep_from = keep_from.min(bins.len());
            let removed: usize = bins[..keep_from].iter().map(Pot::size).sum();
            return Some(Self::from_parts(
                Some(pin.clone()),
                bins[keep_from..].to_vec(),
                self.size() - removed,
                po,
            ));
        }

        self.bins().iter().find(|n| n.po() == po).cloned()
    }

    /// Find the shallowest proximity order with no values below some pin.
    ///
    /// A gap at order `n` leaves `1/2^n` of the address space uncovered, so
    /// shallow gaps are the largest. Returns the order of the gap and the
    /// pinned value it was found under, or `None` for an empty trie.
    #[must_use]
    pub fn biggest_address_gap(&self) -> Option<(usize, V)> {
        let pin = self.pin()?;
        if self.bins().is_empty() {
            return Some((self.po() + 1, pin.clone()));
        }

        let mut biggest = MAX_PO;
        let mut last = self.po();
        let mut found_below: Option<V> = None;
        for sub in self.bins() {
            if sub.po() > last + 1 && last + 1 <= biggest {
                biggest = last + 1;
                found_below = None;
                break;
            }
            last = sub.po();
            if let Some((po, value)) = sub.biggest_address_gap() {
                if po < biggest {
                    biggest = po;
                    found_below = Some(value);
                }
            }
        }

        Some((biggest, found_below.unwrap_or_else(|| pin.clone())))
    }
}
