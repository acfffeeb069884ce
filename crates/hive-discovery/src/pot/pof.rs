//! Proximity order functions.
//!
//! A proximity order (PO) counts the leading bits two keys share. Higher
//! values mean closer keys. Every trie operation takes a [`Pof`] so callers
//! can cap the resolution (see [`DefaultPof`]) or compare custom keys.

use std::cmp::Ordering;

/// Maximum key length in bits for 32-byte overlay addresses.
pub const MAX_PO: usize = 256;

/// Upper bound on key length used as a sentinel by union.
pub(crate) const MAX_KEY_LEN: usize = 256;

/// Proximity order comparison between two keys.
///
/// `pof(one, other, pos)` returns the proximity order of the two keys and
/// whether they are equal at the function's resolution. Comparison starts at
/// bit `pos`; callers pass the order already known to be shared.
pub trait Pof {
    /// Compare `one` and `other` starting at bit `pos`.
    fn pof(&self, one: &[u8], other: &[u8], pos: usize) -> (usize, bool);
}

impl<F> Pof for F
where
    F: Fn(&[u8], &[u8], usize) -> (usize, bool),
{
    fn pof(&self, one: &[u8], other: &[u8], pos: usize) -> (usize, bool) {
        self(one, other, pos)
    }
}

/// Values stored in a [`Pot`](super::Pot) expose the key they are ordered by.
pub trait Keyed {
    /// Key bytes compared by the proximity function.
    fn key(&self) -> &[u8];
}

impl Keyed for Vec<u8> {
    fn key(&self) -> &[u8] {
        self
    }
}

impl<const N: usize> Keyed for [u8; N] {
    fn key(&self) -> &[u8] {
        self
    }
}

impl<T: Keyed + ?Sized> Keyed for std::sync::Arc<T> {
    fn key(&self) -> &[u8] {
        (**self).key()
    }
}

/// Proximity function that saturates at `max`.
///
/// Keys sharing at least `max` leading bits compare as equal, which lets a
/// trie (or a routing decision) operate at reduced resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultPof {
    max: usize,
}

impl DefaultPof {
    /// Create a proximity function capped at `max` bits.
    #[must_use]
    pub const fn new(max: usize) -> Self {
        Self { max }
    }

    /// Resolution cap.
    #[must_use]
    pub const fn max(&self) -> usize {
        self.max
    }
}

impl Default for DefaultPof {
    fn default() -> Self {
        Self::new(MAX_PO)
    }
}

impl Pof for DefaultPof {
    fn pof(&self, one: &[u8], other: &[u8], pos: usize) -> (usize, bool) {
        let (po, eq) = proximity_order(one, other, pos);
        if po >= self.max {
            return (self.max, true);
        }
        (po, eq)
    }
}

/// Count the leading bits `one` and `other` share, starting at bit `pos`.
///
/// Only the common prefix length of the two slices is compared. Returns
/// `(8 * len, true)` when every compared bit agrees.
///
/// # Examples
///
/// ```
/// use hive_discovery::pot::proximity_order;
///
/// assert_eq!(proximity_order(&[0x00], &[0x80], 0), (0, false));
/// assert_eq!(proximity_order(&[0x00], &[0x01], 0), (7, false));
/// assert_eq!(proximity_order(&[0x42], &[0x42], 0), (8, true));
/// ```
#[must_use]
pub fn proximity_order(one: &[u8], other: &[u8], pos: usize) -> (usize, bool) {
    let len = one.len().min(other.len());
    let first = pos / 8;
    for i in first..len {
        if one[i] == other[i] {
            continue;
        }
        let oxo = one[i] ^ other[i];
        let start = if i == first { pos % 8 } else { 0 };
        for j in start..8 {
            if (oxo >> (7 - j)) & 0x01 != 0 {
                return (i * 8 + j, false);
            }
        }
    }
    (len * 8, true)
}

/// Compare the XOR distances of `x` and `y` to `target`.
///
/// Returns [`Ordering::Less`] when `x` is closer to `target` than `y`.
#[must_use]
pub fn distance_cmp(target: &[u8], x: &[u8], y: &[u8]) -> Ordering {
    let len = target.len().min(x.len()).min(y.len());
    for i in 0..len {
        let dx = x[i] ^ target[i];
        let dy = y[i] ^ target[i];
        match dx.cmp(&dy) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}
