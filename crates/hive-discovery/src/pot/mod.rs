//! Persistent proximity order trie.
//!
//! A [`Pot`] is an immutable set of values ordered by the bitwise proximity of
//! their keys. Every node pins one value; its children ("bins") hold the
//! values that share exactly `bin.po` leading bits with the pin, sorted by
//! ascending proximity order.
//!
//! # Architecture
//!
//! ```text
//!                 pin A (po 0, size 5)
//!        ┌───────────────┼─────────────────┐
//!   bin po 0          bin po 3          bin po 7
//!   pin B (1)      pin C (2)           pin E (1)
//!                     │
//!                  bin po 5
//!                  pin D (1)
//! ```
//!
//! Mutations never touch an existing node. They rebuild the path from the
//! root to the change and share every other subtree by reference, so any
//! previously returned root stays a consistent snapshot.
//!
//! Iteration is lazy and stops as soon as a consumer returns `false`:
//! - [`Pot::each`] / [`Pot::each_from`] walk the whole set
//! - [`Pot::each_bin`] groups values into bins relative to a pivot key
//! - [`Pot::each_neighbour`] visits values closest-first
//! - [`Pot::each_neighbour_async`] fans a bounded number of visits out to
//!   worker threads
//!
//! [`Pot::pot_with_po`] and [`Pot::biggest_address_gap`] locate sparse regions
//! of the key space for peer suggestion.

mod gap;
mod iter;
mod pof;
mod union;
mod visit;

pub use iter::Bin;
pub use pof::{DefaultPof, Keyed, MAX_PO, Pof, distance_cmp, proximity_order};

use std::fmt;
use std::sync::Arc;

/// Outcome requested by a [`Pot::swap`] update callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update<V> {
    /// Leave the trie untouched. No new root is allocated.
    Keep,
    /// Delete the value stored under the key, if any.
    Remove,
    /// Store this value under the key, inserting or replacing.
    Set(V),
}

/// Result of [`Pot::swap`].
#[derive(Debug, Clone)]
pub struct Swapped<V> {
    /// The new root (the same root when `changed` is false).
    pub pot: Pot<V>,
    /// Proximity order of the key relative to the pin it was compared with last.
    pub po: usize,
    /// Whether a value was stored under the key before the swap.
    pub found: bool,
    /// Whether the trie changed.
    pub changed: bool,
}

/// Persistent proximity order trie.
///
/// Cloning a `Pot` is cheap: it only bumps a reference count.
pub struct Pot<V> {
    node: Arc<Node<V>>,
}

struct Node<V> {
    pin: Option<V>,
    bins: Vec<Pot<V>>,
    size: usize,
    po: usize,
}

impl<V> Clone for Pot<V> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
        }
    }
}

impl<V> Pot<V> {
    /// Create an empty trie.
    #[must_use]
    pub fn new() -> Self {
        Self::from_parts(None, Vec::new(), 0, 0)
    }

    /// Create a trie holding a single value pinned at proximity order `po`.
    #[must_use]
    pub fn with_value(value: V, po: usize) -> Self {
        Self::from_parts(Some(value), Vec::new(), 1, po)
    }

    fn from_parts(pin: Option<V>, bins: Vec<Pot<V>>, size: usize, po: usize) -> Self {
        Self {
            node: Arc::new(Node {
                pin,
                bins,
                size,
                po,
            }),
        }
    }

    fn empty_at(po: usize) -> Self {
        Self::from_parts(None, Vec::new(), 0, po)
    }

    /// The pinned value of the root node.
    #[must_use]
    pub fn pin(&self) -> Option<&V> {
        self.node.pin.as_ref()
    }

    /// Number of values in the trie.
    #[must_use]
    pub fn size(&self) -> usize {
        self.node.size
    }

    /// Whether the trie holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.node.size == 0
    }

    /// Proximity order of this node relative to its parent's pin.
    #[must_use]
    pub fn po(&self) -> usize {
        self.node.po
    }

    /// Whether two handles point at the same node.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    fn bins(&self) -> &[Pot<V>] {
        &self.node.bins
    }

    /// The bin at exactly `po` and its index, or `None` and the index of the
    /// first bin with a greater order.
    fn get_pos(&self, po: usize) -> (Option<&Pot<V>>, usize) {
        for (i, n) in self.bins().iter().enumerate() {
            if po > n.po() {
                continue;
            }
            if po < n.po() {
                return (None, i);
            }
            return (Some(n), i);
        }
        (None, self.bins().len())
    }
}

impl<V: Keyed + Clone> Pot<V> {
    /// Insert `value`, replacing a stored value with an equal key.
    ///
    /// # Returns
    ///
    /// The new root, the proximity order of `value` relative to the root pin,
    /// and whether an equal key was already present.
    #[must_use]
    pub fn add<P: Pof + ?Sized>(&self, value: V, pof: &P) -> (Self, usize, bool) {
        let Some(pin) = self.pin() else {
            let root = Self::from_parts(
                Some(value),
                self.bins().to_vec(),
                self.size() + 1,
                self.po(),
            );
            return (root, 0, false);
        };

        let (po, found) = pof.pof(pin.key(), value.key(), self.po());
        if found {
            let root = Self::from_parts(Some(value), self.bins().to_vec(), self.size(), self.po());
            return (root, po, true);
        }

        let bins = self.bins();
        let mut size = self.size();
        let mut found = false;
        let mut sub = None;
        let mut i = 0;
        let mut j = 0;
        while i < bins.len() {
            let n = &bins[i];
            if n.po() == po {
                let (p, _, f) = n.add(value.clone(), pof);
                if !f {
                    size += 1;
                }
                found = f;
                sub = Some(p);
                j += 1;
                break;
            }
            if n.po() > po {
                break;
            }
            i += 1;
            j += 1;
        }
        let sub = sub.unwrap_or_else(|| {
            size += 1;
            Self::with_value(value, po)
        });

        let mut next = Vec::with_capacity(bins.len() + 1);
        next.extend_from_slice(&bins[..i]);
        next.push(sub);
        next.extend_from_slice(&bins[j..]);

        (
            Self::from_parts(Some(pin.clone()), next, size, self.po()),
            po,
            found,
        )
    }

    /// Remove the value stored under `key`.
    ///
    /// When the removed value is a node's pin, the deepest bin's pin is
    /// promoted in its place and that bin's children are spliced in after the
    /// remaining shallower bins. A missing key returns the same root.
    #[must_use]
    pub fn remove<P: Pof + ?Sized>(&self, key: &[u8], pof: &P) -> (Self, usize, bool) {
        let Some(pin) = self.pin() else {
            return (self.clone(), 0, false);
        };

        let (po, found) = pof.pof(pin.key(), key, self.po());
        if found {
            return (self.without_pin(), self.po(), true);
        }

        let bins = self.bins();
        for (i, n) in bins.iter().enumerate() {
            if n.po() > po {
                break;
            }
            if n.po() < po {
                continue;
            }
            let (p, sub_po, found) = n.remove(key, pof);
            if !found {
                return (self.clone(), sub_po, false);
            }
            let mut next = Vec::with_capacity(bins.len());
            next.extend_from_slice(&bins[..i]);
            if p.pin().is_some() {
                next.push(p);
            }
            next.extend_from_slice(&bins[i + 1..]);
            let root = Self::from_parts(Some(pin.clone()), next, self.size() - 1, self.po());
            return (root, sub_po, true);
        }
        (self.clone(), po, false)
    }

    /// Copy of this node with its pin removed, promoting the deepest bin.
    fn without_pin(&self) -> Self {
        let size = self.size() - 1;
        let bins = self.bins();
        match bins.split_last() {
            Some((last, rest)) if size > 0 => {
                let mut next = Vec::with_capacity(rest.len() + last.bins().len());
                next.extend_from_slice(rest);
                next.extend_from_slice(last.bins());
                Self::from_parts(last.pin().cloned(), next, size, self.po())
            }
            _ => Self::empty_at(self.po()),
        }
    }

    /// Insert, update or delete the value stored under `key`.
    ///
    /// `update` is called exactly once with the value currently stored under
    /// `key` (or `None`). [`Update::Keep`] leaves the trie untouched and
    /// returns the same root with `changed == false`.
    ///
    /// # Panics
    ///
    /// Panics if `update` returns [`Update::Set`] with a value whose key does
    /// not match `key` under `pof`. Inserting it would break the ordering
    /// invariant of the trie.
    pub fn swap<P, F>(&self, key: &[u8], pof: &P, update: F) -> Swapped<V>
    where
        P: Pof + ?Sized,
        F: FnOnce(Option<&V>) -> Update<V>,
    {
        let unchanged = |po, found| Swapped {
            pot: self.clone(),
            po,
            found,
            changed: false,
        };

        let Some(pin) = self.pin() else {
            return match update(None) {
                Update::Set(value) => {
                    assert_key_matches(&value, key, pof, 0);
                    Swapped {
                        pot: Self::with_value(value, self.po()),
                        po: 0,
                        found: false,
                        changed: true,
                    }
                }
                Update::Keep | Update::Remove => unchanged(0, false),
            };
        };

        let (po, found) = pof.pof(key, pin.key(), self.po());
        if found {
            let pot = match update(Some(pin)) {
                Update::Keep => return unchanged(po, true),
                Update::Remove => self.without_pin(),
                Update::Set(value) => {
                    assert_key_matches(&value, key, pof, self.po());
                    Self::from_parts(Some(value), self.bins().to_vec(), self.size(), self.po())
                }
            };
            return Swapped {
                pot,
                po,
                found: true,
                changed: true,
            };
        }

        let bins = self.bins();
        let (sub, i) = self.get_pos(po);
        if let Some(n) = sub {
            let swapped = n.swap(key, pof, update);
            if !swapped.changed {
                return unchanged(swapped.po, swapped.found);
            }
            let mut size = self.size();
            let mut next = Vec::with_capacity(bins.len());
            next.extend_from_slice(&bins[..i]);
            if swapped.pot.is_empty() {
                size -= 1;
            } else {
                size = size + swapped.pot.size() - n.size();
                next.push(swapped.pot);
            }
            next.extend_from_slice(&bins[i + 1..]);
            return Swapped {
                pot: Self::from_parts(Some(pin.clone()), next, size, self.po()),
                po: swapped.po,
                found: swapped.found,
                changed: true,
            };
        }

        let value = match update(None) {
            Update::Set(value) => value,
            Update::Keep | Update::Remove => return unchanged(po, false),
        };
        assert_key_matches(&value, key, pof, self.po());

        let mut next = Vec::with_capacity(bins.len() + 1);
        next.extend_from_slice(&bins[..i]);
        next.push(Self::with_value(value, po));
        next.extend_from_slice(&bins[i..]);
        Swapped {
            pot: Self::from_parts(Some(pin.clone()), next, self.size() + 1, self.po()),
            po,
            found: false,
            changed: true,
        }
    }
}

fn assert_key_matches<V: Keyed, P: Pof + ?Sized>(value: &V, key: &[u8], pof: &P, po: usize) {
    let (_, eq) = pof.pof(value.key(), key, po);
    assert!(eq, "swap: value key does not match the requested key");
}

impl<V> Default for Pot<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: fmt::Debug> Pot<V> {
    fn render(&self, indent: &str, out: &mut fmt::Formatter<'_>) -> fmt::Result {
        let indent = format!("{indent}  ");
        match self.pin() {
            Some(pin) => writeln!(out, "{indent}{pin:?} ({}) {}", self.po(), self.size())?,
            None => writeln!(out, "{indent}<nil> ({}) {}", self.po(), self.size())?,
        }
        for n in self.bins() {
            n.render(&indent, out)?;
        }
        Ok(())
    }
}

impl<V: fmt::Debug> fmt::Display for Pot<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render("", f)
    }
}

impl<V: fmt::Debug> fmt::Debug for Pot<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pot")
            .field("pin", &self.pin())
            .field("po", &self.po())
            .field("size", &self.size())
            .field("bins", &self.bins().len())
            .finish()
    }
}
