//! Neighbourhood radius and depth.
//!
//! ```text
//!  po:     0    1    2    3    4    5
//!  conns:  2    1    0    1    1    1
//!                    ^         ^
//!                  depth     radius (neighbourhood_size = 2)
//! ```
//!
//! The radius is the bin of the `neighbourhood_size`-th closest connection.
//! The depth is the shallowest empty bin, capped at the radius.

use crate::pot::{Keyed, MAX_PO, Pof, Pot};

/// Proximity order enclosing the `neighbourhood_size` nearest values.
///
/// Returns 0 when the trie holds no more than `neighbourhood_size` values.
pub(crate) fn neighbourhood_radius<V, P>(
    pot: &Pot<V>,
    neighbourhood_size: usize,
    pivot: &[u8],
    pof: &P,
) -> usize
where
    V: Keyed,
    P: Pof + ?Sized,
{
    if pot.size() <= neighbourhood_size {
        return 0;
    }
    let mut size = 0;
    let mut radius = 0;
    pot.each_neighbour(pivot, pof, |_, po| {
        // the pivot itself
        if po == MAX_PO {
            return true;
        }
        size += 1;
        if size == neighbourhood_size {
            radius = po;
            return false;
        }
        true
    });
    radius
}

/// Deepest proximity order such that every shallower bin is non-empty, not
/// deeper than the neighbourhood radius.
pub(crate) fn depth_for_pot<V, P>(
    pot: &Pot<V>,
    neighbourhood_size: usize,
    pivot: &[u8],
    pof: &P,
) -> usize
where
    V: Keyed,
    P: Pof + ?Sized,
{
    if pot.size() <= neighbourhood_size {
        return 0;
    }
    let max_depth = neighbourhood_radius(pot, neighbourhood_size, pivot, pof);
    let mut depth = 0;
    pot.each_bin(
        pivot,
        pof,
        0,
        |bin| {
            if bin.proximity_order() != depth || depth == max_depth {
                return false;
            }
            depth += 1;
            true
        },
        true,
    );
    depth
}
