//! Topology tunables.

use super::KademliaError;
use super::entry::PeerAddr;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Predicate deciding whether a known peer may be suggested for dialing.
pub type ReachableFn = Arc<dyn Fn(&PeerAddr) -> bool + Send + Sync>;

/// Kademlia parameters
#[derive(Clone)]
pub struct KadParams {
    /// Number of rows shown by the table display
    pub max_prox_display: usize,

    /// Minimum number of connected peers in the nearest neighbourhood
    pub neighbourhood_size: usize,

    /// Minimum number of connections per bin
    pub min_bin_size: usize,

    /// Cap on the expected number of connections per bin
    pub max_bin_size: usize,

    /// Interval before a known peer is first redialed
    pub retry_interval: Duration,

    /// Factor each retry interval grows by
    pub retry_exponent: u32,

    /// Dial attempts before a peer is no longer suggested
    pub max_retries: u32,

    /// Optional filter consulted before suggesting a peer
    pub reachable: Option<ReachableFn>,

    /// Pick peers that cover the largest gap in a bin instead of the first
    /// callable one
    pub prefer_address_gaps: bool,
}

impl Default for KadParams {
    fn default() -> Self {
        Self {
            max_prox_display: 16,
            neighbourhood_size: 2,
            min_bin_size: 2,
            max_bin_size: 16,
            retry_interval: Duration::from_millis(4200),
            retry_exponent: 2,
            max_retries: 42,
            reachable: None,
            prefer_address_gaps: false,
        }
    }
}

impl KadParams {
    /// Validate parameter ranges
    ///
    /// # Errors
    ///
    /// Returns [`KademliaError::InvalidParams`] when a size or retry setting
    /// is out of range.
    pub fn validate(&self) -> Result<(), KademliaError> {
        if self.neighbourhood_size == 0 {
            return Err(KademliaError::invalid_params(
                "neighbourhood_size must be at least 1",
            ));
        }
        if self.min_bin_size == 0 {
            return Err(KademliaError::invalid_params(
                "min_bin_size must be at least 1",
            ));
        }
        if self.max_bin_size < self.min_bin_size {
            return Err(KademliaError::invalid_params(
                "max_bin_size must not be below min_bin_size",
            ));
        }
        if self.retry_interval.is_zero() {
            return Err(KademliaError::invalid_params(
                "retry_interval must be non-zero",
            ));
        }
        if self.retry_exponent < 2 {
            return Err(KademliaError::invalid_params(
                "retry_exponent must be at least 2",
            ));
        }
        if self.max_prox_display == 0 {
            return Err(KademliaError::invalid_params(
                "max_prox_display must be at least 1",
            ));
        }
        Ok(())
    }

    /// Expected minimum number of connections in the bin at `po` given the
    /// neighbourhood `depth`.
    ///
    /// Bins just above depth need `min_bin_size` connections; every step
    /// shallower adds one, up to `max_bin_size`.
    #[must_use]
    pub fn expected_min_bin_size(&self, po: usize, depth: usize) -> usize {
        (self.min_bin_size + depth)
            .saturating_sub(po + 1)
            .clamp(self.min_bin_size, self.max_bin_size)
    }
}

impl fmt::Debug for KadParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KadParams")
            .field("max_prox_display", &self.max_prox_display)
            .field("neighbourhood_size", &self.neighbourhood_size)
            .field("min_bin_size", &self.min_bin_size)
            .field("max_bin_size", &self.max_bin_size)
            .field("retry_interval", &self.retry_interval)
            .field("retry_exponent", &self.retry_exponent)
            .field("max_retries", &self.max_retries)
            .field("reachable", &self.reachable.is_some())
            .field("prefer_address_gaps", &self.prefer_address_gaps)
            .finish()
    }
}
