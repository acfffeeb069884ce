//! Replay suppression.
//!
//! The router records the digest of every envelope it handles or forwards and
//! drops envelopes whose digest it has seen within the cache TTL.

use crate::message::Digest;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::{Duration, Instant};
use tracing::trace;

/// Set of recently seen envelope digests.
pub trait DigestCache: Send + Sync {
    /// Record `digest` as seen now.
    ///
    /// Returns `false` and leaves the entry untouched when `digest` was
    /// already seen within the TTL. The check and the insert are one atomic
    /// step, so concurrent callers adding the same digest see exactly one
    /// `true`.
    fn add(&self, digest: Digest) -> bool;

    /// Whether `digest` was seen within the TTL.
    fn has(&self, digest: &Digest) -> bool;

    /// Evict expired digests. Returns how many were removed.
    fn gc(&self) -> usize;
}

/// [`DigestCache`] evicting entries older than a fixed TTL.
#[derive(Debug)]
pub struct TtlDigestCache {
    entries: DashMap<Digest, Instant>,
    ttl: Duration,
}

impl TtlDigestCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Entry TTL.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of entries, expired ones included until the next [`gc`](DigestCache::gc).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_live(&self, added: Instant, now: Instant) -> bool {
        now.saturating_duration_since(added) < self.ttl
    }
}

impl DigestCache for TtlDigestCache {
    fn add(&self, digest: Digest) -> bool {
        let now = Instant::now();
        match self.entries.entry(digest) {
            Entry::Occupied(mut entry) => {
                if self.is_live(*entry.get(), now) {
                    return false;
                }
                entry.insert(now);
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        }
    }

    fn has(&self, digest: &Digest) -> bool {
        let now = Instant::now();
        self.entries
            .get(digest)
            .is_some_and(|added| self.is_live(*added, now))
    }

    fn gc(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, added| self.is_live(*added, now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            trace!(removed, "digest cache gc");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_has() {
        let cache = TtlDigestCache::new(Duration::from_secs(30));
        let digest = [7u8; 32];
        assert!(!cache.has(&digest));
        assert!(cache.add(digest));
        assert!(cache.has(&digest));
        assert!(!cache.add(digest));
        assert!(!cache.has(&[8u8; 32]));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entries_are_ignored_and_collected() {
        let cache = TtlDigestCache::new(Duration::from_millis(150));
        cache.add([1u8; 32]);
        std::thread::sleep(Duration::from_millis(250));
        cache.add([2u8; 32]);

        assert!(!cache.has(&[1u8; 32]));
        assert!(cache.has(&[2u8; 32]));
        assert_eq!(cache.gc(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_digest_can_be_added_again() {
        let cache = TtlDigestCache::new(Duration::from_millis(150));
        assert!(cache.add([1u8; 32]));
        assert!(!cache.add([1u8; 32]));
        std::thread::sleep(Duration::from_millis(250));
        assert!(!cache.has(&[1u8; 32]));
        assert!(cache.add([1u8; 32]));
        assert!(cache.has(&[1u8; 32]));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_concurrent_add_admits_one() {
        let cache = TtlDigestCache::new(Duration::from_secs(30));
        let digest = [9u8; 32];
        let admitted: usize = std::thread::scope(|s| {
            let workers: Vec<_> = (0..16).map(|_| s.spawn(|| cache.add(digest))).collect();
            workers
                .into_iter()
                .map(|w| usize::from(w.join().unwrap()))
                .sum()
        });
        assert_eq!(admitted, 1);
        assert_eq!(cache.len(), 1);
    }
}
