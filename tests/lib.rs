//! Shared fixtures for the Hive integration tests.

use hive_core::{ChannelSender, PeerSender, Router, RouterParams};
use hive_crypto::x25519::PrivateKey;
use hive_discovery::{Address, KadParams, Kademlia, Peer, PeerAddr};
use rand_core::OsRng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Address whose leading bytes are `prefix`, zero elsewhere.
pub fn addr_with_prefix(prefix: &[u8]) -> Address {
    let mut bytes = [0u8; 32];
    bytes[..prefix.len()].copy_from_slice(prefix);
    Address::from_bytes(bytes)
}

/// Address at exactly proximity order `po` from `base`.
///
/// `tail` perturbs the bytes after the one holding bit `po`, so different
/// tails give distinct addresses in the same bin.
pub fn addr_at_po(base: &Address, po: usize, tail: u64) -> Address {
    assert!(po < 256, "po {po} out of range");
    let mut bytes = *base.as_bytes();
    bytes[po / 8] ^= 0x80 >> (po % 8);
    for (i, b) in tail.to_be_bytes().iter().enumerate() {
        if let Some(byte) = bytes.get_mut(po / 8 + 1 + i) {
            *byte ^= b;
        }
    }
    Address::from_bytes(bytes)
}

/// Topology over `base` with default params.
pub fn kademlia(base: Address) -> Arc<Kademlia> {
    Arc::new(Kademlia::new(base, KadParams::default()).expect("default params are valid"))
}

/// Router params accepting raw envelopes.
pub fn raw_params() -> RouterParams {
    RouterParams {
        allow_raw: true,
        ..RouterParams::default()
    }
}

/// Router with a fresh identity on a fresh topology at `base`.
pub fn new_router(base: Address, params: RouterParams) -> Router {
    Router::new(kademlia(base), PrivateKey::generate(&mut OsRng), params)
        .expect("router params are valid")
}

/// A started router fed by an in-memory inbox.
pub struct Node {
    /// The node's router
    pub router: Router,
    inbox: Arc<ChannelSender>,
    task: JoinHandle<()>,
}

impl Node {
    /// Start a router at `base` and a task handing its inbox to
    /// [`Router::handle`]. Must be called within a tokio runtime.
    pub fn spawn(base: Address, params: RouterParams) -> Self {
        let router = new_router(base, params);
        let (sender, mut rx) = ChannelSender::pair(64);
        let handler = router.clone();
        let task = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                if let Err(e) = handler.handle(envelope) {
                    tracing::warn!(error = %e, "handle failed");
                }
            }
        });
        router.start();
        Self {
            router,
            inbox: Arc::new(sender),
            task,
        }
    }

    /// Overlay address.
    pub fn base(&self) -> Address {
        *self.router.base()
    }

    /// Connect both ways: each table gets the other as a live peer and each
    /// router can send to the other's inbox.
    pub fn link(&self, other: &Node) {
        self.connect_to(other);
        other.connect_to(self);
    }

    fn connect_to(&self, other: &Node) {
        let addr = PeerAddr::new(other.base(), Vec::new())
            .with_capabilities(other.router.kademlia().capabilities());
        self.router.kademlia().on(Arc::new(Peer::new(addr)));
        self.router
            .add_peer(other.base(), Arc::clone(&other.inbox) as Arc<dyn PeerSender>);
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.router.stop();
        self.task.abort();
    }
}

/// Poll `cond` every 10 ms until it holds or `timeout` passes.
pub async fn eventually<F: Fn() -> bool>(timeout: Duration, cond: F) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_addr_at_po() {
        let base = addr_with_prefix(&[0x5a, 0xc3]);
        for po in [0, 1, 7, 8, 100, 255] {
            for tail in [0, 1, u64::MAX] {
                assert_eq!(base.proximity(&addr_at_po(&base, po, tail)), po);
            }
        }
        assert_ne!(addr_at_po(&base, 3, 1), addr_at_po(&base, 3, 2));
    }
}
