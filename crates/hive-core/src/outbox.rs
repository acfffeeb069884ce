//! Bounded queue of envelopes awaiting forwarding.
//!
//! # Architecture
//!
//! ```text
//!  enqueue ──► slot check ──► ArrayQueue ──► worker ──► task per envelope
//!                 │                                        │
//!              Full(n)                           forward ──┤── ok: free slot
//!                                                          └── err: sleep, retry
//!                                                               until expired
//! ```
//!
//! A slot is taken on enqueue and freed once the envelope is forwarded or
//! dropped, so queued and in-flight envelopes together never exceed the
//! capacity.

use crate::error::OutboxError;
use crate::message::Envelope;
use crate::pss::RouterError;
use async_trait::async_trait;
use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Forwards one envelope on behalf of the outbox.
#[async_trait]
pub trait Forwarder: Send + Sync {
    /// Try to send `envelope` onward.
    ///
    /// # Errors
    ///
    /// Any error makes the outbox retry later.
    async fn forward(&self, envelope: &Envelope) -> Result<(), RouterError>;
}

struct Shared {
    queue: ArrayQueue<Envelope>,
    occupied: AtomicUsize,
    notify: Notify,
    stopped: AtomicBool,
    retry_delay: Duration,
    forwarder: Arc<dyn Forwarder>,
}

/// Frees an outbox slot when dropped.
struct Slot(Arc<Shared>);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.occupied.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Shared {
    async fn deliver(self: Arc<Self>, envelope: Envelope) {
        let _slot = Slot(Arc::clone(&self));
        loop {
            if self.stopped.load(Ordering::Acquire) {
                return;
            }
            match self.forwarder.forward(&envelope).await {
                Ok(()) => return,
                Err(e) => {
                    trace!(error = %e, topic = %envelope.topic(), "forward failed, will retry");
                }
            }
            tokio::time::sleep(self.retry_delay).await;
            if envelope.is_expired() {
                debug!(topic = %envelope.topic(), "dropping expired envelope from outbox");
                return;
            }
        }
    }
}

/// Bounded forwarding queue.
pub struct Outbox {
    shared: Arc<Shared>,
    capacity: usize,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Outbox {
    /// Create an outbox holding at most `capacity` envelopes.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize, retry_delay: Duration, forwarder: Arc<dyn Forwarder>) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: ArrayQueue::new(capacity),
                occupied: AtomicUsize::new(0),
                notify: Notify::new(),
                stopped: AtomicBool::new(false),
                retry_delay,
                forwarder,
            }),
            capacity,
            worker: Mutex::new(None),
        }
    }

    /// Queue `envelope` for forwarding.
    ///
    /// Envelopes queued before [`start`](Self::start) are forwarded once the
    /// worker runs.
    ///
    /// # Errors
    ///
    /// Returns [`OutboxError::Full`] when every slot is taken and
    /// [`OutboxError::Stopped`] after [`stop`](Self::stop).
    pub fn enqueue(&self, envelope: Envelope) -> Result<(), OutboxError> {
        if self.shared.stopped.load(Ordering::Acquire) {
            return Err(OutboxError::Stopped);
        }
        let taken = self
            .shared
            .occupied
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            });
        if taken.is_err() {
            return Err(OutboxError::Full(self.capacity));
        }
        if let Err(envelope) = self.shared.queue.push(envelope) {
            // unreachable while slots bound the queue, but never leak a slot
            self.shared.occupied.fetch_sub(1, Ordering::AcqRel);
            drop(envelope);
            return Err(OutboxError::Full(self.capacity));
        }
        self.shared.notify.notify_one();
        Ok(())
    }

    /// Spawn the worker. Must be called within a tokio runtime.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.is_some() || self.shared.stopped.load(Ordering::Acquire) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        *worker = Some(tokio::spawn(async move {
            loop {
                while let Some(envelope) = shared.queue.pop() {
                    tokio::spawn(Arc::clone(&shared).deliver(envelope));
                }
                if shared.stopped.load(Ordering::Acquire) {
                    break;
                }
                shared.notify.notified().await;
            }
            debug!("outbox worker stopped");
        }));
        debug!(capacity = self.capacity, "outbox started");
    }

    /// Stop the worker. Pending envelopes are dropped and retries end.
    pub fn stop(&self) {
        self.shared.stopped.store(true, Ordering::Release);
        self.shared.notify.notify_one();
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
        while self.shared.queue.pop().is_some() {
            self.shared.occupied.fetch_sub(1, Ordering::AcqRel);
        }
    }

    /// Envelopes queued or in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.occupied.load(Ordering::Acquire)
    }

    /// Whether no envelope is queued or in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of envelopes.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Drop for Outbox {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Flags, Topic, expiry_after};
    use std::sync::atomic::AtomicU32;

    /// Fails the first `failures` attempts, then succeeds.
    struct Flaky {
        failures: u32,
        attempts: AtomicU32,
        delivered: AtomicU32,
    }

    impl Flaky {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                attempts: AtomicU32::new(0),
                delivered: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl Forwarder for Flaky {
        async fn forward(&self, _envelope: &Envelope) -> Result<(), RouterError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                return Err(RouterError::NoPeers);
            }
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn envelope(ttl: Duration) -> Envelope {
        Envelope::new(vec![1], Topic::default(), Flags::raw(), expiry_after(ttl), vec![]).unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    #[test]
    fn test_full() {
        let outbox = Outbox::new(2, Duration::from_millis(10), Flaky::new(0));
        outbox.enqueue(envelope(Duration::from_secs(60))).unwrap();
        outbox.enqueue(envelope(Duration::from_secs(60))).unwrap();
        assert_eq!(
            outbox.enqueue(envelope(Duration::from_secs(60))),
            Err(OutboxError::Full(2))
        );
        assert_eq!(outbox.len(), 2);
    }

    #[tokio::test]
    async fn test_forwards_queued_envelopes() {
        let flaky = Flaky::new(0);
        let outbox = Outbox::new(4, Duration::from_millis(10), flaky.clone());
        outbox.enqueue(envelope(Duration::from_secs(60))).unwrap();
        outbox.start();
        outbox.enqueue(envelope(Duration::from_secs(60))).unwrap();
        settle().await;

        assert_eq!(flaky.delivered.load(Ordering::SeqCst), 2);
        assert!(outbox.is_empty());
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let flaky = Flaky::new(3);
        let outbox = Outbox::new(1, Duration::from_millis(5), flaky.clone());
        outbox.start();
        outbox.enqueue(envelope(Duration::from_secs(60))).unwrap();
        // the slot stays taken while retrying
        assert_eq!(
            outbox.enqueue(envelope(Duration::from_secs(60))),
            Err(OutboxError::Full(1))
        );
        settle().await;

        assert_eq!(flaky.attempts.load(Ordering::SeqCst), 4);
        assert_eq!(flaky.delivered.load(Ordering::SeqCst), 1);
        assert!(outbox.is_empty());
    }

    #[tokio::test]
    async fn test_expired_envelope_is_dropped() {
        let flaky = Flaky::new(u32::MAX);
        let outbox = Outbox::new(1, Duration::from_millis(5), flaky.clone());
        outbox.start();
        // expiry is in whole seconds: a zero ttl expires within a second
        outbox.enqueue(envelope(Duration::ZERO)).unwrap();
        tokio::time::sleep(Duration::from_millis(1_200)).await;

        assert!(outbox.is_empty());
        assert_eq!(flaky.delivered.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop() {
        let outbox = Outbox::new(2, Duration::from_millis(5), Flaky::new(0));
        outbox.enqueue(envelope(Duration::from_secs(60))).unwrap();
        outbox.stop();
        assert!(outbox.is_empty());
        assert_eq!(
            outbox.enqueue(envelope(Duration::from_secs(60))),
            Err(OutboxError::Stopped)
        );
    }
}
