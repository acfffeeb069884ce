//! # Hive Core
//!
//! Store-and-forward messaging over a Hive overlay.
//!
//! This crate provides:
//! - The [`Envelope`] wire format with topics and routing flags
//! - Replay suppression through a TTL [`DigestCache`]
//! - A bounded, retrying [`Outbox`]
//! - A [`LoadBalancer`] spreading sends across the peers of each bin
//! - The [`Router`], which delivers envelopes to topic handlers and forwards
//!   them toward their destination
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Router                                   │
//! │   (handlers, key store, forwarding decisions)                   │
//! ├─────────────────────────────────────────────────────────────────┤
//! │           Outbox          │         LoadBalancer                │
//! │   (bounded retry queue)   │   (least used peer per bin)         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                  hive-discovery Kademlia                         │
//! │   (connected peers ordered by proximity)                        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use hive_core::{Envelope, Flags, Topic, expiry_after};
//! use std::time::Duration;
//!
//! let envelope = Envelope::new(
//!     vec![0xab],
//!     Topic::from_name("chat"),
//!     Flags::raw(),
//!     expiry_after(Duration::from_secs(60)),
//!     b"hello".to_vec(),
//! )
//! .unwrap();
//! assert!(envelope.is_partial());
//!
//! let bytes = envelope.to_bytes().unwrap();
//! assert_eq!(Envelope::from_bytes(&bytes, 1 << 20).unwrap(), envelope);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod digest_cache;
pub mod error;
pub mod load_balancer;
pub mod message;
pub mod outbox;
pub mod pss;

pub use digest_cache::{DigestCache, TtlDigestCache};
pub use error::{MessageError, OutboxError};
pub use load_balancer::{BalancedBin, LoadBalancer};
pub use message::{Digest, Envelope, Flags, TOPIC_LENGTH, Topic, expiry_after, validate_address};
pub use outbox::{Forwarder, Outbox};
pub use pss::{
    ChannelSender, Disposition, Handler, HandlerCaps, HandlerError, KeyStore, PeerBinding,
    PeerSender, Received, Registration, Router, RouterError, RouterParams, TransportError,
};
