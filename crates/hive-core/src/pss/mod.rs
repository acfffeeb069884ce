//! Postal-service routing over the overlay.
//!
//! Envelopes are addressed to an overlay address or a prefix of one. Every
//! node that is a possible recipient tries to open the envelope and hands the
//! payload to the handlers of its topic; every other node forwards it toward
//! the destination. Partial addresses and neighbourhood (prox) topics keep
//! forwarding after delivery so that all matching nodes are reached.
//!
//! # Architecture
//!
//! ```text
//!   peer ──► Router::handle ──► expired? duplicate? ──► drop
//!                  │
//!                  ├── possible recipient ──► KeyStore::open_* ──► handlers
//!                  │                               │
//!                  │                          partial / prox
//!                  ▼                               ▼
//!               Outbox ◄──────────────────────────┘
//!                  │
//!                  ▼
//!   Router::forward ──► LoadBalancer::bins_desc ──► PeerSender::send
//! ```

mod config;
mod error;
mod handler;
mod keystore;
mod peer;
mod router;

pub use config::{
    DEFAULT_CLEAN_INTERVAL, DEFAULT_DIGEST_CACHE_TTL, DEFAULT_MAX_MSG_SIZE, DEFAULT_MSG_TTL,
    DEFAULT_OUTBOX_CAPACITY, DEFAULT_SYM_KEY_CACHE_CAPACITY, RouterParams,
};
pub use error::RouterError;
pub use handler::{Handler, HandlerCaps, HandlerError, HandlerRegistry, Received, Registration};
pub use keystore::{KeyStore, PeerBinding, public_key_id};
pub use peer::{ChannelSender, PeerSender, TransportError};
pub use router::{Disposition, Router};

/// Capability id advertised by routing nodes
pub const PSS_CAPABILITY_ID: u8 = 1;

/// Node sends envelopes
pub const CAPABILITY_SEND: u8 = 0;

/// Node receives envelopes
pub const CAPABILITY_RECEIVE: u8 = 1;

/// Node forwards envelopes for others
pub const CAPABILITY_FORWARD: u8 = 4;

/// Node accepts partial destination addresses
pub const CAPABILITY_PARTIAL: u8 = 5;

/// Node accepts empty destination addresses
pub const CAPABILITY_EMPTY: u8 = 6;
