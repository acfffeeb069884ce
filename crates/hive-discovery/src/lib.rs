//! # Hive Discovery
//!
//! Peer topology for the Hive overlay.
//!
//! This crate provides:
//! - 256-bit overlay addresses with bitwise proximity order
//! - A persistent proximity order trie ([`pot::Pot`]) with structural sharing
//! - A Kademlia connectivity table ([`Kademlia`]) with neighbourhood depth,
//!   saturation, peer suggestion and capability-filtered indices
//! - Health reports against a full network view
//!
//! ## Example
//!
//! ```rust
//! use hive_discovery::{Address, KadParams, Kademlia, PeerAddr};
//!
//! let kad = Kademlia::new(Address::random(), KadParams::default()).unwrap();
//! kad.register([PeerAddr::new(Address::random(), b"127.0.0.1:7000".to_vec())])
//!     .unwrap();
//!
//! let suggestion = kad.suggest_peer();
//! assert!(suggestion.peer.is_some());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod kademlia;
pub mod pot;

// Re-export commonly used types
pub use address::{ADDRESS_LENGTH, Address, AddressError};
pub use kademlia::{
    Capabilities, Capability, CapabilityError, Entry, Health, KadParams, Kademlia,
    KademliaError, KademliaInfo, Peer, PeerAddr, PeerEvent, PeerPot, Suggestion,
    new_peer_pot_map,
};
pub use pot::{DefaultPof, MAX_PO, Pof, Pot};
