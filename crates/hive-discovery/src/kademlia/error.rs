//! Topology errors.

use crate::address::Address;
use std::borrow::Cow;
use thiserror::Error;

/// Errors returned by [`Kademlia`](super::Kademlia) operations.
///
/// Every error is raised before the topology is modified.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KademliaError {
    /// Tried to register this node's own address
    #[error("cannot register own address {0:?}")]
    SelfAddress(Address),

    /// Capability index name is empty
    #[error("capability index name must not be empty")]
    EmptyIndexName,

    /// Capability index name already registered
    #[error("capability index '{0}' already exists")]
    DuplicateIndex(String),

    /// Capability index name not registered
    #[error("unregistered capability index '{0}'")]
    UnknownIndex(String),

    /// Invalid parameters
    #[error("invalid kademlia parameters: {0}")]
    InvalidParams(Cow<'static, str>),
}

impl KademliaError {
    /// Create an invalid parameters error with static context
    #[must_use]
    pub const fn invalid_params(context: &'static str) -> Self {
        KademliaError::InvalidParams(Cow::Borrowed(context))
    }
}
