//! Peer capabilities.
//!
//! A [`Capability`] is a protocol id plus a set of feature flags. Peers
//! advertise a [`Capabilities`] collection, and named capability indices in
//! the topology keep separate tries for the peers that match them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Number of flags a capability can carry.
pub const MAX_FLAGS: u8 = 64;

/// Errors from building capabilities.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// Flag index past [`MAX_FLAGS`]
    #[error("capability {id}: flag {flag} out of range (max {MAX_FLAGS})")]
    FlagOutOfRange {
        /// Capability id
        id: u8,
        /// Offending flag index
        flag: u8,
    },

    /// A capability with this id is already present
    #[error("capability {0} already registered")]
    Duplicate(u8),
}

/// A protocol id with its feature flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capability {
    id: u8,
    flags: u64,
}

impl Capability {
    /// Create a capability with no flags set.
    #[must_use]
    pub const fn new(id: u8) -> Self {
        Self { id, flags: 0 }
    }

    /// Create a capability with the given flags set.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::FlagOutOfRange`] for any flag index at or
    /// past [`MAX_FLAGS`].
    pub fn with_flags(id: u8, flags: &[u8]) -> Result<Self, CapabilityError> {
        let mut cap = Self::new(id);
        for &flag in flags {
            cap.set(flag)?;
        }
        Ok(cap)
    }

    /// Protocol id.
    #[must_use]
    pub const fn id(&self) -> u8 {
        self.id
    }

    /// Raw flag bits.
    #[must_use]
    pub const fn bits(&self) -> u64 {
        self.flags
    }

    /// Set flag `flag`.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::FlagOutOfRange`] if `flag >= MAX_FLAGS`.
    pub fn set(&mut self, flag: u8) -> Result<(), CapabilityError> {
        if flag >= MAX_FLAGS {
            return Err(CapabilityError::FlagOutOfRange { id: self.id, flag });
        }
        self.flags |= 1 << flag;
        Ok(())
    }

    /// Clear flag `flag`. Out-of-range flags are ignored.
    pub fn unset(&mut self, flag: u8) {
        if flag < MAX_FLAGS {
            self.flags &= !(1 << flag);
        }
    }

    /// Whether flag `flag` is set.
    #[must_use]
    pub const fn is_set(&self, flag: u8) -> bool {
        flag < MAX_FLAGS && self.flags & (1 << flag) != 0
    }

    /// Whether `other` has the same id and every flag set here.
    ///
    /// An index capability matches a peer capability when the peer provides
    /// at least the features the index requires.
    #[must_use]
    pub const fn is_subset_of(&self, other: &Capability) -> bool {
        self.id == other.id && self.flags & other.flags == self.flags
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:#x}", self.id, self.flags)
    }
}

/// Capabilities advertised by a peer, keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    caps: BTreeMap<u8, Capability>,
}

impl Capabilities {
    /// Empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a capability.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::Duplicate`] if the id is already present.
    pub fn add(&mut self, cap: Capability) -> Result<(), CapabilityError> {
        if self.caps.contains_key(&cap.id) {
            return Err(CapabilityError::Duplicate(cap.id));
        }
        self.caps.insert(cap.id, cap);
        Ok(())
    }

    /// Builder form of [`Capabilities::add`].
    ///
    /// # Errors
    ///
    /// See [`Capabilities::add`].
    pub fn with(mut self, cap: Capability) -> Result<Self, CapabilityError> {
        self.add(cap)?;
        Ok(self)
    }

    /// Capability with id `id`.
    #[must_use]
    pub fn get(&self, id: u8) -> Option<&Capability> {
        self.caps.get(&id)
    }

    /// Whether a peer with these capabilities belongs in an index for `required`.
    #[must_use]
    pub fn matches(&self, required: &Capability) -> bool {
        self.caps
            .get(&required.id)
            .is_some_and(|cap| required.is_subset_of(cap))
    }

    /// Iterate in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.caps.values()
    }

    /// Number of capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.caps.len()
    }

    /// Whether no capability is advertised.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }
}
