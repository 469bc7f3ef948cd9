//! Core type definitions for Vellum.

use std::fmt;

/// Identifier of a transaction.
///
/// Write transactions get the next id after the last commit; read
/// transactions report the id of the commit their snapshot reflects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the following ID.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Handle to a map, valid for the lifetime of the environment that issued it.
///
/// A handle is a registry slot plus the slot's generation, so a handle kept
/// after `close_map` or `drop_map` is recognised as stale instead of
/// silently aliasing a newer map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapHandle {
    slot: u32,
    generation: u32,
}

impl MapHandle {
    /// Handle of the unnamed default map.
    pub const DEFAULT: Self = Self::new(0, 0);

    /// Creates a handle from its raw parts.
    #[must_use]
    pub const fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    /// Returns the registry slot.
    #[must_use]
    pub const fn slot(self) -> u32 {
        self.slot
    }

    /// Returns the slot generation.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// Returns true for the unnamed default map.
    #[must_use]
    pub const fn is_default(self) -> bool {
        self.slot == 0
    }
}

impl fmt::Display for MapHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "map:{}.{}", self.slot, self.generation)
    }
}

/// A key/value pair as returned by point lookups and cursors.
pub type KeyValue = (Vec<u8>, Vec<u8>);
