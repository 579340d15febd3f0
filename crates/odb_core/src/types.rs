//! Core type definitions for the object layer.

use std::fmt;

/// Sentinel returned by `store_if_not_inlined` when the caller must write
/// the object inline rather than by reference.
pub const INLINE_SENTINEL: u64 = u64::MAX;

/// Object identifier.
///
/// Object ids are monotonically allocated by the owning database and
/// never reused. Zero means "unassigned".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Oid(pub u64);

impl Oid {
    /// The unassigned object id.
    pub const UNASSIGNED: Oid = Oid(0);

    /// Creates an object id.
    #[must_use]
    pub const fn new(oid: u64) -> Self {
        Self(oid)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns `true` if the id has been assigned.
    #[must_use]
    pub const fn is_assigned(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "oid:{}", self.0)
    }
}

/// Identifier for a table (persistent representation of a user type).
///
/// Table ids are stable and assigned when tables are registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TableId(pub u32);

impl TableId {
    /// Creates a table id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table:{}", self.0)
    }
}

/// Per-transaction lifecycle state of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// Materialized from the store; content matches the snapshot.
    Read,
    /// Content must be written at commit.
    Dirty,
    /// The object is deleted; later stores are suppressed.
    Deleted,
}

/// Transaction-local metadata attached to a live object.
///
/// Keyed by reference identity of the object handle. Invariants:
/// - `Dirty` with an assigned id means the id is in the dirty set
/// - `Deleted` means the id is in neither the dirty set nor the
///   oid side of the identity cache
/// - an unassigned id only occurs with `Dirty` (pending first write) or
///   `Deleted` (never written)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Object id, zero until the first store allocates one.
    pub id: Oid,
    /// Lifecycle state.
    pub state: ObjectState,
}

impl ObjectMetadata {
    /// Metadata for an object materialized from the store.
    #[must_use]
    pub const fn read(id: Oid) -> Self {
        Self {
            id,
            state: ObjectState::Read,
        }
    }

    /// Metadata for an object awaiting its first or next write.
    #[must_use]
    pub const fn dirty(id: Oid) -> Self {
        Self {
            id,
            state: ObjectState::Dirty,
        }
    }

    /// Metadata for a deleted object.
    #[must_use]
    pub const fn deleted(id: Oid) -> Self {
        Self {
            id,
            state: ObjectState::Deleted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oid_assignment() {
        assert!(!Oid::UNASSIGNED.is_assigned());
        assert!(Oid::new(1).is_assigned());
    }

    #[test]
    fn oid_ordering() {
        assert!(Oid::new(1) < Oid::new(2));
    }

    #[test]
    fn display_forms() {
        assert_eq!(format!("{}", Oid::new(7)), "oid:7");
        assert_eq!(format!("{}", TableId::new(3)), "table:3");
    }

    #[test]
    fn metadata_constructors() {
        assert_eq!(ObjectMetadata::read(Oid::new(1)).state, ObjectState::Read);
        assert_eq!(ObjectMetadata::dirty(Oid::new(1)).state, ObjectState::Dirty);
        assert_eq!(
            ObjectMetadata::deleted(Oid::UNASSIGNED).state,
            ObjectState::Deleted
        );
    }
}
