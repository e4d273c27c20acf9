//! Strongly-typed identifiers for buffers and buffer types.

use std::fmt;

/// Identifies one buffer slot within a buffer arena.
///
/// Buffer ids are small, dense integers handed out by the directory that
/// owns the arena. `BufferId(0)` is special: it carries one reserved
/// cluster so that element offset 0 can act as the invalid reference.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u32);

impl BufferId {
    /// The buffer holding the reserved (invalid-reference) cluster.
    pub const RESERVED: BufferId = BufferId(0);

    /// The id as a slot index.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for BufferId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Identifies a registered buffer type (element sizing policy + stats).
///
/// Type ids are assigned sequentially on registration. Each type owns
/// exactly one free-list anchor, so a `TypeId` also names that anchor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

impl TypeId {
    /// The id as an index into the type registry.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TypeId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}
