//! Recoverable errors at the arena boundary.
//!
//! Contract violations (wrong lifecycle state, counter underflow, no valid
//! buffer size within policy) are not represented here: they indicate a
//! bug in the caller and abort via assertion.

use std::error::Error;
use std::fmt;

use clusterstore_core::{BufferId, TypeId};

/// Errors that can occur when configuring or addressing a buffer arena.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArenaError {
    /// An arena or buffer-type configuration failed validation.
    InvalidConfig {
        /// Human-readable description of the violated bound.
        reason: String,
    },
    /// A buffer id outside `0..num_buffers`.
    UnknownBuffer {
        /// The unrecognised buffer.
        buffer: BufferId,
    },
    /// A type id that was never registered.
    UnknownType {
        /// The unrecognised type.
        type_id: TypeId,
    },
    /// The type registry has handed out every representable id.
    TooManyTypes,
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { reason } => write!(f, "invalid configuration: {reason}"),
            Self::UnknownBuffer { buffer } => write!(f, "unknown buffer: {buffer}"),
            Self::UnknownType { type_id } => write!(f, "unknown buffer type: {type_id}"),
            Self::TooManyTypes => write!(f, "buffer type registry is full"),
        }
    }
}

impl Error for ArenaError {}
