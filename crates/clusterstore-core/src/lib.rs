//! Core types for the Clusterstore element-storage allocator.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the identifiers shared by the allocator, its directory, and its
//! callers, plus the memory accounting value type reported by buffers.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod id;
pub mod stats;

pub use id::{BufferId, TypeId};
pub use stats::MemoryUsage;
