//! Cluster-granular buffer allocation for in-memory columnar stores.
//!
//! Buffers hold elements of one declared type, sized in clusters of
//! `cluster_size` elements. A single mutator activates, grows, retires
//! and frees buffers; any number of readers see a buffer's published
//! `(pointer, length)` without locking. Memory is only released after the
//! caller's generation tracker confirms that no reader can still see it.
//! This crate is one of the few in the workspace that may contain
//! `unsafe` code, confined to `raw` and `view`.
//!
//! # Architecture
//!
//! ```text
//! BufferArena<E> (single mutator, indexed by BufferId / TypeId)
//! ├── BufferState<E> × num_buffers
//! │   ├── ElemBuffer<E>        (fixed-capacity allocation, never grows)
//! │   ├── free list            (reusable cluster offsets)
//! │   ├── FreeListLinks        (prev/next BufferId in the type's ring)
//! │   └── Arc<PublishedView>   (atomic ptr/len/capacity for readers)
//! └── type entries
//!     ├── Box<dyn BufferType>  (element hooks + BufferTypeBase statistics)
//!     └── FreeListAnchor       (head of the ring of buffers with free slots)
//! ```
//!
//! # Growth and reclamation
//!
//! Growing a buffer never happens in place. [`BufferArena::fallback_resize`]
//! copies into a fresh [`ElemBuffer`], publishes it under release fences
//! and hands the old allocation back. Retiring a buffer goes
//! `Active → Hold → Free`; the arena enforces the order, the caller
//! decides when `Hold → Free` is safe.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod arena;
pub mod buffer_type;
pub mod config;
pub mod error;
pub mod free_list;
mod raw;
pub mod state;
pub mod type_base;
pub mod view;

// Public re-exports for the primary API surface.
pub use arena::BufferArena;
pub use buffer_type::{BufferType, PlainBufferType};
pub use config::{ArenaConfig, BufferTypeConfig};
pub use error::ArenaError;
pub use free_list::{FreeListAnchor, FreeListLinks};
pub use raw::ElemBuffer;
pub use state::{BufferState, State};
pub use type_base::BufferTypeBase;
pub use view::{BufferReader, BufferView, PublishedView};

pub use clusterstore_core::{BufferId, MemoryUsage, TypeId};
