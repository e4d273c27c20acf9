//! Test utilities and fixtures for Clusterstore development.
//!
//! Provides a [`CountingBufferType`] that records every hook the arena
//! invokes, a [`Tracked`] element whose live copies can be counted, and
//! small builders for arenas used across integration tests and benches.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

pub use fixtures::{CountingBufferType, HookCounts, Tracked};

use clusterstore_buffer::{ArenaConfig, BufferArena, PlainBufferType};
use clusterstore_core::TypeId;

/// An arena of `num_buffers` slots with one plain `u64` type registered.
pub fn plain_arena(
    num_buffers: u32,
    cluster_size: u32,
    min_clusters: u32,
    max_clusters: u32,
) -> (BufferArena<u64>, TypeId) {
    let mut arena = BufferArena::new(ArenaConfig::new(num_buffers)).unwrap();
    let type_id = arena
        .add_type(PlainBufferType::with_clusters(
            cluster_size,
            min_clusters,
            max_clusters,
        ))
        .unwrap();
    (arena, type_id)
}

/// `count` clusters of `cluster_size` copies of `value`.
pub fn clusters_of(value: u64, cluster_size: usize, count: usize) -> Vec<u64> {
    vec![value; cluster_size * count]
}
