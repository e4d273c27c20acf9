//! Benchmark workloads for the Clusterstore buffer allocator.
//!
//! - [`free_order`]: deterministic shuffled cluster offsets via seed
//! - [`filled_arena`]: an arena with one active buffer full of clusters

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use clusterstore_buffer::{ArenaConfig, BufferArena, PlainBufferType};
use clusterstore_core::{BufferId, TypeId};
use rand_chacha::rand_core::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Offsets of `clusters` clusters of `cluster_size` elements, shuffled.
///
/// Same seed, same order.
pub fn free_order(clusters: usize, cluster_size: usize, seed: u64) -> Vec<usize> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut offsets: Vec<usize> = (0..clusters).map(|c| c * cluster_size).collect();
    for i in (1..offsets.len()).rev() {
        let j = (rng.next_u64() % (i as u64 + 1)) as usize;
        offsets.swap(i, j);
    }
    offsets
}

/// An arena whose buffer 1 is active and holds `clusters` full clusters.
///
/// Free lists are enabled.
pub fn filled_arena(cluster_size: u32, clusters: usize) -> (BufferArena<u64>, TypeId) {
    let mut arena = BufferArena::new(ArenaConfig::new(4)).unwrap();
    let t = arena
        .add_type(PlainBufferType::with_clusters(cluster_size, 1024, 1 << 22))
        .unwrap();
    let elems = clusters * cluster_size as usize;
    arena.on_active(BufferId(1), t, elems).unwrap();
    arena.enable_free_lists();
    let data: Vec<u64> = (0..elems as u64).collect();
    arena.push_entries(BufferId(1), &data).unwrap();
    (arena, t)
}
