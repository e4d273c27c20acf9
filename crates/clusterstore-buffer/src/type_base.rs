//! Per-type sizing policy and aggregate buffer statistics.
//!
//! A [`BufferTypeBase`] is shared by every buffer of one element type. It
//! decides how many clusters a buffer allocates and mirrors the element
//! counts of all active and held buffers of that type.
//!
//! The most recently activated buffer keeps growing while it is the write
//! target, so its live count is not folded into `active_used_elems` on
//! every append. Instead the entry remembers *which* buffer is pending
//! (`last_used`) and folds its count in lazily: on the next activation,
//! when that buffer goes on hold, or when the aggregate is read. Callers
//! supply the pending buffer's current count through a lookup closure.

use clusterstore_core::BufferId;
use tracing::warn;

use crate::config::BufferTypeConfig;
use crate::error::ArenaError;

/// Sizing policy and live statistics for one buffer type.
#[derive(Debug)]
pub struct BufferTypeBase {
    cluster_size: usize,
    min_clusters: usize,
    max_clusters: usize,
    active_buffers: u32,
    hold_buffers: u32,
    active_used_elems: usize,
    hold_used_elems: usize,
    /// Buffer whose live count is not yet in `active_used_elems`.
    last_used: Option<BufferId>,
}

impl BufferTypeBase {
    /// Create a type entry from its sizing policy.
    ///
    /// `min_clusters` is clamped to `max_clusters`.
    ///
    /// # Panics
    ///
    /// Panics if `cluster_size` is zero.
    pub fn new(config: BufferTypeConfig) -> Self {
        assert!(config.cluster_size > 0, "cluster_size must be positive");
        Self::from_config(config)
    }

    /// Validate the policy, then create the type entry.
    pub fn try_new(config: BufferTypeConfig) -> Result<Self, ArenaError> {
        config.validate()?;
        Ok(Self::from_config(config))
    }

    fn from_config(config: BufferTypeConfig) -> Self {
        Self {
            cluster_size: config.cluster_size as usize,
            min_clusters: config.min_clusters.min(config.max_clusters) as usize,
            max_clusters: config.max_clusters as usize,
            active_buffers: 0,
            hold_buffers: 0,
            active_used_elems: 0,
            hold_used_elems: 0,
            last_used: None,
        }
    }

    /// Elements per cluster.
    pub fn cluster_size(&self) -> usize {
        self.cluster_size
    }

    /// Minimum clusters per buffer (already clamped to `max_clusters`).
    pub fn min_clusters(&self) -> usize {
        self.min_clusters
    }

    /// Maximum clusters per buffer.
    pub fn max_clusters(&self) -> usize {
        self.max_clusters
    }

    /// Buffers of this type currently active.
    pub fn active_buffers(&self) -> u32 {
        self.active_buffers
    }

    /// Buffers of this type currently on hold.
    pub fn hold_buffers(&self) -> u32 {
        self.hold_buffers
    }

    /// Folded active element count (excludes the pending buffer).
    pub fn active_used_elems(&self) -> usize {
        self.active_used_elems
    }

    /// Element count of all held buffers.
    pub fn hold_used_elems(&self) -> usize {
        self.hold_used_elems
    }

    /// The sizing policy this entry was built from (after clamping).
    pub fn policy(&self) -> BufferTypeConfig {
        BufferTypeConfig::new(self.cluster_size as u32)
            .with_clusters(self.min_clusters as u32, self.max_clusters as u32)
    }

    /// The buffer whose live count is pending a flush, if any.
    pub fn last_used(&self) -> Option<BufferId> {
        self.last_used
    }

    /// Active element count including the pending buffer.
    pub fn total_active_used_elems(&self, used_of: impl Fn(BufferId) -> usize) -> usize {
        self.active_used_elems + self.last_used.map_or(0, used_of)
    }

    /// Elements reserved at the start of `buffer_id`.
    ///
    /// Buffer 0 reserves one cluster so that offset 0 can never name a
    /// valid element.
    pub fn reserved_elements(&self, buffer_id: BufferId) -> usize {
        if buffer_id == BufferId::RESERVED {
            self.cluster_size
        } else {
            0
        }
    }

    /// Fold the pending buffer's live count into the active aggregate.
    pub fn flush_last_used(&mut self, used_of: impl Fn(BufferId) -> usize) {
        if let Some(last) = self.last_used.take() {
            self.active_used_elems += used_of(last);
        }
    }

    /// Record that `buffer_id` became active.
    ///
    /// Flushes the previously pending buffer, then makes `buffer_id` the
    /// pending one. Returns how many elements the buffer must reserve; the
    /// caller initialises them and counts them as both used and dead.
    pub fn on_active(
        &mut self,
        buffer_id: BufferId,
        used_of: impl Fn(BufferId) -> usize,
    ) -> usize {
        self.flush_last_used(used_of);
        self.active_buffers += 1;
        self.last_used = Some(buffer_id);
        self.reserved_elements(buffer_id)
    }

    /// Record `count` elements appended to the active buffer `buffer_id`.
    ///
    /// The pending buffer is counted when it is flushed; any other active
    /// buffer is folded in immediately.
    pub fn record_append(&mut self, buffer_id: BufferId, count: usize) {
        if self.last_used != Some(buffer_id) {
            self.active_used_elems += count;
        }
    }

    /// Record that `buffer_id`, holding `used_elems` elements, went on hold.
    ///
    /// # Panics
    ///
    /// Panics if no buffer of this type is active or the active aggregate
    /// would underflow.
    pub fn on_hold(&mut self, buffer_id: BufferId, used_elems: usize) {
        if self.last_used == Some(buffer_id) {
            self.flush_last_used(|_| used_elems);
        }
        assert!(self.active_buffers > 0, "on_hold with no active buffers");
        self.active_buffers -= 1;
        self.hold_buffers += 1;
        assert!(
            self.active_used_elems >= used_elems,
            "active used elements underflow: {} < {used_elems}",
            self.active_used_elems
        );
        self.active_used_elems -= used_elems;
        self.hold_used_elems += used_elems;
    }

    /// Record that a held buffer with `used_elems` elements was freed.
    ///
    /// # Panics
    ///
    /// Panics if no buffer of this type is on hold or the hold aggregate
    /// would underflow.
    pub fn on_free(&mut self, used_elems: usize) {
        assert!(self.hold_buffers > 0, "on_free with no held buffers");
        self.hold_buffers -= 1;
        assert!(
            self.hold_used_elems >= used_elems,
            "hold used elements underflow: {} < {used_elems}",
            self.hold_used_elems
        );
        self.hold_used_elems -= used_elems;
    }

    /// Number of clusters a buffer should allocate.
    ///
    /// `size_needed` is the number of elements the caller must be able to
    /// place; `cluster_ref_limit` is the most clusters the directory's
    /// element references can address in one buffer. The result grows the
    /// type's footprint by `min_clusters` over what is in use, is at least
    /// large enough for the request, and never exceeds any limit.
    ///
    /// # Panics
    ///
    /// Panics if the live element count is not cluster-aligned, if the
    /// request overflows `usize`, or if no size within the limits can hold
    /// the request (resource exhaustion is fatal here).
    pub fn clusters_to_allocate(
        &self,
        buffer_id: BufferId,
        size_needed: usize,
        cluster_ref_limit: u64,
        used_of: impl Fn(BufferId) -> usize,
    ) -> usize {
        let reserved = self.reserved_elements(buffer_id);
        let used = self.total_active_used_elems(used_of);
        assert!(
            used % self.cluster_size == 0,
            "used elements {used} not a multiple of cluster size {}",
            self.cluster_size
        );

        let max_clusters = ((usize::MAX / self.cluster_size) as u64)
            .min(cluster_ref_limit)
            .min(self.max_clusters as u64) as usize;
        let mut min_clusters = self.min_clusters;
        if min_clusters > max_clusters {
            warn!(
                min_clusters,
                max_clusters, "min_clusters exceeds addressable clusters; clamping"
            );
            min_clusters = max_clusters;
        }

        let Some(total) = size_needed
            .checked_add(reserved)
            .and_then(|n| n.checked_add(self.cluster_size - 1))
        else {
            panic!("buffer size request overflows: {size_needed} + {reserved} reserved");
        };
        let need_clusters = total / self.cluster_size;
        let used_clusters = used / self.cluster_size;

        let want_clusters = used_clusters
            .saturating_add(min_clusters)
            .max(need_clusters)
            .min(max_clusters);
        assert!(
            want_clusters >= need_clusters,
            "cannot fit {need_clusters} clusters within limit of {max_clusters}"
        );
        want_clusters
    }
}

impl Drop for BufferTypeBase {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        assert_eq!(self.active_buffers, 0, "type dropped with active buffers");
        assert_eq!(self.hold_buffers, 0, "type dropped with held buffers");
        assert_eq!(self.active_used_elems, 0, "type dropped with active elements");
        assert_eq!(self.hold_used_elems, 0, "type dropped with held elements");
        assert!(self.last_used.is_none(), "type dropped with a pending buffer");
    }
}
