//! Memory accounting reported by buffers and aggregated by their owners.

/// Byte-level memory usage of one or more buffers.
///
/// `used_bytes` includes `dead_bytes`; both are bounded by
/// `allocated_bytes`. `allocated_bytes_on_hold` counts memory that is
/// still allocated but waiting for readers to drain before it can be
/// released (held buffers, held element ranges).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryUsage {
    /// Bytes allocated for element storage.
    pub allocated_bytes: usize,
    /// Bytes occupied by written elements, live or dead.
    pub used_bytes: usize,
    /// Bytes occupied by elements that have been freed.
    pub dead_bytes: usize,
    /// Bytes that are still allocated pending reader drain.
    pub allocated_bytes_on_hold: usize,
}

impl MemoryUsage {
    /// Create a usage record from its four components.
    pub fn new(
        allocated_bytes: usize,
        used_bytes: usize,
        dead_bytes: usize,
        allocated_bytes_on_hold: usize,
    ) -> Self {
        Self {
            allocated_bytes,
            used_bytes,
            dead_bytes,
            allocated_bytes_on_hold,
        }
    }

    /// Add another usage record into this one.
    pub fn merge(&mut self, other: &MemoryUsage) {
        self.allocated_bytes += other.allocated_bytes;
        self.used_bytes += other.used_bytes;
        self.dead_bytes += other.dead_bytes;
        self.allocated_bytes_on_hold += other.allocated_bytes_on_hold;
    }

    /// Bytes that hold live data (`used - dead`).
    pub fn live_bytes(&self) -> usize {
        self.used_bytes - self.dead_bytes
    }
}
