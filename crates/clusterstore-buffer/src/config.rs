//! Arena and buffer-type configuration parameters.

use crate::error::ArenaError;

/// Configuration for a [`crate::BufferArena`].
///
/// Controls how many buffer slots exist and how wide element references
/// are. Validated at arena construction; immutable afterwards.
#[derive(Clone, Debug)]
pub struct ArenaConfig {
    /// Number of buffer slots (valid buffer ids are `0..num_buffers`).
    ///
    /// Default: 1024. Must be at least 1.
    pub num_buffers: u32,

    /// Number of bits an element reference spends on the cluster offset
    /// within one buffer.
    ///
    /// Bounds the clusters a single buffer may hold to
    /// `2^offset_bits`. Default: 22. Must be in `1..=63`.
    pub offset_bits: u32,
}

impl ArenaConfig {
    /// Default number of buffer slots.
    pub const DEFAULT_NUM_BUFFERS: u32 = 1024;

    /// Default offset width (22 bits + 10 buffer bits = 32-bit references).
    pub const DEFAULT_OFFSET_BITS: u32 = 22;

    /// Create a config with the given slot count and default offset width.
    pub fn new(num_buffers: u32) -> Self {
        Self {
            num_buffers,
            offset_bits: Self::DEFAULT_OFFSET_BITS,
        }
    }

    /// Maximum clusters addressable within one buffer.
    pub fn cluster_ref_limit(&self) -> u64 {
        1u64 << self.offset_bits
    }

    /// Check the documented bounds.
    pub fn validate(&self) -> Result<(), ArenaError> {
        if self.num_buffers == 0 {
            return Err(ArenaError::InvalidConfig {
                reason: "num_buffers must be >= 1 (got 0)".to_string(),
            });
        }
        if self.offset_bits == 0 || self.offset_bits > 63 {
            return Err(ArenaError::InvalidConfig {
                reason: format!(
                    "offset_bits must be in 1..=63 (got {})",
                    self.offset_bits
                ),
            });
        }
        Ok(())
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_NUM_BUFFERS)
    }
}

/// Sizing policy for one buffer type.
///
/// `min_clusters` larger than `max_clusters` is accepted here and clamped
/// by [`crate::BufferTypeBase::new`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferTypeConfig {
    /// Elements per cluster. Must be at least 1.
    pub cluster_size: u32,
    /// Clusters a freshly activated buffer reserves beyond what is in use.
    pub min_clusters: u32,
    /// Upper bound on clusters per buffer. Must be at least 1.
    pub max_clusters: u32,
}

impl BufferTypeConfig {
    /// Default minimum clusters per buffer.
    pub const DEFAULT_MIN_CLUSTERS: u32 = 1024;

    /// Default maximum clusters per buffer.
    pub const DEFAULT_MAX_CLUSTERS: u32 = 1 << 22;

    /// Create a policy with the given cluster size and default bounds.
    pub fn new(cluster_size: u32) -> Self {
        Self {
            cluster_size,
            min_clusters: Self::DEFAULT_MIN_CLUSTERS,
            max_clusters: Self::DEFAULT_MAX_CLUSTERS,
        }
    }

    /// Override the cluster bounds.
    pub fn with_clusters(mut self, min_clusters: u32, max_clusters: u32) -> Self {
        self.min_clusters = min_clusters;
        self.max_clusters = max_clusters;
        self
    }

    /// Check the documented bounds.
    pub fn validate(&self) -> Result<(), ArenaError> {
        if self.cluster_size == 0 {
            return Err(ArenaError::InvalidConfig {
                reason: "cluster_size must be >= 1 (got 0)".to_string(),
            });
        }
        if self.max_clusters == 0 {
            return Err(ArenaError::InvalidConfig {
                reason: "max_clusters must be >= 1 (got 0)".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for BufferTypeConfig {
    fn default() -> Self {
        Self::new(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_arena_config_is_valid() {
        let config = ArenaConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cluster_ref_limit(), 1 << 22);
    }

    #[test]
    fn zero_buffers_rejected() {
        let config = ArenaConfig::new(0);
        assert!(matches!(
            config.validate(),
            Err(ArenaError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn offset_bits_out_of_range_rejected() {
        let mut config = ArenaConfig::new(4);
        config.offset_bits = 0;
        assert!(config.validate().is_err());
        config.offset_bits = 64;
        assert!(config.validate().is_err());
        config.offset_bits = 63;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn type_config_rejects_zero_cluster_size() {
        let config = BufferTypeConfig::new(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn type_config_accepts_inverted_bounds() {
        // Clamped later by BufferTypeBase, not rejected.
        let config = BufferTypeConfig::new(4).with_clusters(100, 10);
        assert!(config.validate().is_ok());
    }
}
