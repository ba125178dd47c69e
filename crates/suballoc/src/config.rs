//! Sizing parameters for the node arena.

/// Configuration for [`FreeList`](crate::FreeList).
///
/// The node arena has a fixed number of slots, chosen when the list is
/// created. Each free fragment occupies one slot, so the arena must be large
/// enough for the worst fragmentation the caller expects.
///
/// Every free fragment is followed by a live allocation (or the end of the
/// space), so if no allocation is smaller than `granularity` bytes there are
/// never more than `total_size / granularity + 1` fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeListConfig {
    /// Smallest allocation size callers are expected to request, in bytes.
    ///
    /// A value of zero is treated as one.
    pub granularity: u64,

    /// Lower bound on the number of arena slots.
    pub min_nodes: usize,
}

impl Default for FreeListConfig {
    fn default() -> Self {
        Self {
            granularity: Self::DEFAULT_GRANULARITY,
            min_nodes: Self::DEFAULT_MIN_NODES,
        }
    }
}

impl FreeListConfig {
    pub const DEFAULT_GRANULARITY: u64 = 64;
    pub const DEFAULT_MIN_NODES: usize = 16;

    /// Returns a configuration with the given granularity and the default
    /// node floor.
    #[must_use]
    pub const fn with_granularity(granularity: u64) -> Self {
        Self {
            granularity,
            min_nodes: Self::DEFAULT_MIN_NODES,
        }
    }

    /// Returns the number of arena slots needed to track `total_size` bytes.
    ///
    /// The result never decreases as `total_size` grows and is at least one.
    #[must_use]
    pub fn max_nodes(&self, total_size: u64) -> usize {
        let granularity = u64::max(self.granularity, 1);
        let nodes = total_size.div_ceil(granularity).saturating_add(1);
        usize::try_from(nodes)
            .unwrap_or(usize::MAX)
            .max(self.min_nodes)
            .max(1)
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_nodes_follows_granularity() {
        let config = FreeListConfig {
            granularity: 64,
            min_nodes: 0,
        };
        assert_eq!(config.max_nodes(1024), 17);
        assert_eq!(config.max_nodes(1025), 18);
        assert_eq!(config.max_nodes(0), 1);
    }

    #[test]
    fn test_max_nodes_floor() {
        let config = FreeListConfig::default();
        assert_eq!(config.max_nodes(64), FreeListConfig::DEFAULT_MIN_NODES);
        assert_eq!(config.max_nodes(64 * 1024), 1025);
    }

    #[test]
    fn test_zero_granularity() {
        let config = FreeListConfig {
            granularity: 0,
            min_nodes: 0,
        };
        assert_eq!(config.max_nodes(10), 11);
    }

    #[test]
    fn test_monotonic() {
        let config = FreeListConfig::with_granularity(100);
        let mut prev = 0;
        for size in (0..10_000).step_by(37) {
            let nodes = config.max_nodes(size);
            assert!(nodes >= prev);
            prev = nodes;
        }
    }
}
