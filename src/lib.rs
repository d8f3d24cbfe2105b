use once_cell::sync::Lazy;

pub mod bitmap;
pub mod cached_best;
pub mod config;
pub mod cpudl;
pub mod error;
pub mod flat_combining;
pub mod node;
pub mod node_allocator;
pub mod order;
pub mod skiplist;
pub mod structure_lock;

pub use bitmap::{AtomicBitmap, CpuMask};
pub use config::CpudlConfig;
pub use cpudl::{Cpudl, DeadlineIndex, FindQuery, Operation};
pub use error::{Error, Result};
pub use order::{DeadlineOrder, EarliestFirst, LatestFirst};

/// Alignment for cache lines (typically 64 bytes on modern CPUs)
pub(crate) static CACHE_LINE_SIZE: Lazy<usize> = Lazy::new(|| {
    // Try data cache first (most relevant for our use case)
    cache_size::cache_line_size(1, cache_size::CacheType::Data)
        // Fall back to unified cache if data cache info isn't available
        .or_else(|| cache_size::cache_line_size(1, cache_size::CacheType::Unified))
        // Try L2 cache if L1 isn't available
        .or_else(|| cache_size::cache_line_size(2, cache_size::CacheType::Data))
        .or_else(|| cache_size::cache_line_size(2, cache_size::CacheType::Unified))
        // Default to 64 bytes if all detection fails
        .unwrap_or(64)
});

#[cfg(test)]
pub(crate) fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
