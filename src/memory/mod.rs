//! Memory management: the model cache, system memory oracle and thresholds.

mod cache;
mod oracle;
pub mod thresholds;

pub use cache::{CacheEntry, CacheStats, ModelCache, ModelCacheConfig};
pub use oracle::{FixedMemoryOracle, MemoryOracle, SystemMemoryOracle};
