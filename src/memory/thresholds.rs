//! Memory thresholds.
//!
//! These are tuned per device class rather than derived from one formula,
//! so each call site has its own constant.

/// Minimum available memory before the sequential pipeline loads its
/// generator, sized for a multi-gigabyte text encoder + generator pair.
pub const SEQUENTIAL_LOAD_MIN_AVAILABLE_MB: u64 = 6000;

/// Devices with less total RAM than this always load video pipelines
/// sequentially in `Auto` mode.
pub const LOW_RAM_DEVICE_TOTAL_MB: u64 = 8 * 1024;

/// Available memory needed to keep the full video pipeline (encoder, generator
/// and VAE) resident at once.
pub const VIDEO_FULL_LOAD_MIN_AVAILABLE_MB: u64 = 10 * 1024;

/// Caches evict least-recently-used models while available memory is below
/// this margin.
pub const CACHE_PRESSURE_MARGIN_MB: u64 = 1024;
