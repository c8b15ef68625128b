//! Telemetry module for EdgeGen CORE.
//!
//! Structured logging, request spans, metrics facade hooks and the
//! last-generation ledger.

mod logging;
mod metrics;
mod spans;
mod store;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use self::metrics::{
    record_cache_bytes, record_cache_eviction, record_cache_hit, record_cache_miss,
    record_generation_failure, record_generation_success, record_model_load,
    record_pipeline_stage,
};
pub use spans::{GenerationSpan, SpanExt};
pub use store::{GenerationLedger, GenerationRecord};
