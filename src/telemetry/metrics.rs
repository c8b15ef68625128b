//! Metrics facade hooks.
//!
//! Emitted through the `metrics` crate; with no recorder installed these are
//! no-ops. Labels are the cache label or family name.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

pub fn record_cache_hit(cache: &'static str) {
    counter!("edgegen_cache_hits_total", "cache" => cache).increment(1);
}

pub fn record_cache_miss(cache: &'static str) {
    counter!("edgegen_cache_misses_total", "cache" => cache).increment(1);
}

pub fn record_cache_eviction(cache: &'static str) {
    counter!("edgegen_cache_evictions_total", "cache" => cache).increment(1);
}

pub fn record_cache_bytes(cache: &'static str, bytes: u64) {
    gauge!("edgegen_cache_resident_bytes", "cache" => cache).set(bytes as f64);
}

pub fn record_model_load(family: &'static str, elapsed: Duration) {
    counter!("edgegen_model_loads_total", "family" => family).increment(1);
    histogram!("edgegen_model_load_duration_ms", "family" => family)
        .record(elapsed.as_secs_f64() * 1000.0);
}

pub fn record_generation_success(family: &'static str, elapsed: Duration) {
    counter!("edgegen_generations_total", "family" => family, "outcome" => "ok").increment(1);
    histogram!("edgegen_generation_duration_ms", "family" => family)
        .record(elapsed.as_secs_f64() * 1000.0);
}

pub fn record_generation_failure(family: &'static str, kind: &'static str) {
    counter!("edgegen_generations_total", "family" => family, "outcome" => kind).increment(1);
}

pub fn record_pipeline_stage(stage: &'static str, elapsed: Duration) {
    histogram!("edgegen_pipeline_stage_duration_ms", "stage" => stage)
        .record(elapsed.as_secs_f64() * 1000.0);
}
