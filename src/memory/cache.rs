//! Size-aware LRU cache of loaded native models.
//!
//! One cache exists per model family. It is not synchronized: the
//! orchestrator only touches it while holding that family's lock.
//!
//! Eviction runs before an insert completes, until both the entry-count and
//! byte budgets hold for the incoming model. A single model larger than the
//! byte budget is still admitted once everything else has been evicted.
//! Every removed model is closed exactly once, synchronously; a close failure
//! is logged and the entry is dropped from the map regardless.

use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::oracle::MemoryOracle;
use super::thresholds::CACHE_PRESSURE_MARGIN_MB;
use crate::engine::ManagedModel;
use crate::telemetry;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Budget for one model cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelCacheConfig {
    /// Maximum number of resident models.
    pub max_entries: usize,
    /// Maximum summed footprint of resident models, in MB.
    pub max_memory_mb: u64,
    /// Evict while system available memory is below this many MB.
    /// Only consulted when a memory oracle is attached.
    pub pressure_margin_mb: Option<u64>,
}

impl Default for ModelCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 2,
            max_memory_mb: 4096,
            pressure_margin_mb: Some(CACHE_PRESSURE_MARGIN_MB),
        }
    }
}

/// One resident model and its bookkeeping.
pub struct CacheEntry<T> {
    model: T,
    size_bytes: u64,
    load_time: Duration,
    inserted_at: Instant,
    last_used: u64,
    hit_count: u64,
}

impl<T> CacheEntry<T> {
    pub fn model(&self) -> &T {
        &self.model
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn load_time(&self) -> Duration {
        self.load_time
    }

    pub fn age(&self) -> Duration {
        self.inserted_at.elapsed()
    }

    /// Logical access timestamp; strictly increases on every hit.
    pub fn last_used(&self) -> u64 {
        self.last_used
    }

    pub fn hit_count(&self) -> u64 {
        self.hit_count
    }
}

/// Read-only cache snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub total_size_mb: f64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

/// LRU cache of loaded models keyed by cache key string.
pub struct ModelCache<T: ManagedModel> {
    label: &'static str,
    config: ModelCacheConfig,
    entries: LruCache<String, CacheEntry<T>>,
    total_bytes: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    clock: u64,
    memory_provider: Option<Arc<dyn MemoryOracle>>,
}

impl<T: ManagedModel> ModelCache<T> {
    /// Create a cache. `label` names the cache in logs and metrics.
    pub fn new(label: &'static str, mut config: ModelCacheConfig) -> Self {
        config.max_entries = config.max_entries.max(1);
        Self {
            label,
            config,
            entries: LruCache::unbounded(),
            total_bytes: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            clock: 0,
            memory_provider: None,
        }
    }

    /// Attach a system memory oracle to widen eviction under pressure.
    pub fn with_memory_provider(mut self, provider: Arc<dyn MemoryOracle>) -> Self {
        self.memory_provider = Some(provider);
        self
    }

    pub fn config(&self) -> &ModelCacheConfig {
        &self.config
    }

    /// Look up a model, marking it most recently used.
    pub fn get(&mut self, key: &str) -> Option<&mut T> {
        match self.entries.get_mut(key) {
            Some(entry) => {
                self.clock += 1;
                entry.last_used = self.clock;
                entry.hit_count += 1;
                self.hits += 1;
                telemetry::record_cache_hit(self.label);
                Some(&mut entry.model)
            }
            None => {
                self.misses += 1;
                telemetry::record_cache_miss(self.label);
                None
            }
        }
    }

    /// Insert a model, evicting least-recently-used entries first.
    ///
    /// An existing entry under `key` is closed before it is replaced.
    pub fn put(&mut self, key: impl Into<String>, model: T, size_bytes: u64, load_time: Duration) {
        let key = key.into();

        if let Some(old) = self.entries.pop(&key) {
            self.total_bytes = self.total_bytes.saturating_sub(old.size_bytes);
            debug!(cache = self.label, key = %key, "replacing cached model");
            self.close_entry(&key, old);
        }

        let budget = self.budget_bytes();
        while !self.entries.is_empty()
            && (self.entries.len() >= self.config.max_entries
                || self.total_bytes + size_bytes > budget)
        {
            self.evict_lru();
        }
        self.relieve_pressure();

        if size_bytes > budget {
            warn!(
                cache = self.label,
                key = %key,
                size_mb = size_bytes / BYTES_PER_MB,
                budget_mb = self.config.max_memory_mb,
                "model exceeds cache budget; admitting alone"
            );
        }

        self.clock += 1;
        let entry = CacheEntry {
            model,
            size_bytes,
            load_time,
            inserted_at: Instant::now(),
            last_used: self.clock,
            hit_count: 0,
        };
        self.entries.push(key.clone(), entry);
        self.total_bytes += size_bytes;
        telemetry::record_cache_bytes(self.label, self.total_bytes);
        info!(
            cache = self.label,
            key = %key,
            size_mb = size_bytes / BYTES_PER_MB,
            load_ms = load_time.as_millis() as u64,
            entries = self.entries.len(),
            "model cached"
        );
    }

    /// Remove and close the entry under `key`.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.entries.pop(key) {
            Some(entry) => {
                self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
                self.close_entry(key, entry);
                telemetry::record_cache_bytes(self.label, self.total_bytes);
                true
            }
            None => false,
        }
    }

    /// Remove and close the least-recently-used entry.
    pub fn evict_lru(&mut self) -> bool {
        let Some((key, entry)) = self.entries.pop_lru() else {
            return false;
        };
        self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
        self.evictions += 1;
        telemetry::record_cache_eviction(self.label);
        info!(
            cache = self.label,
            key = %key,
            size_mb = entry.size_bytes / BYTES_PER_MB,
            hits = entry.hit_count,
            "evicting least recently used model"
        );
        self.close_entry(&key, entry);
        telemetry::record_cache_bytes(self.label, self.total_bytes);
        true
    }

    /// Close every entry and reset all counters.
    pub fn clear(&mut self) {
        while let Some((key, entry)) = self.entries.pop_lru() {
            self.close_entry(&key, entry);
        }
        self.total_bytes = 0;
        self.hits = 0;
        self.misses = 0;
        self.evictions = 0;
        telemetry::record_cache_bytes(self.label, 0);
    }

    pub fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        CacheStats {
            entries: self.entries.len(),
            total_size_mb: self.total_bytes as f64 / BYTES_PER_MB as f64,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                self.hits as f64 / lookups as f64
            },
        }
    }

    /// Inspect an entry without touching its recency or counters.
    pub fn entry(&self, key: &str) -> Option<&CacheEntry<T>> {
        self.entries.peek(key)
    }

    /// Mutable access without touching recency or counters.
    pub fn peek_mut(&mut self, key: &str) -> Option<&mut T> {
        self.entries.peek_mut(key).map(|entry| &mut entry.model)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Keys ordered from least to most recently used.
    pub fn keys_lru_first(&self) -> Vec<String> {
        self.entries.iter().rev().map(|(k, _)| k.clone()).collect()
    }

    fn budget_bytes(&self) -> u64 {
        self.config.max_memory_mb.saturating_mul(BYTES_PER_MB)
    }

    fn relieve_pressure(&mut self) {
        let (Some(provider), Some(margin)) =
            (self.memory_provider.clone(), self.config.pressure_margin_mb)
        else {
            return;
        };
        while !self.entries.is_empty() {
            let available = provider.available_mb();
            if available >= margin {
                break;
            }
            warn!(
                cache = self.label,
                available_mb = available,
                margin_mb = margin,
                "system memory below margin; evicting"
            );
            self.evict_lru();
        }
    }

    fn close_entry(&self, key: &str, entry: CacheEntry<T>) {
        if let Err(e) = entry.model.close() {
            warn!(cache = self.label, key = %key, error = %e, "failed to close cached model");
        }
    }
}

impl<T: ManagedModel> Drop for ModelCache<T> {
    fn drop(&mut self) {
        while let Some((key, entry)) = self.entries.pop_lru() {
            self.close_entry(&key, entry);
        }
    }
}
