//! Tests for the size-aware LRU model cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use edgegen_core::engine::{EngineError, NativeModel};
use edgegen_core::memory::{FixedMemoryOracle, ModelCache, ModelCacheConfig};

const MB: u64 = 1024 * 1024;

type Closed = Arc<Mutex<Vec<String>>>;

struct Tracked {
    id: String,
    closed: Closed,
    fail_close: bool,
}

impl NativeModel for Tracked {
    fn close(self: Box<Self>) -> Result<(), EngineError> {
        self.closed.lock().unwrap().push(self.id.clone());
        if self.fail_close {
            return Err(EngineError::Close("handle busy".into()));
        }
        Ok(())
    }
}

type Cache = ModelCache<Box<dyn NativeModel>>;

fn cache(max_entries: usize, max_memory_mb: u64) -> Cache {
    ModelCache::new(
        "test",
        ModelCacheConfig { max_entries, max_memory_mb, pressure_margin_mb: None },
    )
}

fn model(id: &str, closed: &Closed) -> Box<dyn NativeModel> {
    Box::new(Tracked { id: id.to_string(), closed: closed.clone(), fail_close: false })
}

fn closed_ids(closed: &Closed) -> Vec<String> {
    closed.lock().unwrap().clone()
}

#[test]
fn test_put_evicts_single_oldest_when_full() {
    let closed = Closed::default();
    let mut cache = cache(2, 100);

    cache.put("a", model("a", &closed), 30 * MB, Duration::ZERO);
    cache.put("b", model("b", &closed), 40 * MB, Duration::ZERO);
    assert_eq!(cache.stats().entries, 2);

    cache.put("c", model("c", &closed), 35 * MB, Duration::ZERO);
    let stats = cache.stats();
    assert_eq!(stats.entries, 2);
    assert_eq!(stats.evictions, 1);
    assert_eq!(closed_ids(&closed), vec!["a"]);
    assert!(cache.contains("b") && cache.contains("c"));
}

#[test]
fn test_hit_rate_counts_hits_and_misses() {
    let closed = Closed::default();
    let mut cache = cache(2, 100);
    cache.put("a", model("a", &closed), 30 * MB, Duration::ZERO);

    assert!(cache.get("a").is_some());
    assert!(cache.get("missing").is_none());

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
}

#[test]
fn test_put_into_empty_cache_never_evicts() {
    let closed = Closed::default();
    let mut cache = cache(1, 10);
    cache.put("a", model("a", &closed), 5 * MB, Duration::ZERO);
    assert_eq!(cache.stats().evictions, 0);
    assert!(closed_ids(&closed).is_empty());
}

#[test]
fn test_get_on_empty_cache_counts_miss() {
    let mut cache = cache(2, 100);
    assert!(cache.get("never").is_none());
    assert_eq!(cache.stats().misses, 1);
    assert_eq!(cache.stats().entries, 0);
}

#[test]
fn test_remove_absent_key_leaves_counters() {
    let closed = Closed::default();
    let mut cache = cache(2, 100);
    cache.put("a", model("a", &closed), MB, Duration::ZERO);
    cache.get("a");
    let before = cache.stats();

    assert!(!cache.remove("absent"));
    assert_eq!(cache.stats(), before);
}

#[test]
fn test_access_reorders_eviction() {
    let closed = Closed::default();
    let mut cache = cache(2, 100);
    cache.put("a", model("a", &closed), MB, Duration::ZERO);
    cache.put("b", model("b", &closed), MB, Duration::ZERO);

    cache.get("a");
    cache.put("c", model("c", &closed), MB, Duration::ZERO);

    assert_eq!(closed_ids(&closed), vec!["b"]);
    assert_eq!(cache.keys_lru_first(), vec!["a", "c"]);
}

#[test]
fn test_byte_budget_evicts_until_insert_fits() {
    let closed = Closed::default();
    let mut cache = cache(5, 100);
    cache.put("a", model("a", &closed), 60 * MB, Duration::ZERO);
    cache.put("b", model("b", &closed), 30 * MB, Duration::ZERO);
    cache.put("c", model("c", &closed), 50 * MB, Duration::ZERO);

    assert_eq!(closed_ids(&closed), vec!["a"]);
    assert_eq!(cache.len(), 2);
    assert_eq!(cache.total_bytes(), 80 * MB);
}

#[test]
fn test_oversized_model_is_admitted_alone() {
    let closed = Closed::default();
    let mut cache = cache(3, 100);
    cache.put("a", model("a", &closed), 10 * MB, Duration::ZERO);
    cache.put("huge", model("huge", &closed), 150 * MB, Duration::ZERO);

    assert_eq!(closed_ids(&closed), vec!["a"]);
    assert_eq!(cache.len(), 1);
    assert!(cache.contains("huge"));
    assert_eq!(cache.total_bytes(), 150 * MB);
}

#[test]
fn test_replacing_key_closes_previous_model() {
    let closed = Closed::default();
    let mut cache = cache(2, 100);
    cache.put("a", model("a-v1", &closed), 10 * MB, Duration::ZERO);
    cache.put("a", model("a-v2", &closed), 20 * MB, Duration::ZERO);

    assert_eq!(closed_ids(&closed), vec!["a-v1"]);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.total_bytes(), 20 * MB);
    assert_eq!(cache.stats().evictions, 0);
}

#[test]
fn test_close_failure_still_removes_entry() {
    let closed = Closed::default();
    let mut cache = cache(2, 100);
    let stubborn = Box::new(Tracked { id: "s".into(), closed: closed.clone(), fail_close: true });
    cache.put("s", stubborn, 10 * MB, Duration::ZERO);

    assert!(cache.remove("s"));
    assert!(!cache.contains("s"));
    assert_eq!(cache.total_bytes(), 0);
    assert_eq!(closed_ids(&closed), vec!["s"]);
}

#[test]
fn test_evict_lru_on_empty_is_noop() {
    let mut cache = cache(2, 100);
    assert!(!cache.evict_lru());
    assert_eq!(cache.stats().evictions, 0);
}

#[test]
fn test_clear_closes_all_and_resets_counters() {
    let closed = Closed::default();
    let mut cache = cache(3, 100);
    cache.put("a", model("a", &closed), MB, Duration::ZERO);
    cache.put("b", model("b", &closed), MB, Duration::ZERO);
    cache.get("a");
    cache.get("zzz");

    cache.clear();

    let mut ids = closed_ids(&closed);
    ids.sort();
    assert_eq!(ids, vec!["a", "b"]);
    let stats = cache.stats();
    assert_eq!((stats.entries, stats.hits, stats.misses, stats.evictions), (0, 0, 0, 0));
    assert_eq!(stats.total_size_mb, 0.0);
}

#[test]
fn test_get_bumps_recency_and_hit_count() {
    let closed = Closed::default();
    let mut cache = cache(3, 100);
    cache.put("a", model("a", &closed), MB, Duration::from_millis(40));
    cache.put("b", model("b", &closed), MB, Duration::ZERO);

    let before = cache.entry("a").map(|e| (e.last_used(), e.hit_count())).unwrap();
    cache.get("a");
    let after = cache.entry("a").map(|e| (e.last_used(), e.hit_count())).unwrap();

    assert!(after.0 > before.0);
    assert_eq!(after.1, before.1 + 1);
    assert_eq!(cache.entry("a").unwrap().load_time(), Duration::from_millis(40));
    assert_eq!(cache.len(), 2);
}

#[test]
fn test_memory_pressure_widens_eviction() {
    let closed = Closed::default();
    let oracle = Arc::new(FixedMemoryOracle::new(4000, 8000));
    let mut cache: Cache = ModelCache::new(
        "pressure",
        ModelCacheConfig { max_entries: 4, max_memory_mb: 1000, pressure_margin_mb: Some(1024) },
    )
    .with_memory_provider(oracle.clone());

    cache.put("a", model("a", &closed), MB, Duration::ZERO);
    cache.put("b", model("b", &closed), MB, Duration::ZERO);
    assert_eq!(cache.len(), 2);

    oracle.set_available_mb(500);
    cache.put("c", model("c", &closed), MB, Duration::ZERO);

    assert_eq!(closed_ids(&closed), vec!["a", "b"]);
    assert_eq!(cache.keys_lru_first(), vec!["c"]);
}

#[test]
fn test_drop_closes_remaining_models() {
    let closed = Closed::default();
    {
        let mut cache = cache(3, 100);
        cache.put("a", model("a", &closed), MB, Duration::ZERO);
        cache.put("b", model("b", &closed), MB, Duration::ZERO);
    }
    assert_eq!(closed_ids(&closed).len(), 2);
}

#[test]
fn test_every_model_closed_exactly_once() {
    let closed = Closed::default();
    let mut cache = cache(3, 64);
    let mut generation = 0u32;

    for step in 0u64..200 {
        let key = format!("k{}", step % 7);
        match step % 5 {
            0 | 1 | 2 => {
                generation += 1;
                let id = format!("{key}#{generation}");
                cache.put(key.as_str(), model(&id, &closed), (step % 40 + 1) * MB, Duration::ZERO);
                assert!(cache.len() <= 3);
                if cache.len() > 1 {
                    assert!(cache.total_bytes() <= 64 * MB);
                }
            }
            3 => {
                cache.get(&key);
            }
            _ => {
                cache.remove(&key);
            }
        }
    }
    cache.clear();

    let mut counts: HashMap<String, usize> = HashMap::new();
    for id in closed_ids(&closed) {
        *counts.entry(id).or_default() += 1;
    }
    assert_eq!(counts.len(), generation as usize);
    assert!(counts.values().all(|&n| n == 1), "double close: {counts:?}");
}
