//! Last-generation records per model family.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::engine::ModelFamily;

/// Metrics for one completed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub family: ModelFamily,
    pub cache_key: String,
    pub cache_hit: bool,
    pub sequential: bool,
    /// Time spent loading models for this request (zero on a cache hit).
    pub load_time: Duration,
    pub generation_time: Duration,
    pub finished_at: DateTime<Utc>,
}

/// Thread-safe store of the most recent generation per family.
#[derive(Default)]
pub struct GenerationLedger {
    records: RwLock<HashMap<ModelFamily, GenerationRecord>>,
}

impl GenerationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: GenerationRecord) {
        self.records.write().insert(record.family, record);
    }

    pub fn last(&self, family: ModelFamily) -> Option<GenerationRecord> {
        self.records.read().get(&family).cloned()
    }

    pub fn snapshot(&self) -> Vec<GenerationRecord> {
        let mut records: Vec<_> = self.records.read().values().cloned().collect();
        records.sort_by_key(|r| r.family);
        records
    }
}
