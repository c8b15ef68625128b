//! Per-family slot: cache, active model, lock and published state.
//!
//! The cache and active model are only reachable through the family's async
//! mutex. State, stats and the active model are also published behind cheap
//! locks so they can be read while a long native call holds the family lock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::engine::{CancelSlot, ManagedModel, ModelFamily};
use crate::error::{OrchestratorError, Result};
use crate::memory::{CacheStats, ModelCache};
use crate::models::LoadedModelSpec;
use crate::telemetry;

/// Lifecycle of one family slot.
///
/// `Unloaded -> Loading -> Ready -> {Ready | Unloading -> Unloaded}`.
/// A failed load returns to `Unloaded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    Unloaded,
    Loading,
    Ready,
    Unloading,
}

pub(crate) struct SlotShared {
    family: ModelFamily,
    state: RwLock<SlotState>,
    active: RwLock<Option<LoadedModelSpec>>,
    stats: RwLock<CacheStats>,
    cancel: Arc<CancelSlot>,
}

impl SlotShared {
    fn new<M: ManagedModel>(family: ModelFamily, cache: &ModelCache<M>) -> Self {
        Self {
            family,
            state: RwLock::new(SlotState::Unloaded),
            active: RwLock::new(None),
            stats: RwLock::new(cache.stats()),
            cancel: Arc::new(CancelSlot::new()),
        }
    }

    pub(crate) fn state(&self) -> SlotState {
        *self.state.read()
    }

    pub(crate) fn active(&self) -> Option<LoadedModelSpec> {
        self.active.read().clone()
    }

    pub(crate) fn stats(&self) -> CacheStats {
        self.stats.read().clone()
    }

    pub(crate) fn cancel(&self) -> &Arc<CancelSlot> {
        &self.cancel
    }

    fn set_state(&self, state: SlotState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!(family = self.family.as_str(), ?previous, ?state, "slot state changed");
        }
    }

    fn publish<M: ManagedModel>(&self, slot: &FamilySlot<M>) {
        *self.stats.write() = slot.cache.stats();
        *self.active.write() = slot.active.clone();
        self.set_state(if slot.cache.is_empty() {
            SlotState::Unloaded
        } else {
            SlotState::Ready
        });
    }
}

pub(crate) struct FamilySlot<M: ManagedModel> {
    cache: ModelCache<M>,
    active: Option<LoadedModelSpec>,
}

/// A family's lock and shared state.
pub(crate) struct Family<M: ManagedModel> {
    family: ModelFamily,
    slot: Arc<Mutex<FamilySlot<M>>>,
    shared: Arc<SlotShared>,
}

impl<M: ManagedModel> Family<M> {
    pub(crate) fn new(family: ModelFamily, cache: ModelCache<M>) -> Self {
        let shared = Arc::new(SlotShared::new(family, &cache));
        Self {
            family,
            slot: Arc::new(Mutex::new(FamilySlot { cache, active: None })),
            shared,
        }
    }

    pub(crate) fn family(&self) -> ModelFamily {
        self.family
    }

    pub(crate) fn shared(&self) -> &SlotShared {
        &self.shared
    }

    pub(crate) async fn lock(&self) -> HeldFamily<M> {
        HeldFamily {
            guard: self.slot.clone().lock_owned().await,
            shared: self.shared.clone(),
        }
    }

    pub(crate) fn try_lock(&self) -> Option<HeldFamily<M>> {
        let guard = self.slot.clone().try_lock_owned().ok()?;
        Some(HeldFamily { guard, shared: self.shared.clone() })
    }
}

/// Result of making a model resident.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoadOutcome {
    pub(crate) cache_hit: bool,
    pub(crate) load_time: Duration,
}

/// Exclusive access to one family for the duration of a request.
pub(crate) struct HeldFamily<M: ManagedModel> {
    guard: OwnedMutexGuard<FamilySlot<M>>,
    shared: Arc<SlotShared>,
}

impl<M: ManagedModel> HeldFamily<M> {
    pub(crate) fn family(&self) -> ModelFamily {
        self.shared.family
    }

    pub(crate) fn cancel_slot(&self) -> Arc<CancelSlot> {
        self.shared.cancel.clone()
    }

    pub(crate) fn mark_loading(&self) {
        self.shared.set_state(SlotState::Loading);
    }

    pub(crate) fn publish(&self) {
        self.shared.publish(&self.guard);
    }

    /// Reuse the cached model for `spec` or load it.
    ///
    /// A different active model is removed (and closed) before the load.
    /// `size_hint` is used when the model reports no footprint.
    pub(crate) fn ensure_loaded<F>(
        &mut self,
        spec: &LoadedModelSpec,
        size_hint: u64,
        load: F,
    ) -> Result<LoadOutcome>
    where
        F: FnOnce() -> Result<M>,
    {
        let family = self.shared.family;
        let slot = &mut *self.guard;
        let key = spec.cache_key.as_str();

        if slot.active.as_ref().is_some_and(|active| active != spec) {
            if let Some(stale) = slot.active.take() {
                info!(
                    family = family.as_str(),
                    from = %stale.cache_key,
                    to = %key,
                    "switching model"
                );
                slot.cache.remove(&stale.cache_key);
            }
        }

        if slot.cache.get(key).is_some() {
            slot.active = Some(spec.clone());
            self.shared.publish(slot);
            return Ok(LoadOutcome { cache_hit: true, load_time: Duration::ZERO });
        }

        self.shared.set_state(SlotState::Loading);
        let started = Instant::now();
        let model = match load() {
            Ok(model) => model,
            Err(e) => {
                self.shared.publish(slot);
                return Err(e);
            }
        };
        let load_time = started.elapsed();
        let size_bytes = model.footprint_bytes().unwrap_or(size_hint);
        telemetry::record_model_load(family.as_str(), load_time);

        slot.cache.put(key, model, size_bytes, load_time);
        slot.active = Some(spec.clone());
        self.shared.publish(slot);
        Ok(LoadOutcome { cache_hit: false, load_time })
    }

    pub(crate) fn model_mut(&mut self, key: &str) -> Result<&mut M> {
        let family = self.shared.family;
        self.guard.cache.peek_mut(key).ok_or_else(|| {
            OrchestratorError::Worker(format!("model {key} missing from {family} cache"))
        })
    }

    /// Drop a model whose handle can no longer be trusted.
    pub(crate) fn evict(&mut self, key: &str) {
        let slot = &mut *self.guard;
        slot.cache.remove(key);
        if slot.active.as_ref().is_some_and(|a| a.cache_key == key) {
            slot.active = None;
        }
        self.shared.publish(slot);
    }

    /// Close every cached model of this family.
    pub(crate) fn unload(&mut self) -> bool {
        let slot = &mut *self.guard;
        if slot.cache.is_empty() && slot.active.is_none() {
            return false;
        }
        self.shared.set_state(SlotState::Unloading);
        let keys = slot.cache.keys_lru_first();
        for key in &keys {
            slot.cache.remove(key);
        }
        slot.active = None;
        info!(family = self.shared.family.as_str(), models = keys.len(), "family unloaded");
        self.shared.publish(slot);
        true
    }
}

/// Type-erased held family, used for competitor eviction and unloads.
pub(crate) trait Unload: Send {
    fn family(&self) -> ModelFamily;
    fn unload(&mut self) -> bool;
}

impl<M: ManagedModel> Unload for HeldFamily<M> {
    fn family(&self) -> ModelFamily {
        HeldFamily::family(self)
    }

    fn unload(&mut self) -> bool {
        HeldFamily::unload(self)
    }
}
