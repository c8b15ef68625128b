//! The single entry point for generation requests.
//!
//! One async mutex per model family serializes same-family requests; other
//! families interleave freely. A request locks its own family together with
//! its memory-heavy competitors, always in [`ModelFamily`] order, unloads the
//! competitors and releases them, then runs load-or-reuse and generation on
//! the blocking pool while holding only its own family.
//!
//! Validation and asset resolution happen before any lock is taken.
//! Native calls have no deadline: a hung call keeps its family locked.
//! Progress, segment and token sinks stop forwarding once the family's
//! request is cancelled.

mod slot;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn, Instrument, Span};

use crate::config::{OrchestratorConfig, SequentialLoadMode};
use crate::engine::{
    AudioOutput, CancelSlot, DiffusionEngine, DiffusionModel, EngineError, ImageOutput,
    ImageParams, ManagedModel, ModelFamily, Sink, SpeechParams, SpeechRecognitionEngine,
    SpeechRecognitionModel, SpeechSynthesisEngine, SpeechSynthesisModel, TextEngine, TextModel,
    TextOutput, TextParams, Transcription, TranscriptionParams, VideoOutput, VideoParams,
};
use crate::error::{OrchestratorError, Result};
use crate::lifecycle::{DrainOutcome, Lifecycle, LifecycleState};
use crate::memory::{CacheStats, MemoryOracle, ModelCache, ModelCacheConfig};
use crate::models::{
    AssetResolver, DiffusionModelSpec, LoadedModelSpec, Resolved, SpeechRecognitionModelSpec,
    SpeechSynthesisModelSpec, TextModelSpec,
};
use crate::pipeline::{PipelineStage, SequentialPipelineLoader};
use crate::telemetry::{self, GenerationLedger, GenerationRecord, GenerationSpan, SpanExt};

use self::slot::{Family, HeldFamily, Unload};
pub use self::slot::SlotState;

/// Engines and system collaborators injected at construction.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub text: Arc<dyn TextEngine>,
    pub diffusion: Arc<dyn DiffusionEngine>,
    pub speech_synthesis: Arc<dyn SpeechSynthesisEngine>,
    pub speech_recognition: Arc<dyn SpeechRecognitionEngine>,
    pub memory: Arc<dyn MemoryOracle>,
    pub assets: Arc<dyn AssetResolver>,
}

/// What a completed request reports besides its artifact.
struct Outcome<T> {
    value: T,
    cache_key: String,
    cache_hit: bool,
    sequential: bool,
    load_time: Duration,
    generation_time: Duration,
}

pub struct ModelOrchestrator {
    config: OrchestratorConfig,
    deps: OrchestratorDeps,
    pipeline: SequentialPipelineLoader,
    n_threads: u32,
    text: Family<Box<dyn TextModel>>,
    diffusion: Family<Box<dyn DiffusionModel>>,
    speech_synthesis: Family<Box<dyn SpeechSynthesisModel>>,
    speech_recognition: Family<Box<dyn SpeechRecognitionModel>>,
    ledger: GenerationLedger,
    lifecycle: Lifecycle,
}

fn family_cache<M: ManagedModel>(
    family: ModelFamily,
    config: &ModelCacheConfig,
    memory: &Arc<dyn MemoryOracle>,
) -> Family<M> {
    let cache =
        ModelCache::new(family.as_str(), config.clone()).with_memory_provider(memory.clone());
    Family::new(family, cache)
}

/// Sum of on-disk sizes, the fallback footprint estimate.
fn file_bytes(files: &[PathBuf]) -> u64 {
    files
        .iter()
        .filter_map(|path| std::fs::metadata(path).ok())
        .map(|meta| meta.len())
        .sum()
}

/// Stop a caller's sink once the family's request is cancelled.
fn guard_sink<E: ?Sized + 'static>(sink: &mut Option<Sink<E>>, cancel: &Arc<CancelSlot>) {
    if let Some(inner) = sink.take() {
        *sink = Some(inner.until_cancelled(cancel.clone()));
    }
}

/// Unload competitors and release their locks.
fn release_competitors(competitors: Vec<Box<dyn Unload>>) {
    for mut held in competitors {
        if held.unload() {
            info!(family = held.family().as_str(), "evicted competing family");
        }
    }
}

impl ModelOrchestrator {
    pub fn init(config: OrchestratorConfig, deps: OrchestratorDeps) -> Self {
        let n_threads = config.resolved_n_threads();
        let memory = &deps.memory;
        let pipeline = SequentialPipelineLoader::new(
            deps.diffusion.clone(),
            deps.memory.clone(),
            deps.assets.clone(),
            config.pipeline.clone(),
            n_threads,
        );

        info!(
            n_threads,
            sequential_load = ?config.sequential_load,
            evict_competing = config.evict_competing_families,
            "orchestrator initialized"
        );

        Self {
            text: family_cache(ModelFamily::Text, &config.text_cache, memory),
            diffusion: family_cache(ModelFamily::Diffusion, &config.diffusion_cache, memory),
            speech_synthesis: family_cache(
                ModelFamily::SpeechSynthesis,
                &config.speech_synthesis_cache,
                memory,
            ),
            speech_recognition: family_cache(
                ModelFamily::SpeechRecognition,
                &config.speech_recognition_cache,
                memory,
            ),
            pipeline,
            n_threads,
            ledger: GenerationLedger::new(),
            lifecycle: Lifecycle::new(),
            deps,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub async fn generate_text(
        &self,
        model: &TextModelSpec,
        mut params: TextParams,
    ) -> Result<TextOutput> {
        self.observe(ModelFamily::Text, "generate_text", async move {
            params.validate()?;
            guard_sink(&mut params.on_token, self.text.shared().cancel());
            let resolved = model.resolve(self.deps.assets.as_ref(), self.n_threads).await?;
            let engine = self.deps.text.clone();
            self.execute(
                &self.text,
                resolved,
                |_| None,
                move |p| engine.load(p),
                move |m| m.generate(&params),
            )
            .await
        })
        .await
    }

    pub async fn generate_image(
        &self,
        model: &DiffusionModelSpec,
        mut params: ImageParams,
    ) -> Result<ImageOutput> {
        self.observe(ModelFamily::Diffusion, "generate_image", async move {
            params.validate()?;
            guard_sink(&mut params.on_progress, self.diffusion.shared().cancel());
            let resolved = model.resolve(self.deps.assets.as_ref(), self.n_threads).await?;
            let estimator = self.deps.diffusion.clone();
            let engine = self.deps.diffusion.clone();
            self.execute(
                &self.diffusion,
                resolved,
                move |p| estimator.estimate_footprint(&p.model_path),
                move |p| engine.load(p),
                move |m| m.txt2img(&params),
            )
            .await
        })
        .await
    }

    /// Generate video frames.
    ///
    /// `sequential` forces the loading mode for this request; `None` applies
    /// the configured mode. Auto mode only goes sequential when the model has
    /// a separate text encoder.
    pub async fn generate_video(
        &self,
        model: &DiffusionModelSpec,
        mut params: VideoParams,
        sequential: Option<bool>,
    ) -> Result<VideoOutput> {
        self.observe(ModelFamily::Diffusion, "generate_video", async move {
            params.validate(model.video_variant)?;
            guard_sink(&mut params.on_progress, self.diffusion.shared().cancel());
            if self.use_sequential(model, sequential) {
                return self.generate_video_sequential(model, params).await;
            }
            let resolved = model.resolve(self.deps.assets.as_ref(), self.n_threads).await?;
            let estimator = self.deps.diffusion.clone();
            let engine = self.deps.diffusion.clone();
            self.execute(
                &self.diffusion,
                resolved,
                move |p| estimator.estimate_footprint(&p.model_path),
                move |p| engine.load(p),
                move |m| m.txt2vid(&params),
            )
            .await
        })
        .await
    }

    pub async fn synthesize_speech(
        &self,
        model: &SpeechSynthesisModelSpec,
        mut params: SpeechParams,
    ) -> Result<AudioOutput> {
        self.observe(ModelFamily::SpeechSynthesis, "synthesize_speech", async move {
            params.validate()?;
            if params.n_threads == 0 {
                params.n_threads = self.n_threads;
            }
            guard_sink(&mut params.on_progress, self.speech_synthesis.shared().cancel());
            let resolved = model.resolve(self.deps.assets.as_ref()).await?;
            let engine = self.deps.speech_synthesis.clone();
            self.execute(
                &self.speech_synthesis,
                resolved,
                |_| None,
                move |p| engine.load(p),
                move |m| m.synthesize(&params),
            )
            .await
        })
        .await
    }

    pub async fn transcribe(
        &self,
        model: &SpeechRecognitionModelSpec,
        mut params: TranscriptionParams,
    ) -> Result<Transcription> {
        self.observe(ModelFamily::SpeechRecognition, "transcribe", async move {
            params.validate()?;
            if params.n_threads == 0 {
                params.n_threads = self.n_threads;
            }
            let cancel = self.speech_recognition.shared().cancel();
            guard_sink(&mut params.on_progress, cancel);
            guard_sink(&mut params.on_segment, cancel);
            let resolved = model.resolve(self.deps.assets.as_ref()).await?;
            let engine = self.deps.speech_recognition.clone();
            self.execute(
                &self.speech_recognition,
                resolved,
                |_| None,
                move |p| engine.load(p),
                move |m| m.transcribe(&params),
            )
            .await
        })
        .await
    }

    /// Signal the family's running native call, if any. Does not wait.
    ///
    /// Returns true if a native handle was signalled. The request only fails
    /// with `Cancelled` if the native layer reports an abort.
    pub fn cancel_generation(&self, family: ModelFamily) -> bool {
        let signalled = self.shared(family).cancel().request();
        info!(family = family.as_str(), signalled, "cancellation requested");
        signalled
    }

    /// Close every cached model of one family. Waits for the family lock.
    pub async fn unload(&self, family: ModelFamily) -> Result<bool> {
        let mut held = self.lock_erased(family).await;
        tokio::task::spawn_blocking(move || held.unload())
            .await
            .map_err(|e| OrchestratorError::Worker(e.to_string()))
    }

    pub async fn unload_all(&self) -> Result<()> {
        for family in ModelFamily::ALL {
            self.unload(family).await?;
        }
        Ok(())
    }

    pub fn slot_state(&self, family: ModelFamily) -> SlotState {
        self.shared(family).state()
    }

    pub fn cache_stats(&self, family: ModelFamily) -> CacheStats {
        self.shared(family).stats()
    }

    pub fn active_model(&self, family: ModelFamily) -> Option<LoadedModelSpec> {
        self.shared(family).active()
    }

    pub fn last_generation(&self, family: ModelFamily) -> Option<GenerationRecord> {
        self.ledger.last(family)
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Stop admitting requests, wait for in-flight ones, then unload every
    /// idle family. A family still busy after the timeout keeps its models
    /// until the orchestrator is dropped.
    pub async fn shutdown(&self, timeout: Option<Duration>) -> DrainOutcome {
        let timeout = timeout.unwrap_or_else(|| self.config.shutdown_timeout());
        info!(timeout_ms = timeout.as_millis() as u64, "orchestrator shutting down");
        let outcome = self.lifecycle.drain(timeout).await;
        if let DrainOutcome::Timeout { remaining } = outcome {
            warn!(remaining, "shutdown drain timed out");
        }

        for family in ModelFamily::ALL {
            let Some(mut held) = self.try_lock_erased(family) else {
                warn!(family = family.as_str(), "family busy; skipping unload");
                continue;
            };
            if let Err(e) = tokio::task::spawn_blocking(move || held.unload()).await {
                error!(family = family.as_str(), error = %e, "unload task failed");
            }
        }

        self.lifecycle.mark_stopped();
        info!("orchestrator stopped");
        outcome
    }

    fn shared(&self, family: ModelFamily) -> &slot::SlotShared {
        match family {
            ModelFamily::Text => self.text.shared(),
            ModelFamily::Diffusion => self.diffusion.shared(),
            ModelFamily::SpeechSynthesis => self.speech_synthesis.shared(),
            ModelFamily::SpeechRecognition => self.speech_recognition.shared(),
        }
    }

    async fn lock_erased(&self, family: ModelFamily) -> Box<dyn Unload> {
        let held: Box<dyn Unload> = match family {
            ModelFamily::Text => Box::new(self.text.lock().await),
            ModelFamily::Diffusion => Box::new(self.diffusion.lock().await),
            ModelFamily::SpeechSynthesis => Box::new(self.speech_synthesis.lock().await),
            ModelFamily::SpeechRecognition => Box::new(self.speech_recognition.lock().await),
        };
        held
    }

    fn try_lock_erased(&self, family: ModelFamily) -> Option<Box<dyn Unload>> {
        let held: Box<dyn Unload> = match family {
            ModelFamily::Text => Box::new(self.text.try_lock()?),
            ModelFamily::Diffusion => Box::new(self.diffusion.try_lock()?),
            ModelFamily::SpeechSynthesis => Box::new(self.speech_synthesis.try_lock()?),
            ModelFamily::SpeechRecognition => Box::new(self.speech_recognition.try_lock()?),
        };
        Some(held)
    }

    /// Lock `own` and its competitors in family order.
    async fn lock_for_request<M: ManagedModel>(
        &self,
        own: &Family<M>,
    ) -> (HeldFamily<M>, Vec<Box<dyn Unload>>) {
        let family = own.family();
        let competitors: &[ModelFamily] = if self.config.evict_competing_families {
            family.competitors()
        } else {
            &[]
        };

        let mut held = Vec::with_capacity(competitors.len());
        for other in competitors.iter().filter(|c| **c < family) {
            held.push(self.lock_erased(*other).await);
        }
        let guard = own.lock().await;
        for other in competitors.iter().filter(|c| **c > family) {
            held.push(self.lock_erased(*other).await);
        }
        (guard, held)
    }

    fn use_sequential(&self, model: &DiffusionModelSpec, requested: Option<bool>) -> bool {
        let forced = requested.or(match self.config.sequential_load {
            SequentialLoadMode::Always => Some(true),
            SequentialLoadMode::Never => Some(false),
            SequentialLoadMode::Auto => None,
        });
        match forced {
            Some(sequential) => sequential,
            None => {
                model.text_encoder.is_some()
                    && SequentialLoadMode::Auto.resolve(self.deps.memory.as_ref())
            }
        }
    }

    /// Load-or-reuse then run, on the blocking pool.
    ///
    /// `estimate` is the engine's footprint estimate. It may read file
    /// headers, so it runs on the blocking pool too.
    async fn execute<M, P, T, E, L, R>(
        &self,
        family: &Family<M>,
        resolved: Resolved<P>,
        estimate: E,
        load: L,
        run: R,
    ) -> Result<Outcome<T>>
    where
        M: ManagedModel + 'static,
        P: Send + 'static,
        T: Send + 'static,
        E: FnOnce(&P) -> Option<u64> + Send + 'static,
        L: FnOnce(&P) -> std::result::Result<M, EngineError> + Send + 'static,
        R: FnOnce(&mut M) -> std::result::Result<T, EngineError> + Send + 'static,
    {
        let (mut held, competitors) = self.lock_for_request(family).await;
        let span = Span::current();

        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            release_competitors(competitors);

            let family = held.family();
            let cancel = held.cancel_slot();
            cancel.reset();

            let Resolved { params, spec, files } = resolved;
            let size_hint = estimate(&params).unwrap_or_else(|| file_bytes(&files));
            let model_path = files.first().cloned().unwrap_or_default();
            let loaded = held.ensure_loaded(&spec, size_hint, || {
                load(&params).map_err(|e| OrchestratorError::load(family, &model_path, e))
            })?;

            let model = held.model_mut(&spec.cache_key)?;
            let hook = model.cancel_hook();
            let started = Instant::now();
            let result = {
                let _armed = cancel.arm(hook);
                run(model)
            };
            let generation_time = started.elapsed();

            match result {
                Ok(value) => Ok(Outcome {
                    value,
                    cache_key: spec.cache_key,
                    cache_hit: loaded.cache_hit,
                    sequential: false,
                    load_time: loaded.load_time,
                    generation_time,
                }),
                Err(e) => {
                    if e.invalidates_handle() {
                        warn!(family = family.as_str(), error = %e, "evicting corrupted model");
                        held.evict(&spec.cache_key);
                    }
                    Err(OrchestratorError::from_run(family, e))
                }
            }
        })
        .await
        .map_err(|e| OrchestratorError::Worker(e.to_string()))?
    }

    async fn generate_video_sequential(
        &self,
        model: &DiffusionModelSpec,
        params: VideoParams,
    ) -> Result<Outcome<VideoOutput>> {
        let assets = self.pipeline.ensure_assets(model).await?;
        let (mut held, competitors) = self.lock_for_request(&self.diffusion).await;
        let pipeline = self.pipeline.clone();
        let span = Span::current();

        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            release_competitors(competitors);
            // A fully loaded model of this family would defeat the pipeline.
            held.unload();

            let cancel = held.cancel_slot();
            cancel.reset();
            held.mark_loading();
            let result = pipeline.run_blocking(assets, &params, &cancel);
            held.publish();

            let (value, report) = result?;
            Ok(Outcome {
                value,
                load_time: report.load_time(),
                generation_time: report
                    .duration(PipelineStage::GenerateWithCondition)
                    .unwrap_or_default(),
                cache_key: report.spec.cache_key,
                cache_hit: false,
                sequential: true,
            })
        })
        .await
        .map_err(|e| OrchestratorError::Worker(e.to_string()))?
    }

    /// Admission, span, metrics and ledger around one request.
    async fn observe<T, F>(
        &self,
        family: ModelFamily,
        operation: &'static str,
        request: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<Outcome<T>>>,
    {
        let _admitted = self.lifecycle.admit().ok_or(OrchestratorError::ShuttingDown)?;
        let span = GenerationSpan::new(family, operation);
        let started = Instant::now();
        let result = request.instrument(span.clone()).await;
        span.record("latency_ms", started.elapsed().as_millis() as u64);
        span.record_result(&result);

        match result {
            Ok(outcome) => {
                span.record("cache_key", outcome.cache_key.as_str());
                span.record("cache_hit", outcome.cache_hit);
                span.record("sequential", outcome.sequential);
                telemetry::record_generation_success(family.as_str(), outcome.generation_time);
                info!(
                    parent: &span,
                    cache_hit = outcome.cache_hit,
                    load_ms = outcome.load_time.as_millis() as u64,
                    generation_ms = outcome.generation_time.as_millis() as u64,
                    "generation complete"
                );
                self.ledger.record(GenerationRecord {
                    family,
                    cache_key: outcome.cache_key,
                    cache_hit: outcome.cache_hit,
                    sequential: outcome.sequential,
                    load_time: outcome.load_time,
                    generation_time: outcome.generation_time,
                    finished_at: chrono::Utc::now(),
                });
                Ok(outcome.value)
            }
            Err(e) => {
                telemetry::record_generation_failure(family.as_str(), e.kind());
                if e.is_warning() {
                    warn!(parent: &span, error = %e, "generation rejected");
                } else {
                    error!(parent: &span, error = %e, "generation failed");
                }
                Err(e)
            }
        }
    }
}
