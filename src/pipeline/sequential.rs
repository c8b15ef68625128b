//! Sequential pipeline loading.
//!
//! Generates video without holding the text encoder and the generator
//! resident at the same time:
//!
//! 1. EnsureAssets: resolve every file (async, before any native load)
//! 2. LoadEncoder: encoder-only load, no VAE or diffusion weights
//! 3. Precompute: encode the positive and the negative prompt
//! 4. FreeEncoder: always runs, even if Precompute failed
//! 5. MemoryGuard: abort when available memory is below the threshold
//! 6. LoadGenerator: diffusion model and VAE without a text encoder
//! 7. GenerateWithCondition: consume both conditions
//! 8. FreeGenerator: always runs
//!
//! Nothing is retried.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::{
    CancelSlot, ConditionEncoder, DiffusionEngine, DiffusionLoadParams, DiffusionModel,
    EncoderLoadParams, EngineError, ManagedModel, ModelFamily, PrecomputedCondition,
    ResidentModel, VideoOutput, VideoParams,
};
use crate::error::{OrchestratorError, Result};
use crate::memory::thresholds::SEQUENTIAL_LOAD_MIN_AVAILABLE_MB;
use crate::memory::MemoryOracle;
use crate::models::{AssetResolver, DiffusionModelSpec, LoadedModelSpec, ValidationError};
use crate::telemetry;

const FAMILY: ModelFamily = ModelFamily::Diffusion;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Minimum available memory before the generator load, in MB.
    pub min_available_mb: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { min_available_mb: SEQUENTIAL_LOAD_MIN_AVAILABLE_MB }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    EnsureAssets,
    LoadEncoder,
    Precompute,
    FreeEncoder,
    MemoryGuard,
    LoadGenerator,
    GenerateWithCondition,
    FreeGenerator,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnsureAssets => "ensure_assets",
            Self::LoadEncoder => "load_encoder",
            Self::Precompute => "precompute",
            Self::FreeEncoder => "free_encoder",
            Self::MemoryGuard => "memory_guard",
            Self::LoadGenerator => "load_generator",
            Self::GenerateWithCondition => "generate_with_condition",
            Self::FreeGenerator => "free_generator",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage timings of one completed pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub spec: LoadedModelSpec,
    pub stages: Vec<(PipelineStage, Duration)>,
}

impl PipelineReport {
    fn new(spec: LoadedModelSpec) -> Self {
        Self { spec, stages: Vec::with_capacity(8) }
    }

    fn record(&mut self, stage: PipelineStage, elapsed: Duration) {
        telemetry::record_pipeline_stage(stage.as_str(), elapsed);
        info!(
            stage = stage.as_str(),
            elapsed_ms = elapsed.as_millis() as u64,
            "pipeline stage done"
        );
        self.stages.push((stage, elapsed));
    }

    pub fn duration(&self, stage: PipelineStage) -> Option<Duration> {
        self.stages.iter().find(|(s, _)| *s == stage).map(|(_, d)| *d)
    }

    pub fn total(&self) -> Duration {
        self.stages.iter().map(|(_, d)| *d).sum()
    }

    /// Time spent in native loads.
    pub fn load_time(&self) -> Duration {
        [PipelineStage::LoadEncoder, PipelineStage::LoadGenerator]
            .iter()
            .filter_map(|s| self.duration(*s))
            .sum()
    }
}

/// Resolved inputs for the native stages.
#[derive(Debug, Clone)]
pub struct PipelineAssets {
    pub encoder: EncoderLoadParams,
    pub generator: DiffusionLoadParams,
    pub spec: LoadedModelSpec,
    resolve_time: Duration,
}

#[derive(Clone)]
pub struct SequentialPipelineLoader {
    engine: Arc<dyn DiffusionEngine>,
    memory: Arc<dyn MemoryOracle>,
    assets: Arc<dyn AssetResolver>,
    config: PipelineConfig,
    n_threads: u32,
}

impl SequentialPipelineLoader {
    pub fn new(
        engine: Arc<dyn DiffusionEngine>,
        memory: Arc<dyn MemoryOracle>,
        assets: Arc<dyn AssetResolver>,
        config: PipelineConfig,
        n_threads: u32,
    ) -> Self {
        Self { engine, memory, assets, config, n_threads }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// EnsureAssets. A failure here happens before any native load.
    ///
    /// The encoder requirement is checked before any asset is resolved.
    pub async fn ensure_assets(&self, spec: &DiffusionModelSpec) -> Result<PipelineAssets> {
        require_text_encoder(spec)?;
        let started = Instant::now();
        let resolved = spec.resolve(self.assets.as_ref(), self.n_threads).await?;

        let mut generator = resolved.params;
        let Some(encoder_path) = generator.text_encoder_path.take() else {
            return Err(missing_encoder().into());
        };

        Ok(PipelineAssets {
            encoder: EncoderLoadParams {
                encoder_path,
                n_threads: self.n_threads,
                offload_to_cpu: generator.offload_to_cpu,
            },
            generator,
            spec: resolved.spec,
            resolve_time: started.elapsed(),
        })
    }

    /// Native stages. May block the calling thread for minutes.
    pub fn run_blocking(
        &self,
        assets: PipelineAssets,
        params: &VideoParams,
        cancel: &CancelSlot,
    ) -> Result<(VideoOutput, PipelineReport)> {
        let mut report = PipelineReport::new(assets.spec.clone());
        report.record(PipelineStage::EnsureAssets, assets.resolve_time);

        let started = Instant::now();
        let encoder = self
            .engine
            .load_encoder(&assets.encoder)
            .map_err(|e| OrchestratorError::load(FAMILY, &assets.encoder.encoder_path, e))?;
        let mut encoder = ResidentModel::new(encoder, "encoder");
        report.record(PipelineStage::LoadEncoder, started.elapsed());

        let started = Instant::now();
        let conditions = {
            let _armed = cancel.arm(encoder.cancel_hook());
            encode_pair(&mut **encoder, &params.prompt, &params.negative_prompt)
        };
        report.record(PipelineStage::Precompute, started.elapsed());

        let started = Instant::now();
        if let Err(e) = encoder.release() {
            warn!(error = %e, "failed to close encoder");
        }
        report.record(PipelineStage::FreeEncoder, started.elapsed());

        let (cond, uncond) = conditions.map_err(|e| OrchestratorError::from_run(FAMILY, e))?;

        let started = Instant::now();
        let available_mb = self.memory.available_mb();
        if available_mb < self.config.min_available_mb {
            warn!(
                available_mb,
                required_mb = self.config.min_available_mb,
                "not enough memory to load generator"
            );
            return Err(OrchestratorError::InsufficientMemory {
                required_mb: self.config.min_available_mb,
                available_mb,
            });
        }
        report.record(PipelineStage::MemoryGuard, started.elapsed());

        let started = Instant::now();
        let generator = self
            .engine
            .load(&assets.generator)
            .map_err(|e| OrchestratorError::load(FAMILY, &assets.generator.model_path, e))?;
        let mut generator = ResidentModel::new(generator, "generator");
        report.record(PipelineStage::LoadGenerator, started.elapsed());

        let started = Instant::now();
        let output = {
            let _armed = cancel.arm(generator.cancel_hook());
            generator.txt2vid_with_conditions(cond, uncond, params)
        };
        report.record(PipelineStage::GenerateWithCondition, started.elapsed());

        let started = Instant::now();
        if let Err(e) = generator.release() {
            warn!(error = %e, "failed to close generator");
        }
        report.record(PipelineStage::FreeGenerator, started.elapsed());

        let output = output.map_err(|e| OrchestratorError::from_run(FAMILY, e))?;
        info!(
            frames = output.frame_count(),
            total_ms = report.total().as_millis() as u64,
            "sequential pipeline complete"
        );
        Ok((output, report))
    }

    /// Validate, resolve assets, then run the native stages on the blocking
    /// pool. `params.on_progress` goes quiet once `cancel` is requested.
    pub async fn run(
        &self,
        spec: &DiffusionModelSpec,
        mut params: VideoParams,
        cancel: Arc<CancelSlot>,
    ) -> Result<(VideoOutput, PipelineReport)> {
        params.validate(spec.video_variant)?;
        params.on_progress = params.on_progress.take().map(|s| s.until_cancelled(cancel.clone()));
        let assets = self.ensure_assets(spec).await?;
        let loader = self.clone();
        tokio::task::spawn_blocking(move || {
            cancel.reset();
            loader.run_blocking(assets, &params, &cancel)
        })
        .await
        .map_err(|e| OrchestratorError::Worker(e.to_string()))?
    }
}

fn missing_encoder() -> ValidationError {
    ValidationError("sequential loading requires a separate text encoder".to_string())
}

/// Sequential loading needs a text encoder that can be loaded on its own.
fn require_text_encoder(spec: &DiffusionModelSpec) -> Result<()> {
    match spec.text_encoder {
        Some(_) => Ok(()),
        None => Err(missing_encoder().into()),
    }
}

/// Encode both prompts. An empty negative prompt is still encoded.
fn encode_pair(
    encoder: &mut dyn ConditionEncoder,
    prompt: &str,
    negative_prompt: &str,
) -> std::result::Result<(PrecomputedCondition, PrecomputedCondition), EngineError> {
    let cond = encoder.encode(prompt)?;
    let uncond = encoder.encode(negative_prompt)?;
    Ok((cond, uncond))
}
