//! Diffusion engine contract (stable-diffusion.cpp-style runtimes).
//!
//! Covers image and video generation, plus the encoder-only mode used by the
//! sequential pipeline: an encoder produces `PrecomputedCondition`s that a
//! generator loaded without its text encoder consumes directly.

use std::fmt;
use std::path::{Path, PathBuf};

use super::{EngineError, NativeModel, ProgressSink};
use crate::models::LoraApplyMode;

/// Parameters used to construct a native diffusion model.
#[derive(Debug, Clone)]
pub struct DiffusionLoadParams {
    pub model_path: PathBuf,
    pub vae_path: Option<PathBuf>,
    /// T5/CLIP text encoder. `None` loads the generator without one.
    pub text_encoder_path: Option<PathBuf>,
    pub taesd_path: Option<PathBuf>,
    pub flow_shift: Option<f32>,
    pub lora_dir: Option<PathBuf>,
    pub lora_apply_mode: LoraApplyMode,
    pub n_threads: u32,
    pub offload_to_cpu: bool,
    pub keep_clip_on_cpu: bool,
    pub keep_vae_on_cpu: bool,
}

/// Parameters for an encoder-only load. No VAE or diffusion weights.
#[derive(Debug, Clone)]
pub struct EncoderLoadParams {
    pub encoder_path: PathBuf,
    pub n_threads: u32,
    pub offload_to_cpu: bool,
}

#[derive(Debug, Clone)]
pub struct ImageParams {
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub cfg_scale: f32,
    pub seed: i64,
    /// Called after every sampling step.
    pub on_progress: Option<ProgressSink>,
}

impl Default for ImageParams {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: String::new(),
            width: 512,
            height: 512,
            steps: 20,
            cfg_scale: 7.0,
            seed: -1,
            on_progress: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VideoParams {
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub video_frames: u32,
    pub steps: u32,
    pub cfg_scale: f32,
    pub seed: i64,
    /// Called after every sampling step.
    pub on_progress: Option<ProgressSink>,
}

impl Default for VideoParams {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            negative_prompt: String::new(),
            width: 512,
            height: 512,
            video_frames: 16,
            steps: 20,
            cfg_scale: 6.0,
            seed: -1,
            on_progress: None,
        }
    }
}

/// A decoded RGB(A) frame.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageOutput {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub pixels: Vec<u8>,
}

impl fmt::Debug for ImageOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageOutput")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoOutput {
    pub frames: Vec<ImageOutput>,
}

impl VideoOutput {
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

/// Encoder output consumed by a generator without re-encoding.
///
/// Not `Clone`: it is produced once per request and moved into the
/// generator, which drops it after use or on failure.
pub struct PrecomputedCondition {
    pub cross_attn: Vec<u8>,
    pub vector: Vec<u8>,
    pub concat: Vec<u8>,
}

impl PrecomputedCondition {
    pub fn size_bytes(&self) -> usize {
        self.cross_attn.len() + self.vector.len() + self.concat.len()
    }
}

impl fmt::Debug for PrecomputedCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrecomputedCondition")
            .field("bytes", &self.size_bytes())
            .finish()
    }
}

/// A loaded diffusion model.
pub trait DiffusionModel: NativeModel {
    fn txt2img(&mut self, params: &ImageParams) -> Result<ImageOutput, EngineError>;

    fn txt2vid(&mut self, params: &VideoParams) -> Result<VideoOutput, EngineError>;

    /// Generate frames from conditions produced by a [`ConditionEncoder`].
    /// The prompt fields of `params` are ignored.
    fn txt2vid_with_conditions(
        &mut self,
        cond: PrecomputedCondition,
        uncond: PrecomputedCondition,
        params: &VideoParams,
    ) -> Result<VideoOutput, EngineError>;
}

/// A text encoder loaded on its own.
pub trait ConditionEncoder: NativeModel {
    fn encode(&mut self, prompt: &str) -> Result<PrecomputedCondition, EngineError>;
}

/// Constructs diffusion models and standalone encoders.
pub trait DiffusionEngine: Send + Sync {
    fn load(&self, params: &DiffusionLoadParams) -> Result<Box<dyn DiffusionModel>, EngineError>;

    fn load_encoder(&self, params: &EncoderLoadParams)
        -> Result<Box<dyn ConditionEncoder>, EngineError>;

    /// Native footprint estimate for a weights file, when the runtime has one.
    fn estimate_footprint(&self, _path: &Path) -> Option<u64> {
        None
    }
}
