//! Per-family model descriptions and their resolution into load parameters.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::assets::{AssetError, AssetResolver, ModelLocation};
use super::cache_key::{CacheKey, LoraApplyMode};
use super::validation::VideoModelVariant;
use crate::engine::{
    DiffusionLoadParams, ModelFamily, SpeechRecognitionLoadParams, SpeechSynthesisLoadParams,
    TextLoadParams,
};

/// What is currently active in a family slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedModelSpec {
    pub family: ModelFamily,
    pub repo_id: Option<String>,
    pub filename: Option<String>,
    pub cache_key: String,
}

impl LoadedModelSpec {
    fn new(family: ModelFamily, primary: &ModelLocation, key: &CacheKey) -> Self {
        Self {
            family,
            repo_id: primary.repo_id().map(str::to_string),
            filename: primary.filename(),
            cache_key: key.render(),
        }
    }
}

/// Load parameters with every location resolved to a local path.
#[derive(Debug, Clone)]
pub struct Resolved<P> {
    pub params: P,
    pub spec: LoadedModelSpec,
    /// Every file the load reads, used for size estimation.
    pub files: Vec<PathBuf>,
}

async fn resolve_opt(
    location: &Option<ModelLocation>,
    assets: &dyn AssetResolver,
) -> Result<Option<PathBuf>, AssetError> {
    match location {
        Some(location) => Ok(Some(location.resolve(assets).await?)),
        None => Ok(None),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextModelSpec {
    pub model: ModelLocation,
    #[serde(default = "default_context_size")]
    pub context_size: u32,
    #[serde(default = "default_true")]
    pub use_mmap: bool,
    #[serde(default)]
    pub use_mlock: bool,
    #[serde(default)]
    pub use_vulkan: bool,
    #[serde(default)]
    pub chat_template: Option<String>,
    /// Accumulate turns in the native context. Off, every request starts
    /// from `TextParams::history` alone.
    #[serde(default)]
    pub store_chats: bool,
}

fn default_context_size() -> u32 {
    2048
}

fn default_true() -> bool {
    true
}

impl TextModelSpec {
    pub fn new(model: ModelLocation) -> Self {
        Self {
            model,
            context_size: default_context_size(),
            use_mmap: true,
            use_mlock: false,
            use_vulkan: false,
            chat_template: None,
            store_chats: false,
        }
    }

    pub async fn resolve(
        &self,
        assets: &dyn AssetResolver,
        n_threads: u32,
    ) -> Result<Resolved<TextLoadParams>, AssetError> {
        let model_path = self.model.resolve(assets).await?;
        let key = CacheKey::for_model(&model_path).with_variant(format!(
            "ctx={};mmap={};mlock={};vulkan={};template={};chats={}",
            self.context_size,
            self.use_mmap,
            self.use_mlock,
            self.use_vulkan,
            self.chat_template.as_deref().unwrap_or("-"),
            self.store_chats,
        ));
        Ok(Resolved {
            spec: LoadedModelSpec::new(ModelFamily::Text, &self.model, &key),
            files: vec![model_path.clone()],
            params: TextLoadParams {
                model_path,
                context_size: self.context_size,
                n_threads,
                use_mmap: self.use_mmap,
                use_mlock: self.use_mlock,
                use_vulkan: self.use_vulkan,
                chat_template: self.chat_template.clone(),
                store_chats: self.store_chats,
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffusionModelSpec {
    pub model: ModelLocation,
    #[serde(default)]
    pub vae: Option<ModelLocation>,
    #[serde(default)]
    pub text_encoder: Option<ModelLocation>,
    #[serde(default)]
    pub taesd: Option<ModelLocation>,
    #[serde(default)]
    pub flow_shift: Option<f32>,
    #[serde(default)]
    pub lora_dir: Option<PathBuf>,
    #[serde(default)]
    pub lora_apply_mode: LoraApplyMode,
    /// Frame cap applied to video requests against this model.
    #[serde(default)]
    pub video_variant: VideoModelVariant,
    #[serde(default)]
    pub offload_to_cpu: bool,
    #[serde(default)]
    pub keep_clip_on_cpu: bool,
    #[serde(default)]
    pub keep_vae_on_cpu: bool,
}

impl DiffusionModelSpec {
    pub fn new(model: ModelLocation) -> Self {
        Self {
            model,
            vae: None,
            text_encoder: None,
            taesd: None,
            flow_shift: None,
            lora_dir: None,
            lora_apply_mode: LoraApplyMode::Auto,
            video_variant: VideoModelVariant::default(),
            offload_to_cpu: false,
            keep_clip_on_cpu: false,
            keep_vae_on_cpu: false,
        }
    }

    pub async fn resolve(
        &self,
        assets: &dyn AssetResolver,
        n_threads: u32,
    ) -> Result<Resolved<DiffusionLoadParams>, AssetError> {
        let model_path = self.model.resolve(assets).await?;
        let vae_path = resolve_opt(&self.vae, assets).await?;
        let text_encoder_path = resolve_opt(&self.text_encoder, assets).await?;
        let taesd_path = resolve_opt(&self.taesd, assets).await?;

        let mut key = CacheKey::for_model(&model_path).with_variant(format!(
            "cpu_offload={};clip_cpu={};vae_cpu={}",
            self.offload_to_cpu, self.keep_clip_on_cpu, self.keep_vae_on_cpu
        ));
        key.vae_path = vae_path.clone();
        key.text_encoder_path = text_encoder_path.clone();
        key.taesd_path = taesd_path.clone();
        key.flow_shift = self.flow_shift;
        key.lora_dir = self.lora_dir.clone();
        key.lora_apply_mode = self.lora_apply_mode;

        let files = std::iter::once(model_path.clone())
            .chain(vae_path.iter().cloned())
            .chain(text_encoder_path.iter().cloned())
            .chain(taesd_path.iter().cloned())
            .collect();

        Ok(Resolved {
            spec: LoadedModelSpec::new(ModelFamily::Diffusion, &self.model, &key),
            files,
            params: DiffusionLoadParams {
                model_path,
                vae_path,
                text_encoder_path,
                taesd_path,
                flow_shift: self.flow_shift,
                lora_dir: self.lora_dir.clone(),
                lora_apply_mode: self.lora_apply_mode,
                n_threads,
                offload_to_cpu: self.offload_to_cpu,
                keep_clip_on_cpu: self.keep_clip_on_cpu,
                keep_vae_on_cpu: self.keep_vae_on_cpu,
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechSynthesisModelSpec {
    pub model: ModelLocation,
    #[serde(default)]
    pub seed: u32,
    #[serde(default = "default_synthesis_temperature")]
    pub temperature: f32,
    #[serde(default = "default_fine_temperature")]
    pub fine_temperature: f32,
}

fn default_synthesis_temperature() -> f32 {
    0.7
}

fn default_fine_temperature() -> f32 {
    0.5
}

impl SpeechSynthesisModelSpec {
    pub fn new(model: ModelLocation) -> Self {
        Self {
            model,
            seed: 0,
            temperature: default_synthesis_temperature(),
            fine_temperature: default_fine_temperature(),
        }
    }

    pub async fn resolve(
        &self,
        assets: &dyn AssetResolver,
    ) -> Result<Resolved<SpeechSynthesisLoadParams>, AssetError> {
        let model_path = self.model.resolve(assets).await?;
        let key = CacheKey::for_model(&model_path).with_variant(format!(
            "seed={};temp={};fine_temp={}",
            self.seed, self.temperature, self.fine_temperature
        ));
        Ok(Resolved {
            spec: LoadedModelSpec::new(ModelFamily::SpeechSynthesis, &self.model, &key),
            files: vec![model_path.clone()],
            params: SpeechSynthesisLoadParams {
                model_path,
                seed: self.seed,
                temperature: self.temperature,
                fine_temperature: self.fine_temperature,
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechRecognitionModelSpec {
    pub model: ModelLocation,
    #[serde(default)]
    pub use_gpu: bool,
    #[serde(default)]
    pub flash_attn: bool,
    #[serde(default)]
    pub gpu_device: u32,
}

impl SpeechRecognitionModelSpec {
    pub fn new(model: ModelLocation) -> Self {
        Self { model, use_gpu: false, flash_attn: false, gpu_device: 0 }
    }

    pub async fn resolve(
        &self,
        assets: &dyn AssetResolver,
    ) -> Result<Resolved<SpeechRecognitionLoadParams>, AssetError> {
        let model_path = self.model.resolve(assets).await?;
        let key = CacheKey::for_model(&model_path).with_variant(format!(
            "gpu={};flash_attn={};device={}",
            self.use_gpu, self.flash_attn, self.gpu_device
        ));
        Ok(Resolved {
            spec: LoadedModelSpec::new(ModelFamily::SpeechRecognition, &self.model, &key),
            files: vec![model_path.clone()],
            params: SpeechRecognitionLoadParams {
                model_path,
                use_gpu: self.use_gpu,
                flash_attn: self.flash_attn,
                gpu_device: self.gpu_device,
            },
        })
    }
}
