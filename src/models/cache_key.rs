//! Composite identity of a loaded model.
//!
//! Two requests share a cache entry only when every field that changes which
//! logical model gets loaded is equal. The rendered key is a `|`-joined list
//! of `name=value` pairs with unset fields rendered as `-`.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// When LoRA weights are merged into the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoraApplyMode {
    #[default]
    Auto,
    Immediately,
    AtRuntime,
}

impl LoraApplyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Immediately => "immediately",
            Self::AtRuntime => "at_runtime",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheKey {
    pub model_path: PathBuf,
    pub vae_path: Option<PathBuf>,
    pub text_encoder_path: Option<PathBuf>,
    pub taesd_path: Option<PathBuf>,
    pub flow_shift: Option<f32>,
    pub lora_dir: Option<PathBuf>,
    pub lora_apply_mode: LoraApplyMode,
    /// Family-specific load options that also change the loaded model.
    pub variant: Option<String>,
}

impl CacheKey {
    pub fn for_model(model_path: impl AsRef<Path>) -> Self {
        Self {
            model_path: absolutize(model_path.as_ref()),
            ..Default::default()
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    pub fn render(&self) -> String {
        let lora = match &self.lora_dir {
            Some(dir) => format!("{}:{}", absolutize(dir).display(), self.lora_apply_mode.as_str()),
            None => "-".to_string(),
        };
        [
            format!("model={}", absolutize(&self.model_path).display()),
            format!("vae={}", opt_path(&self.vae_path)),
            format!("encoder={}", opt_path(&self.text_encoder_path)),
            format!("taesd={}", opt_path(&self.taesd_path)),
            format!(
                "shift={}",
                self.flow_shift.map_or_else(|| "-".to_string(), |s| s.to_string())
            ),
            format!("lora={lora}"),
            format!("variant={}", self.variant.as_deref().unwrap_or("-")),
        ]
        .join("|")
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn opt_path(path: &Option<PathBuf>) -> String {
    path.as_deref()
        .map_or_else(|| "-".to_string(), |p| absolutize(p).display().to_string())
}

/// Anchor relative paths at the working directory without touching the
/// filesystem.
fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}
