//! Request parameter validation.
//!
//! Runs before any lock is taken or native call is made. Messages name the
//! violated limit and the offending value.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::{ImageParams, SpeechParams, TextParams, TranscriptionParams, VideoParams};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

type Result<T> = std::result::Result<T, ValidationError>;

macro_rules! reject {
    ($($arg:tt)*) => {
        return Err(ValidationError(format!($($arg)*)))
    };
}

pub const IMAGE_MIN_DIMENSION: u32 = 64;
pub const IMAGE_MAX_DIMENSION: u32 = 2048;
pub const VIDEO_MIN_DIMENSION: u32 = 64;
pub const VIDEO_MAX_DIMENSION: u32 = 1024;
pub const MAX_STEPS: u32 = 150;
pub const MAX_CFG_SCALE: f32 = 30.0;

/// Video generators with documented frame caps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoModelVariant {
    #[default]
    Wan21T2V1_3B,
    Wan21T2V14B,
}

impl VideoModelVariant {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Wan21T2V1_3B => "Wan 2.1 T2V 1.3B",
            Self::Wan21T2V14B => "Wan 2.1 T2V 14B",
        }
    }

    pub fn max_frames(&self) -> u32 {
        match self {
            Self::Wan21T2V1_3B => 64,
            Self::Wan21T2V14B => 32,
        }
    }
}

fn check_dimension(name: &str, value: u32, min: u32, max: u32) -> Result<()> {
    if value % 8 != 0 {
        reject!("{name} must be a multiple of 8, got {value}");
    }
    if !(min..=max).contains(&value) {
        reject!("{name} must be between {min} and {max}, got {value}");
    }
    Ok(())
}

fn check_sampling(steps: u32, cfg_scale: f32) -> Result<()> {
    if !(1..=MAX_STEPS).contains(&steps) {
        reject!("steps must be between 1 and {MAX_STEPS}, got {steps}");
    }
    if !(cfg_scale > 0.0 && cfg_scale <= MAX_CFG_SCALE) {
        reject!("cfg_scale must be in (0, {MAX_CFG_SCALE}], got {cfg_scale}");
    }
    Ok(())
}

fn check_prompt(field: &str, prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        reject!("{field} must not be empty");
    }
    Ok(())
}

impl TextParams {
    pub fn validate(&self) -> Result<()> {
        check_prompt("prompt", &self.prompt)?;
        if self.max_tokens == 0 {
            reject!("max_tokens must be greater than 0");
        }
        if !(self.temperature >= 0.0 && self.temperature.is_finite()) {
            reject!("temperature must be >= 0, got {}", self.temperature);
        }
        if !(0.0..=1.0).contains(&self.min_p) {
            reject!("min_p must be between 0 and 1, got {}", self.min_p);
        }
        if let Some(i) = self.history.iter().position(|m| m.content.trim().is_empty()) {
            reject!("history message {i} must not be empty");
        }
        Ok(())
    }
}

impl ImageParams {
    pub fn validate(&self) -> Result<()> {
        check_prompt("prompt", &self.prompt)?;
        check_dimension("width", self.width, IMAGE_MIN_DIMENSION, IMAGE_MAX_DIMENSION)?;
        check_dimension("height", self.height, IMAGE_MIN_DIMENSION, IMAGE_MAX_DIMENSION)?;
        check_sampling(self.steps, self.cfg_scale)
    }
}

impl VideoParams {
    pub fn validate(&self, variant: VideoModelVariant) -> Result<()> {
        check_prompt("prompt", &self.prompt)?;
        check_dimension("width", self.width, VIDEO_MIN_DIMENSION, VIDEO_MAX_DIMENSION)?;
        check_dimension("height", self.height, VIDEO_MIN_DIMENSION, VIDEO_MAX_DIMENSION)?;
        if self.video_frames == 0 {
            reject!("video_frames must be at least 1");
        }
        let cap = variant.max_frames();
        if self.video_frames > cap {
            reject!(
                "{} supports at most {cap} frames, requested {}",
                variant.name(),
                self.video_frames
            );
        }
        check_sampling(self.steps, self.cfg_scale)
    }
}

impl SpeechParams {
    pub fn validate(&self) -> Result<()> {
        check_prompt("text", &self.text)
    }
}

impl TranscriptionParams {
    pub fn validate(&self) -> Result<()> {
        if self.samples.is_empty() {
            reject!("audio samples must not be empty");
        }
        if self.beam_size == 0 {
            reject!("beam_size must be at least 1");
        }
        if !(self.temperature >= 0.0 && self.temperature.is_finite()) {
            reject!("temperature must be >= 0, got {}", self.temperature);
        }
        Ok(())
    }
}
