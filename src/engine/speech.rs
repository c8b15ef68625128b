//! Speech engine contracts: synthesis (bark-style) and recognition
//! (whisper-style).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{EngineError, NativeModel, ProgressSink, SegmentSink};

/// Sample rate expected by speech recognition models.
pub const RECOGNITION_SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, Clone)]
pub struct SpeechSynthesisLoadParams {
    pub model_path: PathBuf,
    pub seed: u32,
    pub temperature: f32,
    pub fine_temperature: f32,
}

#[derive(Debug, Clone, Default)]
pub struct SpeechParams {
    pub text: String,
    pub n_threads: u32,
    /// Called as the semantic, coarse and fine passes advance.
    pub on_progress: Option<ProgressSink>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioOutput {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioOutput {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

pub trait SpeechSynthesisModel: NativeModel {
    fn synthesize(&mut self, params: &SpeechParams) -> Result<AudioOutput, EngineError>;
}

pub trait SpeechSynthesisEngine: Send + Sync {
    fn load(
        &self,
        params: &SpeechSynthesisLoadParams,
    ) -> Result<Box<dyn SpeechSynthesisModel>, EngineError>;
}

#[derive(Debug, Clone)]
pub struct SpeechRecognitionLoadParams {
    pub model_path: PathBuf,
    pub use_gpu: bool,
    pub flash_attn: bool,
    pub gpu_device: u32,
}

/// Transcription request. Samples are mono f32 at [`RECOGNITION_SAMPLE_RATE`].
#[derive(Debug, Clone)]
pub struct TranscriptionParams {
    pub samples: Vec<f32>,
    pub n_threads: u32,
    pub language: Option<String>,
    pub translate: bool,
    pub detect_language: bool,
    pub token_timestamps: bool,
    pub max_segment_len: u32,
    pub split_on_word: bool,
    pub temperature: f32,
    pub beam_size: u32,
    pub suppress_blank: bool,
    /// Percent complete, reported as `step` out of 100.
    pub on_progress: Option<ProgressSink>,
    /// Receives each segment as soon as it is decoded.
    pub on_segment: Option<SegmentSink>,
}

impl Default for TranscriptionParams {
    fn default() -> Self {
        Self {
            samples: Vec::new(),
            n_threads: 0,
            language: None,
            translate: false,
            detect_language: false,
            token_timestamps: false,
            max_segment_len: 0,
            split_on_word: false,
            temperature: 0.0,
            beam_size: 1,
            suppress_blank: true,
            on_progress: None,
            on_segment: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub segments: Vec<TranscriptSegment>,
    pub language: Option<String>,
}

impl Transcription {
    pub fn text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub trait SpeechRecognitionModel: NativeModel {
    fn transcribe(&mut self, params: &TranscriptionParams) -> Result<Transcription, EngineError>;
}

pub trait SpeechRecognitionEngine: Send + Sync {
    fn load(
        &self,
        params: &SpeechRecognitionLoadParams,
    ) -> Result<Box<dyn SpeechRecognitionModel>, EngineError>;
}
