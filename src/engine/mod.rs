//! Native engine contracts for EdgeGen CORE.
//!
//! The inference runtimes themselves are external. This module defines the
//! load/run/close/cancel surface the orchestrator drives, one engine trait
//! per model family, and the owned-handle types that make close-exactly-once
//! a property of ownership.

mod cancel;
pub mod diffusion;
pub mod error;
mod model;
mod progress;
pub mod speech;
pub mod text;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use cancel::{ArmedCancel, CancelSlot};
pub use diffusion::{
    ConditionEncoder, DiffusionEngine, DiffusionLoadParams, DiffusionModel, EncoderLoadParams,
    ImageOutput, ImageParams, PrecomputedCondition, VideoOutput, VideoParams,
};
pub use error::EngineError;
pub use model::{CancelHook, ManagedModel, NativeModel, ResidentModel};
pub use progress::{Progress, ProgressSink, SegmentSink, Sink, TokenSink, TokenStream};
pub use speech::{
    AudioOutput, SpeechParams, SpeechRecognitionEngine, SpeechRecognitionLoadParams,
    SpeechRecognitionModel, SpeechSynthesisEngine, SpeechSynthesisLoadParams,
    SpeechSynthesisModel, TranscriptSegment, Transcription, TranscriptionParams,
    RECOGNITION_SAMPLE_RATE,
};
pub use text::{
    ChatMessage, ChatRole, TextEngine, TextLoadParams, TextModel, TextOutput, TextParams,
};

/// Model families. Each has its own cache, lock and cancel slot.
///
/// The derived order is the lock acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Text,
    Diffusion,
    SpeechSynthesis,
    SpeechRecognition,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 4] = [
        ModelFamily::Text,
        ModelFamily::Diffusion,
        ModelFamily::SpeechSynthesis,
        ModelFamily::SpeechRecognition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Diffusion => "diffusion",
            Self::SpeechSynthesis => "speech_synthesis",
            Self::SpeechRecognition => "speech_recognition",
        }
    }

    /// Memory-heavy families evicted before this family loads.
    pub fn competitors(&self) -> &'static [ModelFamily] {
        match self {
            Self::Text => &[ModelFamily::Diffusion],
            Self::Diffusion => &[ModelFamily::Text, ModelFamily::SpeechSynthesis],
            Self::SpeechSynthesis => &[ModelFamily::Diffusion],
            Self::SpeechRecognition => &[],
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
