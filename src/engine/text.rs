//! Text generation engine contract (llama.cpp-style runtimes).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{EngineError, NativeModel, TokenSink};

/// Parameters used to construct a native text model.
#[derive(Debug, Clone)]
pub struct TextLoadParams {
    pub model_path: PathBuf,
    pub context_size: u32,
    pub n_threads: u32,
    pub use_mmap: bool,
    pub use_mlock: bool,
    pub use_vulkan: bool,
    pub chat_template: Option<String>,
    /// Keep the conversation inside the native context across requests.
    pub store_chats: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

/// Per-request sampling parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextParams {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub min_p: f32,
    pub disable_thinking: bool,
    pub reasoning_budget: Option<i32>,
    /// Earlier turns applied through the chat template before `prompt`.
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    /// Receives each sampled piece as it is produced.
    #[serde(skip)]
    pub on_token: Option<TokenSink>,
}

impl Default for TextParams {
    fn default() -> Self {
        Self {
            prompt: String::new(),
            system_prompt: None,
            max_tokens: 256,
            temperature: 0.7,
            min_p: 0.05,
            disable_thinking: false,
            reasoning_budget: None,
            history: Vec::new(),
            on_token: None,
        }
    }
}

/// Completed text generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextOutput {
    pub text: String,
    pub tokens_generated: u64,
    pub generation_time: Duration,
}

impl TextOutput {
    pub fn tokens_per_second(&self) -> f64 {
        let secs = self.generation_time.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.tokens_generated as f64 / secs
        }
    }
}

/// A loaded text model.
pub trait TextModel: NativeModel {
    /// Run one completion. Pieces go to `params.on_token` as they are
    /// sampled; with `store_chats` the turn is appended to the native history.
    fn generate(&mut self, params: &TextParams) -> Result<TextOutput, EngineError>;
}

/// Constructs text models.
pub trait TextEngine: Send + Sync {
    fn load(&self, params: &TextLoadParams) -> Result<Box<dyn TextModel>, EngineError>;
}
