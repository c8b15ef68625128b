//! Model descriptions for EdgeGen CORE.
//!
//! Handles model locations and asset resolution, cache key construction,
//! per-family model specs, and request validation.

mod assets;
mod cache_key;
mod spec;
pub mod validation;

pub use assets::{AssetError, AssetResolver, LocalAssetResolver, ModelLocation};
pub use cache_key::{CacheKey, LoraApplyMode};
pub use spec::{
    DiffusionModelSpec, LoadedModelSpec, Resolved, SpeechRecognitionModelSpec,
    SpeechSynthesisModelSpec, TextModelSpec,
};
pub use validation::{ValidationError, VideoModelVariant};
