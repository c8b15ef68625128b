//! EdgeGen CORE
//!
//! On-device generative model orchestration. The inference runtimes (LLM,
//! diffusion, speech synthesis, speech recognition) are external; this crate
//! decides which models are resident, when they load and close, and in what
//! order the memory-heavy ones may run.
//!
//! # Design Principles
//!
//! - **One writer per family**: requests of the same model family are
//!   serialized; different families interleave unless they compete for RAM
//! - **Bounded residency**: every family has a size-aware LRU cache, and
//!   loading a heavy family first unloads its competitors
//! - **Owned handles**: a native model is closed exactly once, by whoever
//!   owns it when it leaves the cache or a pipeline stage
//! - **Sequential loading**: video generation can run encoder and generator
//!   one after the other to cap peak memory
//!
//! # Layout
//!
//! - [`engine`]: native engine contracts, owned handles, cancellation
//! - [`memory`]: model cache, memory oracle, thresholds
//! - [`models`]: model specs, cache keys, asset resolution, validation
//! - [`pipeline`]: the sequential encoder → generator pipeline
//! - [`orchestrator`]: the entry point callers use

pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod telemetry;

pub use config::{ConfigError, EffectiveConfig, OrchestratorConfig, SequentialLoadMode};
pub use engine::ModelFamily;
pub use error::{OrchestratorError, Result};
pub use lifecycle::{DrainOutcome, LifecycleState};
pub use orchestrator::{ModelOrchestrator, OrchestratorDeps, SlotState};
