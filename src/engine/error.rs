//! Errors reported by native engines.
//!
//! Engines translate null handles and native exceptions into these variants;
//! the orchestrator maps them onto the user-facing taxonomy.

use thiserror::Error;

/// Errors that can occur inside a native engine call.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Native load failed: {0}")]
    Load(String),

    #[error("Native run failed: {0}")]
    Run(String),

    #[error("Native call aborted")]
    Aborted,

    #[error("Native handle corrupted: {0}")]
    Corrupted(String),

    #[error("Native close failed: {0}")]
    Close(String),
}

impl EngineError {
    /// Returns true if the native layer honored a cancellation request.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Returns true if the handle that produced this error must not be reused.
    pub fn invalidates_handle(&self) -> bool {
        matches!(self, Self::Corrupted(_))
    }
}
