//! Errors surfaced to orchestrator callers.

use std::path::PathBuf;

use thiserror::Error;

use crate::engine::{EngineError, ModelFamily};
use crate::models::{AssetError, ValidationError};

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("Asset resolution failed: {0}")]
    Asset(#[from] AssetError),

    #[error("Failed to load {family} model from {}: {reason}", .path.display())]
    Load {
        family: ModelFamily,
        path: PathBuf,
        reason: String,
    },

    #[error(
        "Insufficient memory: {required_mb} MB required, {available_mb} MB available; \
         free {} MB and retry",
        shortfall(.required_mb, .available_mb)
    )]
    InsufficientMemory { required_mb: u64, available_mb: u64 },

    #[error("{family} generation failed: {reason}")]
    Generation { family: ModelFamily, reason: String },

    #[error("{family} generation cancelled")]
    Cancelled { family: ModelFamily },

    #[error("Orchestrator is shutting down")]
    ShuttingDown,

    #[error("Worker task failed: {0}")]
    Worker(String),
}

fn shortfall(required_mb: &u64, available_mb: &u64) -> u64 {
    required_mb.saturating_sub(*available_mb)
}

impl OrchestratorError {
    /// Map a failed native run. Only a native abort counts as cancellation.
    pub fn from_run(family: ModelFamily, err: EngineError) -> Self {
        match err {
            EngineError::Aborted => Self::Cancelled { family },
            other => Self::Generation { family, reason: other.to_string() },
        }
    }

    pub fn load(family: ModelFamily, path: impl Into<PathBuf>, err: EngineError) -> Self {
        Self::Load { family, path: path.into(), reason: err.to_string() }
    }

    /// Returns true if the request stopped because it was cancelled.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns true for outcomes the caller caused or can act on, which
    /// should not be reported as faults.
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::Cancelled { .. } | Self::InsufficientMemory { .. }
        )
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Asset(_) => "asset",
            Self::Load { .. } => "load",
            Self::InsufficientMemory { .. } => "insufficient_memory",
            Self::Generation { .. } => "generation",
            Self::Cancelled { .. } => "cancelled",
            Self::ShuttingDown => "shutting_down",
            Self::Worker(_) => "worker",
        }
    }
}
