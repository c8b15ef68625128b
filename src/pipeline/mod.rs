//! Multi-stage generation pipelines.

mod sequential;

pub use sequential::{
    PipelineAssets, PipelineConfig, PipelineReport, PipelineStage, SequentialPipelineLoader,
};
