//! Vidora Processing Library
//!
//! The ingestion pipeline's workers and the pieces they share:
//! - [`tools`]: the external frame-extraction and probe tools behind [`ToolInvoker`]
//! - [`promoter`]: temp-to-permanent file promotion
//! - [`workers`]: upload promotion, thumbnail derivation and metadata extraction

pub mod error;
pub mod promoter;
#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;
pub mod tools;
pub mod workers;

pub use error::PipelineError;
pub use promoter::Promoter;
pub use tools::{FfmpegToolInvoker, FrameRequest, ToolInvoker};
pub use workers::{
    MetadataExtractionWorker, MetadataOutcome, PromotionOutcome, ThumbnailDerivationWorker,
    ThumbnailOutcome, UploadPromotionWorker,
};
