//! Vidora Ingest Library
//!
//! The ingestion service: application state, the task handlers the worker pool
//! dispatches to, the asset lifecycle service that plans and enqueues pipeline jobs,
//! and process setup.

// Module declarations
pub mod services;
pub mod setup;
pub mod state;
mod task_dispatch;
pub mod task_handlers;

// Re-exports
pub use services::asset_lifecycle::{
    plan_jobs, AssetLifecycleService, EnqueuedPipeline, JobPlan, PipelineFolders, StagedUploads,
};
pub use state::AppState;
pub use task_handlers::TaskHandler;
pub use vidora_worker::{TaskQueue, TaskQueueConfig};
