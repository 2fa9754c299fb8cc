//! Vidora Core Library
//!
//! This crate provides the domain models, error types and configuration shared by
//! every component of the media ingestion pipeline.

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod storage_types;
pub mod task_error;

// Re-export commonly used types
pub use config::{Config, IngestConfig, LogFormat};
pub use error::AppError;
pub use storage_types::StorageBackend;
pub use task_error::TaskError;
