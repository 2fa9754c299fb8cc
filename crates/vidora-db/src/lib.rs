//! Vidora Database Layer
//!
//! Repositories for the `assets` and `tasks` tables, plus the [`AssetStore`] seam the
//! pipeline workers program against.

// Module declarations
pub mod asset_store;
pub mod db;
#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;

// Re-exports: repositories
pub use db::{AssetRepository, TaskRepository};

// Re-exports: worker-facing trait
pub use asset_store::AssetStore;

#[cfg(any(test, feature = "test-helpers"))]
pub use mock::MockAssetStore;
