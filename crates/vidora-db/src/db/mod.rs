//! Database repositories
//!
//! `asset` holds the media asset records; `task` is the durable job queue table.
pub mod asset;
pub mod task;

pub use asset::AssetRepository;
pub use task::TaskRepository;
