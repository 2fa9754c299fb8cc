//! Vidora Storage Library
//!
//! Storage abstraction for the ingestion pipeline plus the local filesystem backend.
//!
//! # Storage key format
//!
//! Keys are relative to the storage root: `{folder}/{filename}`. The temp folder and
//! every permanent folder live under the same root. Keys must not contain `..` or a
//! leading `/`.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use traits::{Storage, StorageError, StorageResult};
pub use vidora_core::StorageBackend;
