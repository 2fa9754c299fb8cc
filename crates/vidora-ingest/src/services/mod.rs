//! Service layer.

pub mod asset_lifecycle;
