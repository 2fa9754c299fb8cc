//! Pipeline workers
//!
//! Each worker owns a fixed subset of asset fields and writes only those. After its own
//! write a worker asks the store to flip the asset to `ready`; whichever worker lands
//! last wins that conditional update.

pub mod metadata;
pub mod thumbnail;
pub mod upload_promotion;

pub use metadata::{MetadataExtractionWorker, MetadataOutcome};
pub use thumbnail::{ThumbnailDerivationWorker, ThumbnailOutcome};
pub use upload_promotion::{PromotionOutcome, UploadPromotionWorker};

use vidora_core::models::{AssetId, MediaAsset};
use vidora_db::AssetStore;
use vidora_storage::Storage;

use crate::error::PipelineError;

pub(crate) async fn load_asset(
    assets: &dyn AssetStore,
    asset_id: AssetId,
) -> Result<MediaAsset, PipelineError> {
    assets
        .get(asset_id)
        .await?
        .ok_or(PipelineError::AssetNotFound(asset_id))
}

/// The promoted video a derivation or probe job reads.
///
/// An explicit payload path wins; otherwise the asset's primary path is read at run
/// time. An asset whose primary promotion has not landed yet is `SourceMissing`.
pub(crate) fn resolve_source(asset: &MediaAsset, explicit: Option<&str>) -> Result<String, PipelineError> {
    let source = explicit
        .filter(|p| !p.is_empty())
        .unwrap_or(&asset.primary_content_path);
    if source.is_empty() {
        return Err(PipelineError::SourceMissing(format!(
            "asset {} has no promoted primary content",
            asset.id
        )));
    }
    Ok(source.to_string())
}

/// Delete a file without failing the caller; cleanup paths log and move on.
pub(crate) async fn delete_quietly(storage: &dyn Storage, key: &str) {
    if let Err(e) = storage.delete(key).await {
        tracing::warn!(key = %key, error = %e, "Failed to delete file during cleanup");
    }
}
