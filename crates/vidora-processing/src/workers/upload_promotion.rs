//! Upload promotion worker: staged upload → permanent folder → asset path field.

use serde::Serialize;
use std::sync::Arc;
use vidora_core::models::{AssetId, PromoteUploadPayload, TaskFailure};
use vidora_db::AssetStore;
use vidora_storage::keys::folder_key;

use super::{delete_quietly, load_asset};
use crate::error::PipelineError;
use crate::promoter::Promoter;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PromotionOutcome {
    pub asset_id: AssetId,
    pub path: String,
    /// The staged file was already gone but an earlier attempt had recorded this path.
    pub already_promoted: bool,
    pub became_ready: bool,
}

/// One worker serves all three promotion kinds; the payload's target picks the field.
#[derive(Clone)]
pub struct UploadPromotionWorker {
    assets: Arc<dyn AssetStore>,
    promoter: Promoter,
    auto_activate_videos: bool,
}

impl UploadPromotionWorker {
    pub fn new(assets: Arc<dyn AssetStore>, promoter: Promoter, auto_activate_videos: bool) -> Self {
        Self {
            assets,
            promoter,
            auto_activate_videos,
        }
    }

    #[tracing::instrument(skip(self, payload), fields(
        asset_id = payload.asset_id,
        target = %payload.target,
        staged_path = %payload.staged_path
    ))]
    pub async fn run(&self, payload: &PromoteUploadPayload) -> Result<PromotionOutcome, PipelineError> {
        let asset = load_asset(self.assets.as_ref(), payload.asset_id).await?;
        let storage = self.promoter.storage();

        let path = match self
            .promoter
            .promote(payload.asset_id, &payload.staged_path, &payload.target_folder)
            .await
        {
            Ok(path) => path,
            Err(PipelineError::SourceMissing(staged)) => {
                let recorded = payload.target.current_path(&asset);
                if self.is_recorded_promotion(recorded, &payload.target_folder).await {
                    tracing::info!(
                        asset_id = payload.asset_id,
                        path = %recorded,
                        "Staged file already promoted by an earlier attempt"
                    );
                    let became_ready = self.mark_ready(payload.asset_id).await?;
                    return Ok(PromotionOutcome {
                        asset_id: payload.asset_id,
                        path: recorded.to_string(),
                        already_promoted: true,
                        became_ready,
                    });
                }
                return Err(PipelineError::SourceMissing(staged));
            }
            Err(e @ PipelineError::EmptySource(_)) => {
                delete_quietly(storage.as_ref(), &payload.staged_path).await;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let previous = payload.target.current_path(&asset).to_string();
        let update = payload.target.success_update(path.clone());
        if let Err(e) = self.assets.update_fields(payload.asset_id, &update).await {
            let err = PipelineError::from(e);
            self.roll_back(&path, &payload.staged_path, &err).await;
            return Err(err);
        }

        if !previous.is_empty() && previous != path {
            delete_quietly(storage.as_ref(), &previous).await;
        }

        let became_ready = self.mark_ready(payload.asset_id).await?;

        tracing::info!(
            asset_id = payload.asset_id,
            target = %payload.target,
            path = %path,
            became_ready = became_ready,
            "Upload promoted"
        );

        Ok(PromotionOutcome {
            asset_id: payload.asset_id,
            path,
            already_promoted: false,
            became_ready,
        })
    }

    /// Retries are exhausted: purge the staged file and fail the asset when its primary
    /// content was the target. A primary video is also taken out of circulation.
    #[tracing::instrument(skip(self, payload, failure), fields(asset_id = payload.asset_id, target = %payload.target))]
    pub async fn on_terminal_failure(
        &self,
        payload: &PromoteUploadPayload,
        failure: &TaskFailure,
    ) -> Result<(), PipelineError> {
        tracing::warn!(
            asset_id = payload.asset_id,
            target = %payload.target,
            staged_path = %payload.staged_path,
            reason = %failure.message(),
            "Purging staged upload after failed promotion"
        );

        delete_quietly(self.promoter.storage().as_ref(), &payload.staged_path).await;

        let Some(update) = payload.target.terminal_failure_update() else {
            return Ok(());
        };

        match self.assets.update_fields(payload.asset_id, &update).await {
            Ok(_) => Ok(()),
            Err(e) => match PipelineError::from(e) {
                PipelineError::AssetNotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn is_recorded_promotion(&self, recorded: &str, target_folder: &str) -> bool {
        if recorded.is_empty() || !recorded.starts_with(&folder_key(target_folder, "")) {
            return false;
        }
        matches!(self.promoter.storage().content_length(recorded).await, Ok(n) if n > 0)
    }

    /// Undo a move whose path could not be recorded, so the next attempt starts over.
    async fn roll_back(&self, promoted: &str, staged: &str, cause: &PipelineError) {
        let storage = self.promoter.storage();
        if matches!(cause, PipelineError::AssetNotFound(_)) {
            delete_quietly(storage.as_ref(), promoted).await;
            delete_quietly(storage.as_ref(), staged).await;
            return;
        }
        if let Err(e) = storage.rename(promoted, staged).await {
            tracing::error!(
                promoted = %promoted,
                staged = %staged,
                error = %e,
                "Failed to move promoted file back after a failed asset update"
            );
        }
    }

    async fn mark_ready(&self, asset_id: AssetId) -> Result<bool, PipelineError> {
        Ok(self
            .assets
            .mark_ready_if_complete(asset_id, self.auto_activate_videos)
            .await?)
    }
}
