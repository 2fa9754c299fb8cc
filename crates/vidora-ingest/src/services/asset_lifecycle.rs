//! Asset lifecycle: creation, primary-file replacement, thumbnail regeneration and
//! deletion. Every pipeline job is enqueued from here, never from the model.

use anyhow::{Context, Result};
use rand::Rng;
use std::sync::Arc;
use uuid::Uuid;

use vidora_core::models::{
    AssetFieldUpdate, AssetId, AssetKind, DeriveThumbnailPayload, ExtractMetadataPayload,
    MediaAsset, NewAsset, Priority, PromoteUploadPayload, PromotionTarget,
};
use vidora_core::{AppError, Config};
use vidora_db::AssetStore;
use vidora_storage::keys::is_valid_key;
use vidora_storage::Storage;
use vidora_worker::{JobRequest, JobScheduler};

/// Permanent folders, one per promotion target.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineFolders {
    pub video: String,
    pub thumbnail: String,
    pub slider: String,
}

impl PipelineFolders {
    pub fn from_config(config: &Config) -> Self {
        Self {
            video: config.video_folder().to_string(),
            thumbnail: config.thumbnail_folder().to_string(),
            slider: config.slider_folder().to_string(),
        }
    }

    pub fn for_target(&self, target: PromotionTarget) -> &str {
        match target {
            PromotionTarget::PrimaryVideo => &self.video,
            PromotionTarget::Thumbnail => &self.thumbnail,
            PromotionTarget::SliderImage => &self.slider,
        }
    }
}

/// Files the upload layer has already written to the temp folder.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedUploads {
    pub primary: String,
    /// A thumbnail supplied by the caller; promoted instead of derived.
    pub thumbnail: Option<String>,
}

impl StagedUploads {
    pub fn primary(path: impl Into<String>) -> Self {
        Self {
            primary: path.into(),
            thumbnail: None,
        }
    }

    pub fn with_thumbnail(mut self, path: impl Into<String>) -> Self {
        self.thumbnail = Some(path.into());
        self
    }

    fn validate(&self, kind: AssetKind) -> Result<(), AppError> {
        if !is_valid_key(&self.primary) {
            return Err(AppError::InvalidInput(format!(
                "Invalid staged path: {:?}",
                self.primary
            )));
        }
        match &self.thumbnail {
            Some(_) if kind == AssetKind::Slider => Err(AppError::InvalidInput(
                "Slider assets do not take a separate thumbnail".to_string(),
            )),
            Some(path) if !is_valid_key(path) => Err(AppError::InvalidInput(format!(
                "Invalid staged thumbnail path: {:?}",
                path
            ))),
            _ => Ok(()),
        }
    }
}

/// Jobs for one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct JobPlan {
    /// Primary-content promotion.
    pub primary: JobRequest,
    /// Jobs that read the promoted primary file; enqueued behind `primary`.
    pub after_primary: Vec<JobRequest>,
    /// Jobs with no prerequisite.
    pub independent: Vec<JobRequest>,
}

/// Decide which workers an asset needs.
///
/// A supplied thumbnail is promoted; otherwise one is derived from the video once its
/// promotion completes. Videos are probed for metadata; slider images only need their
/// own promotion.
pub fn plan_jobs(
    asset: &MediaAsset,
    uploads: &StagedUploads,
    folders: &PipelineFolders,
    thumbnail_offset_seconds: f64,
) -> Result<JobPlan> {
    let target = asset.kind.primary_target();
    let primary = JobRequest::new(&PromoteUploadPayload {
        asset_id: asset.id,
        staged_path: uploads.primary.clone(),
        target_folder: folders.for_target(target).to_string(),
        target,
    })?
    .with_priority(Priority::High);

    let mut plan = JobPlan {
        primary,
        after_primary: Vec::new(),
        independent: Vec::new(),
    };

    if asset.kind == AssetKind::Slider {
        return Ok(plan);
    }

    match &uploads.thumbnail {
        Some(staged) => plan.independent.push(JobRequest::new(&PromoteUploadPayload {
            asset_id: asset.id,
            staged_path: staged.clone(),
            target_folder: folders.thumbnail.clone(),
            target: PromotionTarget::Thumbnail,
        })?),
        None => plan.after_primary.push(JobRequest::new(&DeriveThumbnailPayload {
            asset_id: asset.id,
            offset_seconds: thumbnail_offset_seconds,
            target_folder: folders.thumbnail.clone(),
            source_path: None,
        })?),
    }

    if asset.kind.requires_metadata() {
        plan.after_primary.push(JobRequest::new(&ExtractMetadataPayload {
            asset_id: asset.id,
            source_path: None,
        })?);
    }

    Ok(plan)
}

/// Task ids of one enqueued pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueuedPipeline {
    pub asset_id: AssetId,
    pub primary_task: Uuid,
    pub other_tasks: Vec<Uuid>,
}

#[derive(Clone)]
pub struct AssetLifecycleService {
    assets: Arc<dyn AssetStore>,
    storage: Arc<dyn Storage>,
    scheduler: Arc<dyn JobScheduler>,
    folders: PipelineFolders,
    thumbnail_offset_seconds: f64,
}

impl AssetLifecycleService {
    pub fn new(
        assets: Arc<dyn AssetStore>,
        storage: Arc<dyn Storage>,
        scheduler: Arc<dyn JobScheduler>,
        folders: PipelineFolders,
        thumbnail_offset_seconds: f64,
    ) -> Self {
        Self {
            assets,
            storage,
            scheduler,
            folders,
            thumbnail_offset_seconds,
        }
    }

    async fn load(&self, asset_id: AssetId) -> Result<MediaAsset> {
        self.assets
            .get(asset_id)
            .await
            .context("Failed to load asset")?
            .ok_or_else(|| AppError::AssetNotFound(asset_id).into())
    }

    async fn enqueue_plan(&self, asset: &MediaAsset, uploads: &StagedUploads) -> Result<EnqueuedPipeline> {
        let plan = plan_jobs(asset, uploads, &self.folders, self.thumbnail_offset_seconds)?;

        let primary_task = self
            .scheduler
            .enqueue(plan.primary)
            .await
            .context("Failed to enqueue primary promotion")?;

        let mut other_tasks = Vec::with_capacity(plan.after_primary.len() + plan.independent.len());
        for request in plan.after_primary {
            other_tasks.push(self.scheduler.enqueue(request.after(primary_task)).await?);
        }
        for request in plan.independent {
            other_tasks.push(self.scheduler.enqueue(request).await?);
        }

        tracing::info!(
            asset_id = asset.id,
            kind = %asset.kind,
            primary_task = %primary_task,
            jobs = other_tasks.len() + 1,
            "Pipeline enqueued"
        );

        Ok(EnqueuedPipeline {
            asset_id: asset.id,
            primary_task,
            other_tasks,
        })
    }

    /// Create a draft record for staged uploads and start the pipeline.
    #[tracing::instrument(skip(self, new_asset, uploads), fields(kind = %new_asset.kind, asset_id = tracing::field::Empty))]
    pub async fn create_asset(
        &self,
        new_asset: NewAsset,
        uploads: StagedUploads,
    ) -> Result<(MediaAsset, EnqueuedPipeline)> {
        uploads.validate(new_asset.kind)?;

        let draft = self
            .assets
            .create_draft(new_asset)
            .await
            .context("Failed to create asset record")?;
        tracing::Span::current().record("asset_id", draft.id);

        let asset = self
            .assets
            .update_fields(draft.id, &AssetFieldUpdate::promoting())
            .await
            .context("Failed to mark asset as promoting")?;

        let pipeline = self.enqueue_plan(&asset, &uploads).await?;
        Ok((asset, pipeline))
    }

    /// Swap in a new primary file: take the asset offline, clear every pipeline-owned
    /// field, purge the old permanent files and run the pipeline again.
    ///
    /// The row is reset before any file is touched, so it never points at a deleted
    /// file. Purging is best-effort.
    #[tracing::instrument(skip(self, uploads))]
    pub async fn replace_primary(
        &self,
        asset_id: AssetId,
        uploads: StagedUploads,
    ) -> Result<(MediaAsset, EnqueuedPipeline)> {
        let asset = self.load(asset_id).await?;
        uploads.validate(asset.kind)?;

        let cancelled = self
            .scheduler
            .cancel_for_asset(asset_id)
            .await
            .context("Failed to cancel pending jobs")?;

        let reset = self
            .assets
            .update_fields(asset_id, &AssetFieldUpdate::reset_for_replacement())
            .await
            .context("Failed to reset asset for replacement")?;

        self.purge_files(&asset).await;

        tracing::info!(
            asset_id = asset_id,
            cancelled_jobs = cancelled,
            old_primary = %asset.primary_content_path,
            old_thumbnail = %asset.thumbnail_path,
            "Primary content replaced"
        );

        let pipeline = self.enqueue_plan(&reset, &uploads).await?;
        Ok((reset, pipeline))
    }

    /// Derive a new thumbnail from a random point of the video.
    #[tracing::instrument(skip(self))]
    pub async fn regenerate_thumbnail(&self, asset_id: AssetId) -> Result<Uuid> {
        let asset = self.load(asset_id).await?;
        if asset.kind != AssetKind::Video || !asset.has_primary_content() {
            return Err(AppError::InvalidInput(format!(
                "Asset {} has no promoted video to take a thumbnail from",
                asset_id
            ))
            .into());
        }

        let offset_seconds = if asset.duration_seconds > 0 {
            rand::rng().random_range(0.0..f64::from(asset.duration_seconds))
        } else {
            self.thumbnail_offset_seconds
        };

        let task_id = self
            .scheduler
            .enqueue(JobRequest::new(&DeriveThumbnailPayload {
                asset_id,
                offset_seconds,
                target_folder: self.folders.thumbnail.clone(),
                source_path: None,
            })?)
            .await
            .context("Failed to enqueue thumbnail regeneration")?;

        tracing::info!(asset_id = asset_id, offset_seconds = offset_seconds, task_id = %task_id, "Thumbnail regeneration enqueued");
        Ok(task_id)
    }

    /// Remove an asset's files and its row. Returns false when the asset did not exist.
    /// File deletion is best-effort.
    #[tracing::instrument(skip(self))]
    pub async fn delete_asset(&self, asset_id: AssetId) -> Result<bool> {
        self.scheduler
            .cancel_for_asset(asset_id)
            .await
            .context("Failed to cancel pending jobs")?;

        let Some(asset) = self.assets.get(asset_id).await? else {
            return Ok(false);
        };

        self.purge_files(&asset).await;

        let deleted = self.assets.delete(asset_id).await?;
        tracing::info!(asset_id = asset_id, "Asset deleted");
        Ok(deleted)
    }

    async fn purge_files(&self, asset: &MediaAsset) {
        for path in [&asset.primary_content_path, &asset.thumbnail_path] {
            if path.is_empty() {
                continue;
            }
            if let Err(e) = self.storage.delete(path).await {
                tracing::error!(
                    error = %e,
                    asset_id = asset.id,
                    storage_key = %path,
                    "Failed to delete asset file from storage"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidora_core::models::TaskType;

    fn folders() -> PipelineFolders {
        PipelineFolders {
            video: "videos".to_string(),
            thumbnail: "thumbnails".to_string(),
            slider: "sliders".to_string(),
        }
    }

    fn asset(kind: AssetKind) -> MediaAsset {
        MediaAsset::draft(
            9,
            NewAsset {
                kind,
                title: "Asset".to_string(),
                description: None,
            },
        )
    }

    fn types(requests: &[JobRequest]) -> Vec<TaskType> {
        requests.iter().map(|r| r.task_type).collect()
    }

    #[test]
    fn video_without_thumbnail_derives_one_after_promotion() {
        let plan = plan_jobs(
            &asset(AssetKind::Video),
            &StagedUploads::primary("tmp/up.mp4"),
            &folders(),
            2.0,
        )
        .unwrap();

        assert_eq!(plan.primary.task_type, TaskType::PromoteVideo);
        assert_eq!(plan.primary.priority, Priority::High);
        assert_eq!(plan.primary.payload["target_folder"], "videos");
        assert_eq!(
            types(&plan.after_primary),
            vec![TaskType::DeriveThumbnail, TaskType::ExtractMetadata]
        );
        assert_eq!(plan.after_primary[0].payload["offset_seconds"], 2.0);
        assert!(plan.independent.is_empty());
    }

    #[test]
    fn supplied_thumbnail_is_promoted_not_derived() {
        let plan = plan_jobs(
            &asset(AssetKind::Video),
            &StagedUploads::primary("tmp/up.mp4").with_thumbnail("tmp/up.jpg"),
            &folders(),
            2.0,
        )
        .unwrap();

        assert_eq!(types(&plan.independent), vec![TaskType::PromoteThumbnail]);
        assert_eq!(plan.independent[0].payload["target_folder"], "thumbnails");
        assert_eq!(types(&plan.after_primary), vec![TaskType::ExtractMetadata]);
    }

    #[test]
    fn slider_only_promotes() {
        let plan = plan_jobs(
            &asset(AssetKind::Slider),
            &StagedUploads::primary("tmp/banner.png"),
            &folders(),
            2.0,
        )
        .unwrap();

        assert_eq!(plan.primary.task_type, TaskType::PromoteSliderImage);
        assert_eq!(plan.primary.payload["target_folder"], "sliders");
        assert!(plan.after_primary.is_empty());
        assert!(plan.independent.is_empty());
    }

    #[test]
    fn staged_paths_are_validated() {
        assert!(StagedUploads::primary("tmp/a.mp4")
            .validate(AssetKind::Video)
            .is_ok());
        assert!(StagedUploads::primary("../etc/passwd")
            .validate(AssetKind::Video)
            .is_err());
        assert!(StagedUploads::primary("")
            .validate(AssetKind::Video)
            .is_err());
        assert!(StagedUploads::primary("tmp/a.png")
            .with_thumbnail("tmp/b.jpg")
            .validate(AssetKind::Slider)
            .is_err());
    }
}
