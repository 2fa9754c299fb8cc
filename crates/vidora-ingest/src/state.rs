//! Application state shared by the task handlers and the lifecycle service.

use std::sync::Arc;

use vidora_core::Config;
use vidora_db::AssetStore;
use vidora_processing::{
    MetadataExtractionWorker, Promoter, ThumbnailDerivationWorker, ToolInvoker,
    UploadPromotionWorker,
};
use vidora_storage::Storage;
use vidora_worker::JobScheduler;

use crate::services::asset_lifecycle::{AssetLifecycleService, PipelineFolders};

pub struct AppState {
    pub config: Config,
    pub assets: Arc<dyn AssetStore>,
    pub storage: Arc<dyn Storage>,
    pub scheduler: Arc<dyn JobScheduler>,
    pub promotion_worker: UploadPromotionWorker,
    pub thumbnail_worker: ThumbnailDerivationWorker,
    pub metadata_worker: MetadataExtractionWorker,
    pub lifecycle: AssetLifecycleService,
}

impl AppState {
    /// Wire the workers and the lifecycle service around the given collaborators.
    pub fn new(
        config: Config,
        assets: Arc<dyn AssetStore>,
        storage: Arc<dyn Storage>,
        tools: Arc<dyn ToolInvoker>,
        scheduler: Arc<dyn JobScheduler>,
    ) -> Self {
        let auto_activate_videos = config.auto_activate_videos();
        let promoter = Promoter::new(storage.clone());

        let promotion_worker =
            UploadPromotionWorker::new(assets.clone(), promoter.clone(), auto_activate_videos);
        let thumbnail_worker = ThumbnailDerivationWorker::new(
            assets.clone(),
            promoter,
            tools.clone(),
            config.temp_folder(),
            config.thumbnail_quality(),
            auto_activate_videos,
        );
        let metadata_worker = MetadataExtractionWorker::new(
            assets.clone(),
            storage.clone(),
            tools,
            auto_activate_videos,
        );
        let lifecycle = AssetLifecycleService::new(
            assets.clone(),
            storage.clone(),
            scheduler.clone(),
            PipelineFolders::from_config(&config),
            config.thumbnail_offset_seconds(),
        );

        Self {
            config,
            assets,
            storage,
            scheduler,
            promotion_worker,
            thumbnail_worker,
            metadata_worker,
            lifecycle,
        }
    }
}
