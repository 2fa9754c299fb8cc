//! Metadata extraction worker
//!
//! Three independent probes (duration, width, height). A probe that fails or reports
//! nothing usable falls back to its default; the job itself only fails when the source
//! video cannot be found or the asset write fails.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use vidora_core::constants::{DEFAULT_DURATION_SECONDS, DEFAULT_HEIGHT, DEFAULT_WIDTH};
use vidora_core::models::{
    AssetFieldUpdate, AssetId, ExtractMetadataPayload, Orientation, Resolution, TaskFailure,
};
use vidora_db::AssetStore;
use vidora_storage::Storage;

use super::{load_asset, resolve_source};
use crate::error::PipelineError;
use crate::promoter::verify_source;
use crate::tools::ToolInvoker;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetadataOutcome {
    pub asset_id: AssetId,
    pub duration_seconds: i32,
    pub resolution: String,
    pub orientation: Orientation,
    /// Probes that fell back to their default value.
    pub defaulted: Vec<&'static str>,
    pub became_ready: bool,
}

/// Whole seconds, rounded, never negative.
pub fn duration_to_seconds(duration: f64) -> i32 {
    if !duration.is_finite() {
        return DEFAULT_DURATION_SECONDS;
    }
    duration.round().clamp(0.0, i32::MAX as f64) as i32
}

#[derive(Clone)]
pub struct MetadataExtractionWorker {
    assets: Arc<dyn AssetStore>,
    storage: Arc<dyn Storage>,
    tools: Arc<dyn ToolInvoker>,
    auto_activate_videos: bool,
}

impl MetadataExtractionWorker {
    pub fn new(
        assets: Arc<dyn AssetStore>,
        storage: Arc<dyn Storage>,
        tools: Arc<dyn ToolInvoker>,
        auto_activate_videos: bool,
    ) -> Self {
        Self {
            assets,
            storage,
            tools,
            auto_activate_videos,
        }
    }

    #[tracing::instrument(skip(self, payload), fields(asset_id = payload.asset_id, source_path = tracing::field::Empty))]
    pub async fn run(&self, payload: &ExtractMetadataPayload) -> Result<MetadataOutcome, PipelineError> {
        let asset = load_asset(self.assets.as_ref(), payload.asset_id).await?;
        let source = resolve_source(&asset, payload.source_path.as_deref())?;
        tracing::Span::current().record("source_path", source.as_str());

        verify_source(self.storage.as_ref(), &source).await?;
        let local = self.storage.local_path(&source)?;

        let mut defaulted = Vec::new();

        let duration = match self.tools.probe_duration(&local).await {
            Ok(d) => duration_to_seconds(d),
            Err(e) => {
                warn_default(payload.asset_id, "duration", &e);
                defaulted.push("duration");
                DEFAULT_DURATION_SECONDS
            }
        };
        let width = self
            .probe_dimension(payload.asset_id, "width", &local, DEFAULT_WIDTH, &mut defaulted)
            .await;
        let height = self
            .probe_dimension(payload.asset_id, "height", &local, DEFAULT_HEIGHT, &mut defaulted)
            .await;

        let resolution = Resolution::new(width, height);
        self.assets
            .update_fields(payload.asset_id, &AssetFieldUpdate::technical(duration, resolution))
            .await?;

        let became_ready = self
            .assets
            .mark_ready_if_complete(payload.asset_id, self.auto_activate_videos)
            .await?;

        tracing::info!(
            asset_id = payload.asset_id,
            duration_seconds = duration,
            resolution = %resolution,
            orientation = %resolution.orientation(),
            defaulted = ?defaulted,
            became_ready = became_ready,
            "Metadata extracted"
        );

        Ok(MetadataOutcome {
            asset_id: payload.asset_id,
            duration_seconds: duration,
            resolution: resolution.to_string(),
            orientation: resolution.orientation(),
            defaulted,
            became_ready,
        })
    }

    async fn probe_dimension(
        &self,
        asset_id: AssetId,
        name: &'static str,
        source: &Path,
        default: u32,
        defaulted: &mut Vec<&'static str>,
    ) -> u32 {
        let probed = if name == "width" {
            self.tools.probe_width(source).await
        } else {
            self.tools.probe_height(source).await
        };
        match probed {
            Ok(value) if value > 0 => value,
            Ok(_) => {
                warn_default(asset_id, name, &PipelineError::tool("ffprobe", "reported zero"));
                defaulted.push(name);
                default
            }
            Err(e) => {
                warn_default(asset_id, name, &e);
                defaulted.push(name);
                default
            }
        }
    }

    pub async fn on_terminal_failure(&self, payload: &ExtractMetadataPayload, failure: &TaskFailure) {
        tracing::warn!(
            asset_id = payload.asset_id,
            reason = %failure.message(),
            "Metadata extraction gave up, technical fields left at their defaults"
        );
    }
}

fn warn_default(asset_id: AssetId, probe: &'static str, error: &PipelineError) {
    tracing::warn!(
        asset_id = asset_id,
        probe = probe,
        error = %error,
        "Probe failed, using default"
    );
}
