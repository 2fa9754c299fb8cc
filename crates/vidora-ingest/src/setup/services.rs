//! Wires repositories, storage, tools and the task queue into [`AppState`].

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::{Arc, Weak};

use vidora_core::Config;
use vidora_db::{AssetRepository, AssetStore, TaskRepository};
use vidora_infra::RateLimiter;
use vidora_processing::{FfmpegToolInvoker, ToolInvoker};
use vidora_storage::create_storage;
use vidora_worker::{JobScheduler, TaskHandlerContext, TaskQueue, TaskQueueConfig};

use crate::state::AppState;

/// Build the application state and start the worker pool.
///
/// The queue holds a weak handle to the state it dispatches into, so both are created
/// together; tasks claimed before the state is complete are rescheduled.
pub async fn initialize_services(config: &Config, pool: PgPool) -> Result<(Arc<AppState>, TaskQueue)> {
    let storage = create_storage(config)
        .await
        .context("Failed to initialize storage")?;

    let tools: Arc<dyn ToolInvoker> = Arc::new(
        FfmpegToolInvoker::new(config.ffmpeg_path(), config.ffprobe_path())
            .context("Invalid tool configuration")?,
    );
    tracing::info!(
        ffmpeg = %config.ffmpeg_path(),
        ffprobe = %config.ffprobe_path(),
        "Media tools configured"
    );

    let assets: Arc<dyn AssetStore> = Arc::new(AssetRepository::new(pool.clone()));
    let task_repository = TaskRepository::new(pool.clone());

    let rate_limiter = RateLimiter::new(
        config.task_queue_promotion_rate_limit(),
        config.task_queue_tool_rate_limit(),
    );
    let queue_config = TaskQueueConfig::from_config(config);

    let mut queue_slot = None;
    let state = Arc::new_cyclic(|weak: &Weak<AppState>| {
        let context: Weak<dyn TaskHandlerContext> = weak.clone();
        let queue = TaskQueue::new(
            task_repository,
            rate_limiter,
            queue_config,
            context,
            Some(pool),
        );
        let scheduler: Arc<dyn JobScheduler> = Arc::new(queue.clone());
        queue_slot = Some(queue);
        AppState::new(config.clone(), assets, storage, tools, scheduler)
    });
    let queue = queue_slot.context("Task queue was not created")?;

    tracing::info!(
        max_workers = config.task_queue_max_workers(),
        promotion_rate_limit = config.task_queue_promotion_rate_limit(),
        tool_rate_limit = config.task_queue_tool_rate_limit(),
        auto_activate_videos = config.auto_activate_videos(),
        "Task queue system initialized"
    );

    Ok((state, queue))
}
