//! Application setup and initialization

pub mod database;
pub mod services;

use crate::state::AppState;
use anyhow::{Context, Result};
use std::sync::Arc;
use vidora_core::Config;
use vidora_worker::TaskQueue;

/// Validate configuration, install telemetry, connect the database and start the queue.
pub async fn initialize_app(config: Config) -> Result<(Arc<AppState>, TaskQueue)> {
    config
        .validate()
        .context("Configuration validation failed")?;

    vidora_infra::init_telemetry(config.log_format(), config.environment())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    tracing::info!(environment = %config.environment(), "Configuration loaded and validated");

    let pool = database::setup_database(&config).await?;
    services::initialize_services(&config, pool).await
}
