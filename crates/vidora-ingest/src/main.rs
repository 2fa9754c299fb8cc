use vidora_core::Config;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = Config::from_env()?;

    let (_state, queue) = vidora_ingest::setup::initialize_app(config).await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping task queue");
    queue.shutdown().await;
    vidora_infra::shutdown_telemetry().await;

    Ok(())
}
