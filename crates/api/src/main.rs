use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use sweep_infra::config::{ConfigSource, EnvConfig, OrchestratorConfig};
use sweep_infra::durable::EventWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sweep_observability::init();

    let source: Arc<dyn ConfigSource> = Arc::new(EnvConfig);
    let config = OrchestratorConfig::from_source(source.as_ref()).context("invalid configuration")?;
    if config.cron_secret.is_none() {
        warn!("CRON_SECRET is not set; every scheduler request will be rejected");
    }

    let services = sweep_api::app::services::build_services(&config, source).await?;

    let worker = EventWorker::spawn(
        "durable-functions",
        services.bus.as_ref(),
        services.executor.clone(),
        tokio::runtime::Handle::current(),
    )
    .context("failed to spawn event worker")?;

    let app = sweep_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, release = %config.release_tag, "sweep-api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    info!("shutting down event worker");
    tokio::task::spawn_blocking(move || worker.shutdown()).await?;
    Ok(())
}
