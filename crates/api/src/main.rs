use std::sync::Arc;

use anyhow::Context;

use workhub_api::app::{self, services};
use workhub_api::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    workhub_observability::init();

    let config = AppConfig::from_env()?;
    let backends = services::Backends::from_config(&config).await?;
    let services = Arc::new(services::AppServices::new(backends, config.delivery()));

    // The job queue is in-memory: re-drive anything left pending by the last run.
    services.delivery.resume_pending().await?;
    let workers = services.start_workers(config.job_poll_interval, config.retry_sweep_interval);

    let app = app::build_app(services);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    workers.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
