use std::sync::Arc;

use anyhow::Context;

use retail_api::app::{build_app, services};
use retail_infra::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    retail_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let services = Arc::new(
        services::build_services(&config)
            .await
            .context("failed to wire services")?,
    );

    // Re-drive compensations left pending by a previous run before taking traffic.
    match services.recovery.sweep().await {
        Ok(report) => tracing::info!(?report, "startup compensation sweep finished"),
        Err(err) => tracing::error!(error = %err, "startup compensation sweep failed"),
    }
    let background = services.start_background(config.sweep_interval);

    let app = build_app(services);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server error")?;

    background.shutdown().await;
    Ok(())
}
