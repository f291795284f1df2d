use anyhow::Context;
use dotenv::dotenv;
use futures::future::join_all;
use std::future::IntoFuture;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use tnf_recovery::{
    config::ConfigManager, core::logging, infrastructure::ClusterFixture,
    presentation::routes::api_router, AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let mut config_manager = ConfigManager::new();
    config_manager
        .load()
        .await
        .context("Failed to load configuration")?;
    let config = config_manager.get().await;

    logging::init_logging_with_config(&config.observability.logging)
        .context("Failed to initialize logging")?;

    let fixture_path = std::env::var("TNF_CLUSTER_FIXTURE")
        .context("TNF_CLUSTER_FIXTURE must point at a cluster fixture YAML")?;
    let fixture = ClusterFixture::load(&fixture_path)?;

    let state = AppState::new(config.clone(), fixture.into_collaborators().into());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    state.monitor.refresh_once().await;
    let mut tasks = state.monitor.spawn_polling(shutdown_rx.clone());
    tasks.push(tokio::spawn(state.reconciler.clone().run(
        state.monitor.subscribe(),
        Duration::from_secs(config.polling.reconcile_interval_secs),
        shutdown_rx.clone(),
    )));

    let app = api_router().with_state(state.clone());
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(
        local_node = %config.cluster.local_node,
        cluster = %config.cluster.cluster_name,
        "🚀 TNF recovery controller listening on {}",
        addr
    );
    info!("📊 Health check: http://{}/api/healthchecker", addr);

    let mut server_shutdown = shutdown_rx.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let _ = server_shutdown.wait_for(|stop| *stop).await;
    });

    tokio::select! {
        result = server.into_future() => result.context("HTTP server failed")?,
        _ = tokio::signal::ctrl_c() => info!("🛑 Shutdown signal received"),
    }

    let _ = shutdown_tx.send(true);
    for result in join_all(tasks).await {
        if let Err(e) = result {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
    info!("👋 Shutdown complete");
    Ok(())
}
