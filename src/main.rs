use std::sync::Arc;

use tracing::info;

use courtside::clock::SystemClock;
use courtside::config::Config;
use courtside::engine::Engine;
use courtside::sweeper::{ExpirySweeper, WalCompactor};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    courtside::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Arc::new(Engine::new(config.wal_path(), Arc::new(SystemClock))?);

    let mut sweeper = ExpirySweeper::new(engine.clone(), config.sweep_interval);
    let mut compactor =
        WalCompactor::new(engine.clone(), config.compact_interval, config.compact_threshold);
    sweeper.start();
    compactor.start();

    info!("courtside engine running");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  sweep_interval: {:?}", config.sweep_interval);
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    shutdown_signal().await?;
    info!("shutdown signal received, stopping background tasks");

    sweeper.stop().await;
    compactor.stop().await;
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final compaction skipped: {e}");
    }

    info!("courtside stopped");
    Ok(())
}

/// Resolves on ctrl-c, or SIGTERM on unix.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
