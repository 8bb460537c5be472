use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use georefrs::cleanup::CleanupQueue;
use georefrs::config::Config;
use georefrs::server::{router, AppState};
use georefrs::service::{GeorefService, ServiceOptions};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::parse();
    let storage = Arc::new(config.build_storage().context("opening blob storage")?);
    info!(storage = storage.kind(), mode = ?config.mode, "Starting georefrs");

    let shutdown = CancellationToken::new();
    let (cleanup, cleanup_worker) = CleanupQueue::start(Arc::clone(&storage), shutdown.clone());
    let service = Arc::new(GeorefService::new(storage, cleanup, ServiceOptions::from(&config)));

    let state = AppState {
        service: Arc::clone(&service),
        mode: config.mode,
        shutdown: shutdown.clone(),
    };
    let app = router(state, &config.cors_origins);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "Listening");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown requested");
            }
            signal.cancel();
        })
        .await
        .context("serving HTTP")?;

    // Dropping the last queue handle lets the worker drain and exit
    shutdown.cancel();
    drop(service);
    cleanup_worker.await.context("cleanup worker")?;
    info!("Stopped");
    Ok(())
}
