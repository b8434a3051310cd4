use anyhow::Result;
use axum::Router;
use std::{io::ErrorKind, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use filedrop::config;
use filedrop::routes;
use filedrop::services::{
    chunk_assembler::ChunkAssembler, file_store::FileStore, transfer_store::TransferStore,
};
use filedrop::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting filedrop with config: {:?}", cfg);

    // --- Open the stores ---
    let files = Arc::new(FileStore::open(&cfg.storage_dir).await?);
    let transfers = Arc::new(TransferStore::open(files.clone(), cfg.retention_days).await?);
    let assembler = Arc::new(ChunkAssembler::new(files.clone(), cfg.retention_days));

    let state = AppState {
        files,
        transfers,
        assembler,
        session_ttl: chrono::Duration::seconds(cfg.chunk_session_ttl_secs),
    };

    // --- Maintenance sweep: expired files, expired transfers, stale chunk
    //     sessions ---
    let sweep_state = state.clone();
    let sweep_interval = Duration::from_secs(cfg.sweep_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        // The first tick fires immediately; the stores were just loaded, so
        // skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            run_sweep(&sweep_state).await;
        }
    });

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// One pass of the maintenance sweep. Failures are logged, never fatal.
async fn run_sweep(state: &AppState) {
    match state.files.cleanup_expired().await {
        Ok(0) => {}
        Ok(count) => tracing::info!("sweep removed {count} expired files"),
        Err(err) => tracing::warn!("file expiry sweep failed: {err}"),
    }
    match state.transfers.cleanup_expired().await {
        Ok(0) => {}
        Ok(count) => tracing::info!("sweep expired {count} transfer requests"),
        Err(err) => tracing::warn!("transfer expiry sweep failed: {err}"),
    }
    match state.assembler.evict_stale(state.session_ttl).await {
        Ok(0) => {}
        Ok(count) => {
            let active = state.assembler.active_sessions().await;
            tracing::info!("sweep evicted {count} stale chunk sessions ({active} still active)");
        }
        Err(err) => tracing::warn!("chunk session sweep failed: {err}"),
    }
}
