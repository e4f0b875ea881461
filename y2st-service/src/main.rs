//! `youtube2slackthread` service entry point.
//!
//! Owns process startup end to end: load config, open the encrypted stores,
//! build the workspace/stream registries and the shared worker pool, bind
//! the health endpoint, and run until `ctrl_c`, at which point every active
//! stream is cancelled before exit.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use y2st_core::store::{UserSecretStore, WorkspaceStore};
use y2st_core::{
    Command, CommandRouter, Startup, StreamRegistry, TranscriptionWorkerPool, WorkspaceRegistry,
};

mod health;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "youtube2slackthread=info".parse().unwrap()),
        )
        .init();

    info!("youtube2slackthread starting");

    let config_path = std::env::var("Y2ST_CONFIG").ok().map(PathBuf::from);
    let startup = Startup::load(config_path.as_deref()).context("loading startup configuration")?;

    match run(startup).await {
        Ok(()) => Ok(()),
        Err(err) => {
            error!(error = %err, "fatal startup error");
            Err(err)
        }
    }
}

async fn run(startup: Startup) -> anyhow::Result<()> {
    let Startup {
        config,
        secret_box,
        cookies_db_path,
        env_workspace,
    } = startup;

    let workspace_store = Arc::new(
        WorkspaceStore::open(&PathBuf::from("workspaces.db"), secret_box.clone())
            .context("opening workspace store")?,
    );
    let secrets = Arc::new(
        UserSecretStore::open(&cookies_db_path, secret_box).context("opening user secret store")?,
    );

    let workspaces = Arc::new(
        WorkspaceRegistry::build(Arc::clone(&workspace_store), env_workspace)
            .context("building workspace registry")?,
    );
    info!(
        workspaces = ?workspaces.registered_team_ids(),
        "workspace registry built"
    );

    let gpu_declared = config.whisper.device != "cpu";
    let worker_count = TranscriptionWorkerPool::worker_count_for(gpu_declared);
    tracing::warn!("no local STT backend wired in; transcribing with EchoModel placeholder");
    let model = y2st_core::ModelHandle::new(y2st_core::transcription::EchoModel::new());
    let pool = Arc::new(TranscriptionWorkerPool::new(model, worker_count, 64));
    info!(worker_count, gpu_declared, "transcription worker pool built");

    let downloader_path = std::env::var("YTDLP_PATH").unwrap_or_else(|_| "yt-dlp".to_string());
    let registry = StreamRegistry::new();
    let router = Arc::new(CommandRouter::new(
        Arc::clone(&registry),
        Arc::clone(&workspaces),
        secrets,
        pool,
        config.vad.clone(),
        downloader_path,
    ));

    // A future transport shim (webhook/slash-command/socket-mode) feeds this
    // channel; nothing produces commands yet, so the consumer simply idles.
    let (_command_tx, mut command_rx) = tokio::sync::mpsc::channel::<Command>(256);
    let dispatch_router = Arc::clone(&router);
    let dispatch_task = tokio::spawn(async move {
        while let Some(command) = command_rx.recv().await {
            if let Err(err) = dispatch_router.dispatch(command).await {
                error!(error = %err, "command dispatch failed");
            }
        }
    });

    let health_port: u16 = std::env::var("HEALTH_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], health_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding health endpoint on {addr}"))?;
    info!(%addr, "health endpoint listening");

    let health_router = health::router(Arc::clone(&registry));
    let serve_task = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, health_router).await {
            error!(error = %err, "health server exited");
        }
    });

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("shutdown signal received, cancelling active streams");

    for stream in registry.all_streams() {
        stream.stop();
    }

    serve_task.abort();
    dispatch_task.abort();
    info!("youtube2slackthread stopped");
    Ok(())
}
