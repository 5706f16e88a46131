//! Daemon mode: keeps the model loaded and serves jobs over IPC.

pub mod handler;

use crate::config::Config;
use crate::error::{Result, ScribeError};
use crate::ipc::server::IpcServer;
use crate::orchestrator::Orchestrator;
use crate::stt::transcriber::ChunkTranscriber;
use crate::stt::whisper::{WhisperConfig, WhisperTranscriber};
use std::path::PathBuf;
use std::sync::Arc;

/// Daemon state: configuration and the orchestrator owning all jobs.
pub struct DaemonState {
    /// Source of the default `[job]` settings for submissions without one.
    pub config: Config,
    pub orchestrator: Orchestrator,
}

impl DaemonState {
    pub fn new(config: Config, transcriber: Arc<dyn ChunkTranscriber>) -> Result<Self> {
        let orchestrator = Orchestrator::new(transcriber, &config)?;
        Ok(Self {
            config,
            orchestrator,
        })
    }

    pub fn model_name(&self) -> &str {
        self.orchestrator.model_name()
    }
}

/// Socket from the command line, then `[daemon] socket`, then the default.
pub fn resolve_socket_path(config: &Config, socket_path: Option<PathBuf>) -> PathBuf {
    socket_path
        .or_else(|| config.daemon.socket.clone())
        .unwrap_or_else(IpcServer::default_socket_path)
}

/// Run the daemon: load model, start IPC server, wait for shutdown.
///
/// Returns on SIGINT, SIGTERM or a `shutdown` command.
pub async fn run_daemon(config: Config, socket_path: Option<PathBuf>) -> Result<()> {
    tracing::info!(
        model = %config.stt.model.display(),
        backend = crate::defaults::gpu_backend(),
        "loading model"
    );
    let transcriber = create_transcriber(&config).await?;
    tracing::info!(model = transcriber.model_name(), "model loaded");

    let socket_path = resolve_socket_path(&config, socket_path);
    let state = DaemonState::new(config, transcriber)?;

    let server = Arc::new(IpcServer::new(socket_path)?);
    let shutdown = server.shutdown_token();
    let handler = handler::DaemonCommandHandler::new(state);

    let server_clone = Arc::clone(&server);
    let server_handle = tokio::spawn(async move { server_clone.start(handler).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
        }
        res = wait_for_sigterm() => {
            if let Err(e) = res {
                tracing::error!(error = %e, "error setting up signal handler");
            }
            tracing::info!("received SIGTERM, shutting down");
        }
        _ = shutdown.cancelled() => {}
    }

    server.stop().await?;

    match server_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "daemon server failed"),
        Err(e) => tracing::error!(error = %e, "daemon server task failed"),
    }

    tracing::info!("daemon stopped");
    Ok(())
}

/// Wait for SIGTERM signal (used by systemd).
#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| ScribeError::Other(format!("Failed to register SIGTERM handler: {}", e)))?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    std::future::pending::<()>().await
}

/// Load the Whisper model named in `[stt]`.
///
/// Loading is slow and blocking, so it runs off the async workers.
pub async fn create_transcriber(config: &Config) -> Result<Arc<dyn ChunkTranscriber>> {
    if !config.stt.model.exists() {
        return Err(ScribeError::TranscriptionModelNotFound {
            path: config.stt.model.display().to_string(),
        });
    }

    let whisper_config = WhisperConfig::from(config.stt.clone());
    let transcriber = tokio::task::spawn_blocking(move || WhisperTranscriber::new(whisper_config))
        .await
        .map_err(|e| ScribeError::Other(format!("Model loading task failed: {}", e)))??;

    Ok(Arc::new(transcriber))
}
