//! Command handler implementation for the daemon.

use crate::audio::AudioInput;
use crate::config::JobConfig;
use crate::daemon::DaemonState;
use crate::error::{Result, ScribeError};
use crate::ipc::protocol::{Command, Response};
use crate::ipc::server::CommandHandler;
use crate::job::events::JobEvent;
use crate::job::types::JobId;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;

/// Command handler for daemon IPC commands.
pub struct DaemonCommandHandler {
    state: Arc<DaemonState>,
}

impl DaemonCommandHandler {
    pub fn new(state: DaemonState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    async fn submit(
        &self,
        path: PathBuf,
        config: Option<JobConfig>,
        temporary: bool,
    ) -> Result<JobId> {
        let config = config.unwrap_or_else(|| self.state.config.job.clone());
        // Validate before decoding so a bad config costs nothing.
        config.validate()?;

        let input = path.clone();
        let mut audio = tokio::task::spawn_blocking(move || AudioInput::from_path(&input))
            .await
            .map_err(|e| ScribeError::Other(format!("Audio decoding task failed: {}", e)))??;
        if temporary {
            audio = audio.with_artifact(path);
        }
        self.state.orchestrator.create_job(audio, config).await
    }

    /// Event describing the job's current state, for late followers.
    async fn current_event(&self, job_id: JobId) -> Result<JobEvent> {
        let job = self.state.orchestrator.get_job(job_id).await?;
        if job.status.is_terminal() {
            Ok(JobEvent::Terminal {
                job_id,
                status: job.status,
                result: job.result,
                error: job.error,
            })
        } else {
            Ok(JobEvent::Progress {
                job_id,
                status: job.status,
                progress: job.progress,
            })
        }
    }
}

#[async_trait::async_trait]
impl CommandHandler for DaemonCommandHandler {
    async fn handle(&self, command: Command) -> Response {
        let orchestrator = &self.state.orchestrator;
        let result = match command {
            Command::Submit {
                path,
                config,
                temporary,
            } => self
                .submit(path, config, temporary)
                .await
                .map(|job_id| Response::Submitted { job_id }),
            Command::Progress { job_id } => orchestrator
                .get_job_progress(job_id)
                .await
                .map(|progress| Response::Progress { progress }),
            Command::Cancel { job_id } => orchestrator
                .cancel_job(job_id)
                .await
                .map(|status| Response::Cancelled { job_id, status }),
            Command::Result { job_id } => orchestrator
                .get_job_result(job_id)
                .await
                .map(|transcript| Response::Transcript { job_id, transcript }),
            Command::Follow { .. } => Err(ScribeError::IpcProtocol {
                message: "follow is a streaming command".to_string(),
            }),
            // Shutdown is handled by stopping the IPC server
            Command::Shutdown => Ok(Response::Ok),
        };

        result.unwrap_or_else(|e| {
            tracing::debug!(error = %e, "command failed");
            Response::from(e)
        })
    }

    async fn follow(&self, job_id: JobId, sink: mpsc::Sender<Response>) {
        // Subscribe before reading the record so no transition is missed.
        let mut events = self.state.orchestrator.subscribe();

        let mut next = match self.current_event(job_id).await {
            Ok(event) => Some(event),
            Err(e) => {
                let _ = sink.send(Response::from(e)).await;
                return;
            }
        };

        loop {
            if let Some(event) = next.take() {
                let terminal = event.is_terminal();
                if sink.send(Response::Event { event }).await.is_err() || terminal {
                    return;
                }
            }

            next = match events.recv().await {
                Ok(event) if event.job_id() == job_id => Some(event),
                Ok(_) => None,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(%job_id, skipped, "follower lagged, resending state");
                    self.current_event(job_id).await.ok()
                }
                Err(RecvError::Closed) => return,
            };
        }
    }
}
