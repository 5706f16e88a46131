//! Job orchestration: planning, dispatch, merge and finalization.
//!
//! Every job gets one driver task. The driver plans the chunks, hands them
//! to the [`WorkerPool`], and applies the pool's updates to the job record
//! one at a time, so chunk state has a single writer. A job reaches a
//! terminal state through [`Inner::finish`] only, which runs at most once per
//! job and schedules its cleanup.

use crate::audio::AudioInput;
use crate::cancel::{CancelOutcome, CancellationController};
use crate::cleanup::CleanupCoordinator;
use crate::config::{Config, JobConfig};
use crate::defaults;
use crate::error::{JobError, JobErrorCode, Result, ScribeError};
use crate::job::events::JobEvent;
use crate::job::progress::ProgressPublisher;
use crate::job::registry::{JobHandle, JobRegistry};
use crate::job::types::{
    ChunkStatus, ChunkTask, Job, JobId, JobProgress, JobStatus, MergedTranscript,
};
use crate::merge::{ChunkOutput, MergeOptions, merge};
use crate::planner::plan_windows;
use crate::scheduler::pool::{ChunkOutcome, ChunkUpdate, ChunkWork, JobDispatch, WorkerPool};
use crate::stt::ChunkTranscriber;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

/// Entry point for submitting and observing transcription jobs.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    registry: JobRegistry,
    pool: WorkerPool,
    publisher: ProgressPublisher,
    cancellation: CancellationController,
    cleanup: CleanupCoordinator,
}

impl Orchestrator {
    /// Builds an orchestrator around an inference adapter.
    ///
    /// Uses the `[scheduler]` and `[cleanup]` sections of `config`.
    pub fn new(transcriber: Arc<dyn ChunkTranscriber>, config: &Config) -> Result<Self> {
        config.scheduler.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                registry: JobRegistry::new(),
                pool: WorkerPool::new(transcriber, &config.scheduler),
                publisher: ProgressPublisher::new(defaults::EVENT_BUFFER),
                cancellation: CancellationController::new(),
                cleanup: CleanupCoordinator::new(config.cleanup.grace),
            }),
        })
    }

    /// Registers a job and starts processing it in the background.
    ///
    /// # Errors
    /// `ConfigInvalidValue` when `config` is out of range; no job is created.
    pub async fn create_job(&self, audio: AudioInput, config: JobConfig) -> Result<JobId> {
        config.validate()?;

        let job_id = JobId::new();
        let job = Job::new(job_id, audio.descriptor().clone(), config);
        let cancel = self.inner.cancellation.register(job_id).await;
        self.inner.cleanup.register(job_id, audio.artifacts()).await;
        let handle = self.inner.registry.insert(job).await;

        {
            let mut job = handle.lock().await;
            tracing::info!(
                %job_id,
                duration_secs = job.audio.duration_secs,
                chunk_secs = job.config.chunk_duration_secs,
                overlap_secs = job.config.overlap_secs,
                max_concurrency = job.config.max_concurrency,
                "job queued"
            );
            self.inner.publisher.publish_progress(&mut job);
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.drive(handle, audio, cancel).await });

        Ok(job_id)
    }

    pub async fn get_job_progress(&self, job_id: JobId) -> Result<JobProgress> {
        let handle = self.inner.registry.get(job_id).await?;
        let mut job = handle.lock().await;
        if !job.status.is_terminal() {
            self.inner.publisher.refresh(&mut job);
        }
        Ok(job.snapshot_progress())
    }

    /// Full snapshot of a job record, chunks included.
    pub async fn get_job(&self, job_id: JobId) -> Result<Job> {
        self.inner.registry.snapshot(job_id).await
    }

    /// Cancels a job. Safe to call repeatedly and on finished jobs.
    ///
    /// Returns the status after the call: `Cancelling` while chunk calls are
    /// still unwinding, `Cancelled` when none were running, or the unchanged
    /// status of a merging or finished job.
    pub async fn cancel_job(&self, job_id: JobId) -> Result<JobStatus> {
        let handle = self.inner.registry.get(job_id).await?;
        let mut job = handle.lock().await;
        match self.inner.cancellation.request(&mut job).await {
            CancelOutcome::Started { settled: true } => {
                self.inner.finish(&mut job, JobStatus::Cancelled, None).await;
            }
            CancelOutcome::Started { settled: false } => {
                self.inner.publisher.publish_progress(&mut job);
            }
            CancelOutcome::Unchanged(status) => {
                tracing::debug!(%job_id, %status, "cancel request ignored");
            }
        }
        Ok(job.status)
    }

    /// The merged transcript of a completed job.
    ///
    /// # Errors
    /// `JobNotCompleted` for any other status.
    pub async fn get_job_result(&self, job_id: JobId) -> Result<MergedTranscript> {
        let handle = self.inner.registry.get(job_id).await?;
        let job = handle.lock().await;
        match (job.status, &job.result) {
            (JobStatus::Completed, Some(result)) => Ok(result.clone()),
            (status, _) => Err(ScribeError::JobNotCompleted { job_id, status }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.publisher.subscribe()
    }

    /// Waits until the job is terminal and returns its final progress.
    pub async fn wait_for_terminal(&self, job_id: JobId) -> Result<JobProgress> {
        let mut events = self.subscribe();
        loop {
            let progress = self.get_job_progress(job_id).await?;
            if progress.status.is_terminal() {
                return Ok(progress);
            }
            loop {
                match events.recv().await {
                    Ok(event) if event.job_id() == job_id && event.is_terminal() => break,
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(%job_id, skipped, "event stream lagged, re-reading job");
                        break;
                    }
                    Err(RecvError::Closed) => {
                        return Err(ScribeError::Other("job event channel closed".to_string()));
                    }
                }
            }
        }
    }

    /// Guards for temporary files still in use.
    pub fn cleanup(&self) -> &CleanupCoordinator {
        &self.inner.cleanup
    }

    pub async fn job_ids(&self) -> Vec<JobId> {
        self.inner.registry.ids().await
    }

    pub fn model_name(&self) -> &str {
        self.inner.pool.model_name()
    }
}

impl Inner {
    async fn drive(
        self: Arc<Self>,
        handle: JobHandle,
        audio: AudioInput,
        cancel: CancellationToken,
    ) {
        // Cancelled by the job's token, and by the driver when a chunk fails.
        let run = cancel.child_token();
        let Some(dispatch) = self.plan(&handle, audio, &run).await else {
            return;
        };

        let mut updates = self.pool.run_job(dispatch);
        while let Some(update) = updates.recv().await {
            let mut job = handle.lock().await;
            self.apply(&mut job, update, &run).await;
        }

        let mut job = handle.lock().await;
        self.settle(&mut job).await;
    }

    /// Creates the job's chunks. Returns `None` when there is nothing to run.
    async fn plan(
        &self,
        handle: &JobHandle,
        audio: AudioInput,
        run: &CancellationToken,
    ) -> Option<JobDispatch> {
        let mut job = handle.lock().await;
        if !job.transition(JobStatus::Planning) {
            tracing::debug!(job_id = %job.id, status = %job.status, "job left the queue before planning");
            return None;
        }
        self.publisher.publish_progress(&mut job);

        let windows = match plan_windows(
            job.audio.duration_secs,
            job.config.chunk_duration_secs,
            job.config.overlap_secs,
        ) {
            Ok(windows) => windows,
            Err(e) => {
                let error = JobError::new(JobErrorCode::ConfigError, e.to_string());
                self.finish(&mut job, JobStatus::Failed, Some(error)).await;
                return None;
            }
        };

        let job_id = job.id;
        let chunks = windows
            .iter()
            .enumerate()
            .map(|(index, window)| ChunkTask::new(job_id, index, *window))
            .collect();
        job.install_chunks(chunks);
        job.transition(JobStatus::Processing);
        tracing::info!(%job_id, chunks = windows.len(), "job planned");
        self.publisher.publish_progress(&mut job);

        Some(JobDispatch {
            job_id,
            audio: Arc::new(audio),
            chunks: windows
                .iter()
                .enumerate()
                .map(|(index, window)| ChunkWork {
                    index,
                    window: *window,
                })
                .collect(),
            language: job.config.language_hint().map(str::to_string),
            max_concurrency: job.config.max_concurrency,
            cancel: run.clone(),
        })
    }

    async fn apply(&self, job: &mut Job, update: ChunkUpdate, run: &CancellationToken) {
        if job.status.is_terminal() {
            return;
        }

        match update {
            ChunkUpdate::Started { index, attempt } => {
                if let Some(chunk) = job.chunks.get_mut(index) {
                    chunk.attempts = attempt;
                }
                job.set_chunk_status(index, ChunkStatus::Running);
                self.publisher.publish_chunk(job, index);
            }
            ChunkUpdate::Retrying { index, error, .. } => {
                if let Some(chunk) = job.chunks.get_mut(index) {
                    chunk.last_error = Some(error.to_string());
                }
                self.publisher.publish_chunk(job, index);
            }
            ChunkUpdate::Finished {
                index,
                attempts,
                outcome,
            } => {
                if let Some(chunk) = job.chunks.get_mut(index) {
                    chunk.attempts = attempts;
                }
                self.finish_chunk(job, index, outcome, run).await;
            }
        }

        if job.status == JobStatus::Cancelling && job.running_chunks() == 0 {
            self.finish(job, JobStatus::Cancelled, None).await;
        }
    }

    async fn finish_chunk(
        &self,
        job: &mut Job,
        index: usize,
        outcome: ChunkOutcome,
        run: &CancellationToken,
    ) {
        let job_id = job.id;
        match outcome {
            ChunkOutcome::Succeeded(transcript) if job.status == JobStatus::Processing => {
                if job.set_chunk_status(index, ChunkStatus::Succeeded)
                    && let Some(chunk) = job.chunks.get_mut(index)
                {
                    chunk.result = Some(transcript);
                }
                tracing::debug!(%job_id, chunk = index, "chunk succeeded");
                self.publisher.publish_chunk(job, index);
                self.publisher.publish_progress(job);
            }
            ChunkOutcome::Succeeded(_) => {
                tracing::debug!(%job_id, chunk = index, status = %job.status, "discarding late chunk result");
                if job.set_chunk_status(index, ChunkStatus::Cancelled) {
                    self.publisher.publish_chunk(job, index);
                }
            }
            ChunkOutcome::Failed(error) => {
                if let Some(chunk) = job.chunks.get_mut(index) {
                    chunk.last_error = Some(error.to_string());
                }
                job.set_chunk_status(index, ChunkStatus::Failed);
                self.publisher.publish_chunk(job, index);

                if job.status == JobStatus::Processing {
                    let code = if error.retryable {
                        JobErrorCode::ChunkTransientExhausted
                    } else {
                        JobErrorCode::ChunkFatal
                    };
                    run.cancel();
                    let error = JobError::for_chunk(code, index, error.message);
                    self.finish(job, JobStatus::Failed, Some(error)).await;
                }
            }
            ChunkOutcome::Cancelled => {
                if job.set_chunk_status(index, ChunkStatus::Cancelled) {
                    self.publisher.publish_chunk(job, index);
                }
            }
        }
    }

    /// Runs once the pool has nothing left to report.
    async fn settle(&self, job: &mut Job) {
        match job.status {
            JobStatus::Processing if job.all_chunks_succeeded() => self.complete(job).await,
            JobStatus::Processing => {
                let error = JobError::new(
                    JobErrorCode::Internal,
                    "chunk task ended without reporting a result",
                );
                self.finish(job, JobStatus::Failed, Some(error)).await;
            }
            JobStatus::Cancelling => {
                self.finish(job, JobStatus::Cancelled, None).await;
            }
            _ => {}
        }
    }

    async fn complete(&self, job: &mut Job) {
        job.transition(JobStatus::Merging);
        self.publisher.publish_progress(job);

        let outputs: Vec<ChunkOutput<'_>> = job
            .chunks
            .iter()
            .filter_map(|chunk| {
                chunk.result.as_ref().map(|transcript| ChunkOutput {
                    index: chunk.index,
                    window: chunk.window,
                    transcript,
                })
            })
            .collect();
        let merged = merge(&outputs, &MergeOptions::from_job_config(&job.config));
        if merged.degraded {
            tracing::warn!(job_id = %job.id, "transcript merged in chunk order");
        }

        job.result = Some(merged);
        self.finish(job, JobStatus::Completed, None).await;
    }

    /// Moves the job to a terminal status, publishes it and schedules cleanup.
    ///
    /// Does nothing if the job cannot move to `status`, so every job
    /// finishes exactly once.
    async fn finish(&self, job: &mut Job, status: JobStatus, error: Option<JobError>) -> bool {
        if !job.transition(status) {
            return false;
        }
        if status != JobStatus::Completed {
            // Partial output of a failed or cancelled job is discarded.
            job.result = None;
            for chunk in &mut job.chunks {
                chunk.result = None;
            }
        }
        job.error = error;
        for index in job.cancel_open_chunks() {
            self.publisher.publish_chunk(job, index);
        }

        self.publisher.publish_progress(job);
        self.publisher.publish_terminal(job);
        self.cancellation.release(job.id).await;
        self.cleanup.schedule(job.id).await;

        match &job.error {
            Some(error) => tracing::warn!(job_id = %job.id, %status, %error, "job finished"),
            None => tracing::info!(
                job_id = %job.id,
                %status,
                elapsed_ms = job.elapsed_ms(),
                "job finished"
            ),
        }
        true
    }
}
