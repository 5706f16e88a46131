//! Bounded-concurrency dispatch of chunk tasks.
//!
//! ```text
//! dispatcher ──acquire(job sem)──acquire(global sem)──spawn──► chunk task
//!     │  (ascending index, stops on cancel)                      │
//!     └────────────── mpsc<ChunkUpdate> ◄────────────────────────┘
//!                           │
//!                      job driver (single writer)
//! ```

use crate::audio::AudioInput;
use crate::config::SchedulerConfig;
use crate::error::TranscriptionError;
use crate::job::types::{ChunkTranscript, JobId, Window};
use crate::scheduler::retry::{RetryDecision, RetryPolicy};
use crate::stt::{ChunkOptions, ChunkRequest, ChunkTranscriber};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

/// Capacity of a job's update channel.
const UPDATE_BUFFER: usize = 64;

/// A chunk to transcribe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkWork {
    pub index: usize,
    pub window: Window,
}

/// Everything the pool needs to run one job's chunks.
#[derive(Debug, Clone)]
pub struct JobDispatch {
    pub job_id: JobId,
    pub audio: Arc<AudioInput>,
    /// In ascending index order.
    pub chunks: Vec<ChunkWork>,
    pub language: Option<String>,
    pub max_concurrency: usize,
    pub cancel: CancellationToken,
}

/// How a chunk ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    Succeeded(ChunkTranscript),
    /// Fatal, or transient with the attempt budget spent.
    Failed(TranscriptionError),
    Cancelled,
}

/// Message from the pool to the job driver.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkUpdate {
    Started {
        index: usize,
        attempt: u32,
    },
    Retrying {
        index: usize,
        attempt: u32,
        delay: Duration,
        error: TranscriptionError,
    },
    Finished {
        index: usize,
        attempts: u32,
        outcome: ChunkOutcome,
    },
}

/// Shared by every chunk task of one job.
struct ChunkContext {
    job_id: JobId,
    audio: Arc<AudioInput>,
    language: Option<String>,
    cancel: CancellationToken,
    updates: mpsc::Sender<ChunkUpdate>,
}

/// Permits held for the lifetime of a chunk task.
struct Admission {
    _job: OwnedSemaphorePermit,
    _global: Option<OwnedSemaphorePermit>,
}

/// Runs chunk tasks against a [`ChunkTranscriber`].
///
/// Each job gets its own semaphore of `max_concurrency` permits; an optional
/// global semaphore caps calls across all jobs. Both are FIFO, and chunks are
/// admitted in ascending index order.
#[derive(Clone)]
pub struct WorkerPool {
    transcriber: Arc<dyn ChunkTranscriber>,
    config: SchedulerConfig,
    retry: RetryPolicy,
    global: Option<Arc<Semaphore>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("transcriber", &self.transcriber.model_name())
            .field("config", &self.config)
            .finish()
    }
}

impl WorkerPool {
    pub fn new(transcriber: Arc<dyn ChunkTranscriber>, config: &SchedulerConfig) -> Self {
        Self {
            transcriber,
            retry: RetryPolicy::from(config),
            global: config
                .global_max_concurrency
                .map(|permits| Arc::new(Semaphore::new(permits.max(1)))),
            config: config.clone(),
        }
    }

    pub fn model_name(&self) -> &str {
        self.transcriber.model_name()
    }

    /// Starts dispatching a job's chunks and returns its update stream.
    ///
    /// The stream closes once every dispatched chunk has reported `Finished`
    /// and no further chunk will be dispatched. Chunks never admitted because
    /// of cancellation produce no updates.
    pub fn run_job(&self, job: JobDispatch) -> mpsc::Receiver<ChunkUpdate> {
        let (updates, receiver) = mpsc::channel(UPDATE_BUFFER);
        let pool = self.clone();
        tokio::spawn(async move { pool.dispatch(job, updates).await });
        receiver
    }

    async fn dispatch(self, job: JobDispatch, updates: mpsc::Sender<ChunkUpdate>) {
        let per_job = Arc::new(Semaphore::new(job.max_concurrency.max(1)));
        let context = Arc::new(ChunkContext {
            job_id: job.job_id,
            audio: job.audio,
            language: job.language,
            cancel: job.cancel,
            updates,
        });

        for work in job.chunks {
            let Some(admission) = self.admit(&per_job, &context.cancel).await else {
                tracing::debug!(job_id = %context.job_id, chunk = work.index, "dispatch stopped");
                break;
            };
            let pool = self.clone();
            let context = Arc::clone(&context);
            tokio::spawn(async move { pool.run_chunk(context, work, admission).await });
        }
    }

    async fn admit(
        &self,
        per_job: &Arc<Semaphore>,
        cancel: &CancellationToken,
    ) -> Option<Admission> {
        let job_permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            permit = Arc::clone(per_job).acquire_owned() => permit.ok()?,
        };
        let global_permit = match &self.global {
            Some(global) => Some(tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                permit = Arc::clone(global).acquire_owned() => permit.ok()?,
            }),
            None => None,
        };
        Some(Admission {
            _job: job_permit,
            _global: global_permit,
        })
    }

    async fn run_chunk(self, context: Arc<ChunkContext>, work: ChunkWork, admission: Admission) {
        let _admission = admission;
        let samples = context.audio.slice(&work.window);
        let timeout = self.config.chunk_timeout(work.window.duration_secs());
        let cancel = &context.cancel;
        let mut attempt = 0u32;

        let outcome = loop {
            if cancel.is_cancelled() {
                break ChunkOutcome::Cancelled;
            }
            attempt += 1;
            context.send(ChunkUpdate::Started {
                index: work.index,
                attempt,
            })
            .await;
            tracing::debug!(job_id = %context.job_id, chunk = work.index, attempt, "dispatching chunk");

            let request = ChunkRequest {
                job_id: context.job_id,
                chunk_index: work.index,
                samples: samples.clone(),
                sample_rate: context.audio.sample_rate(),
                offset_secs: work.window.start_secs,
                duration_secs: work.window.duration_secs(),
                language: context.language.clone(),
                options: ChunkOptions { attempt, timeout },
            };
            let call = tokio::time::timeout(
                timeout,
                self.transcriber.transcribe_chunk(request, cancel.clone()),
            );

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break ChunkOutcome::Cancelled,
                result = call => result.unwrap_or_else(|_| Err(TranscriptionError::timeout(timeout))),
            };

            let error = match result {
                Ok(transcript) => break ChunkOutcome::Succeeded(transcript),
                Err(error) => error,
            };

            match self.retry.decide(attempt, &error) {
                RetryDecision::RetryAfter(delay) => {
                    tracing::warn!(
                        job_id = %context.job_id,
                        chunk = work.index,
                        attempt,
                        retry_in = %humantime::format_duration(delay),
                        error = %error,
                        "chunk attempt failed, retrying"
                    );
                    context.send(ChunkUpdate::Retrying {
                        index: work.index,
                        attempt,
                        delay,
                        error,
                    })
                    .await;
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break ChunkOutcome::Cancelled,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                RetryDecision::GiveUp => {
                    tracing::warn!(
                        job_id = %context.job_id,
                        chunk = work.index,
                        attempt,
                        error = %error,
                        "chunk failed"
                    );
                    break ChunkOutcome::Failed(error);
                }
            }
        };

        context.send(ChunkUpdate::Finished {
            index: work.index,
            attempts: attempt,
            outcome,
        })
        .await;
    }
}

impl ChunkContext {
    async fn send(&self, update: ChunkUpdate) {
        // The driver only goes away when the job is already finished.
        let _ = self.updates.send(update).await;
    }
}
