//! Cooperative per-job cancellation.

use crate::job::types::{Job, JobId, JobStatus};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job moved to `Cancelling`. `settled` is true when no chunk is
    /// running, so the caller can finish it as `Cancelled` right away.
    Started { settled: bool },
    /// Nothing changed; the job keeps this status.
    Unchanged(JobStatus),
}

/// Owns one [`CancellationToken`] per live job.
#[derive(Debug, Default)]
pub struct CancellationController {
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
}

impl CancellationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the token for a new job.
    pub async fn register(&self, job_id: JobId) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.lock().await.insert(job_id, token.clone());
        token
    }

    pub async fn token(&self, job_id: JobId) -> Option<CancellationToken> {
        self.tokens.lock().await.get(&job_id).cloned()
    }

    /// Drops the token of a finished job.
    pub async fn release(&self, job_id: JobId) {
        self.tokens.lock().await.remove(&job_id);
    }

    pub async fn live_jobs(&self) -> usize {
        self.tokens.lock().await.len()
    }

    /// Starts cancelling `job`. The caller holds the job lock.
    ///
    /// Only `Queued`, `Planning` and `Processing` jobs are affected; any other
    /// status is returned unchanged, which makes repeated calls harmless.
    pub async fn request(&self, job: &mut Job) -> CancelOutcome {
        if !job.status.is_cancellable() || !job.transition(JobStatus::Cancelling) {
            return CancelOutcome::Unchanged(job.status);
        }
        if let Some(token) = self.token(job.id).await {
            token.cancel();
        }
        tracing::info!(job_id = %job.id, running = job.running_chunks(), "cancelling job");
        CancelOutcome::Started {
            settled: job.running_chunks() == 0,
        }
    }
}
