//! Progress computation and event publishing.

use crate::job::events::JobEvent;
use crate::job::types::{Job, Progress};
use tokio::sync::broadcast;

/// Percent and ETA for `completed` of `total` chunks after `elapsed_ms`.
///
/// `floor` is the last published percent; the result never goes below it.
pub fn compute_progress(completed: usize, total: usize, elapsed_ms: u64, floor: f64) -> Progress {
    let percent = if total == 0 {
        0.0
    } else {
        100.0 * completed.min(total) as f64 / total as f64
    };
    let eta_ms = (completed > 0).then(|| {
        let remaining = total.saturating_sub(completed) as f64;
        (elapsed_ms as f64 / completed as f64 * remaining).round() as u64
    });

    Progress {
        percent: percent.max(floor),
        chunks_completed: completed,
        chunks_total: total,
        elapsed_ms,
        eta_ms,
    }
}

/// Publishes [`JobEvent`]s and keeps `Job::progress` current.
///
/// Sends never block: a subscriber that falls more than the channel capacity
/// behind sees `RecvError::Lagged` and skips ahead.
#[derive(Debug, Clone)]
pub struct ProgressPublisher {
    sender: broadcast::Sender<JobEvent>,
}

impl ProgressPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    /// Recomputes the job's progress from its chunk records.
    pub fn refresh(&self, job: &mut Job) {
        job.progress = compute_progress(
            job.succeeded_chunks(),
            job.chunks.len(),
            job.elapsed_ms(),
            job.progress.percent,
        );
    }

    /// Refreshes and emits a `Progress` event.
    pub fn publish_progress(&self, job: &mut Job) {
        self.refresh(job);
        self.send(JobEvent::Progress {
            job_id: job.id,
            status: job.status,
            progress: job.progress.clone(),
        });
    }

    pub fn publish_chunk(&self, job: &Job, chunk_index: usize) {
        let Some(chunk) = job.chunks.get(chunk_index) else {
            return;
        };
        self.send(JobEvent::ChunkStateChanged {
            job_id: job.id,
            chunk_index,
            status: chunk.status,
            attempts: chunk.attempts,
        });
    }

    pub fn publish_terminal(&self, job: &Job) {
        self.send(JobEvent::Terminal {
            job_id: job.id,
            status: job.status,
            result: job.result.clone(),
            error: job.error.clone(),
        });
    }

    fn send(&self, event: JobEvent) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }
}
