//! In-memory job registry.

use crate::error::{Result, ScribeError};
use crate::job::types::{ChunkStatus, ChunkTask, Job, JobId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Shared handle to one job record.
///
/// Each job has its own lock so work on one job never waits on another.
pub type JobHandle = Arc<Mutex<Job>>;

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, JobHandle>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, job: Job) -> JobHandle {
        let id = job.id;
        let handle = Arc::new(Mutex::new(job));
        self.jobs.write().await.insert(id, Arc::clone(&handle));
        handle
    }

    pub async fn get(&self, job_id: JobId) -> Result<JobHandle> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or(ScribeError::JobNotFound { job_id })
    }

    /// Snapshot of a job record.
    pub async fn snapshot(&self, job_id: JobId) -> Result<Job> {
        let handle = self.get(job_id).await?;
        let job = handle.lock().await;
        Ok(job.clone())
    }

    pub async fn ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.jobs.read().await.keys().copied().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.read().await.is_empty()
    }
}

impl Job {
    /// Replaces the chunk list in one step.
    ///
    /// Only valid while the job has no chunks yet; returns `false` otherwise.
    pub fn install_chunks(&mut self, chunks: Vec<ChunkTask>) -> bool {
        if !self.chunks.is_empty() {
            return false;
        }
        self.progress.chunks_total = chunks.len();
        self.chunks = chunks;
        true
    }

    /// Sets a chunk's status unless it already reached a terminal one.
    ///
    /// Returns `true` when the record changed.
    pub fn set_chunk_status(&mut self, index: usize, status: ChunkStatus) -> bool {
        match self.chunks.get_mut(index) {
            Some(chunk) if !chunk.status.is_terminal() && chunk.status != status => {
                chunk.status = status;
                true
            }
            _ => false,
        }
    }

    /// Marks every chunk that has not finished as cancelled.
    ///
    /// Returns the indices that changed.
    pub fn cancel_open_chunks(&mut self) -> Vec<usize> {
        self.chunks
            .iter_mut()
            .filter(|chunk| !chunk.status.is_terminal())
            .map(|chunk| {
                chunk.status = ChunkStatus::Cancelled;
                chunk.index
            })
            .collect()
    }

    pub fn all_chunks_succeeded(&self) -> bool {
        !self.chunks.is_empty()
            && self
                .chunks
                .iter()
                .all(|chunk| chunk.status == ChunkStatus::Succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JobConfig;
    use crate::job::types::{AudioDescriptor, JobStatus, Window};

    fn job() -> Job {
        let audio = AudioDescriptor {
            duration_secs: 30.0,
            sample_rate: 16000,
            channels: 1,
            format: "wav".to_string(),
        };
        Job::new(JobId::new(), audio, JobConfig::default())
    }

    fn chunks(job: &Job, count: usize) -> Vec<ChunkTask> {
        (0..count)
            .map(|i| ChunkTask::new(job.id, i, Window::new(i as f64 * 10.0, i as f64 * 10.0 + 10.0)))
            .collect()
    }

    #[tokio::test]
    async fn insert_then_get_returns_same_record() {
        let registry = JobRegistry::new();
        let job = job();
        let id = job.id;

        let handle = registry.insert(job).await;
        handle.lock().await.transition(JobStatus::Planning);

        let snapshot = registry.snapshot(id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Planning);
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.ids().await, vec![id]);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let registry = JobRegistry::new();
        assert!(registry.is_empty().await);

        let missing = JobId::new();
        match registry.get(missing).await {
            Err(ScribeError::JobNotFound { job_id }) => assert_eq!(job_id, missing),
            other => panic!("expected JobNotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn chunks_are_installed_once() {
        let mut job = job();
        let planned = chunks(&job, 3);

        assert!(job.install_chunks(planned.clone()));
        assert_eq!(job.progress.chunks_total, 3);
        assert!(!job.install_chunks(planned));
        assert_eq!(job.chunks.len(), 3);
    }

    #[test]
    fn terminal_chunk_status_is_sticky() {
        let mut job = job();
        let planned = chunks(&job, 2);
        job.install_chunks(planned);

        assert!(job.set_chunk_status(0, ChunkStatus::Running));
        assert!(!job.set_chunk_status(0, ChunkStatus::Running));
        assert!(job.set_chunk_status(0, ChunkStatus::Succeeded));
        assert!(!job.set_chunk_status(0, ChunkStatus::Failed));
        assert!(!job.set_chunk_status(5, ChunkStatus::Running));
        assert_eq!(job.chunks[0].status, ChunkStatus::Succeeded);
    }

    #[test]
    fn cancel_open_chunks_leaves_finished_ones() {
        let mut job = job();
        let planned = chunks(&job, 3);
        job.install_chunks(planned);
        job.set_chunk_status(0, ChunkStatus::Succeeded);
        job.set_chunk_status(1, ChunkStatus::Running);

        assert_eq!(job.cancel_open_chunks(), vec![1, 2]);
        assert_eq!(job.chunks[0].status, ChunkStatus::Succeeded);
        assert!(!job.all_chunks_succeeded());
    }
}
