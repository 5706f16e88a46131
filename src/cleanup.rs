//! Deferred deletion of temporary job artifacts.
//!
//! A job's artifacts are deleted once, a grace period after it finishes.
//! Paths can be protected while something still reads them (a download in
//! progress, say); deletion of a protected path waits for its last
//! `unprotect`.

use crate::job::types::JobId;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct CleanupState {
    artifacts: HashMap<JobId, Vec<PathBuf>>,
    /// Jobs whose cleanup is waiting out the grace period.
    pending: HashSet<JobId>,
    protected: HashMap<PathBuf, usize>,
    /// Protected paths whose deletion came due.
    deferred: HashSet<PathBuf>,
    runs: usize,
}

#[derive(Debug, Clone)]
pub struct CleanupCoordinator {
    grace: Duration,
    state: Arc<Mutex<CleanupState>>,
}

impl CleanupCoordinator {
    pub fn new(grace: Duration) -> Self {
        Self {
            grace,
            state: Arc::new(Mutex::new(CleanupState::default())),
        }
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    /// Records files owned by a job.
    pub async fn register(&self, job_id: JobId, paths: &[PathBuf]) {
        if paths.is_empty() {
            return;
        }
        self.state
            .lock()
            .await
            .artifacts
            .entry(job_id)
            .or_default()
            .extend(paths.iter().cloned());
    }

    /// Schedules deletion of a finished job's artifacts.
    ///
    /// Returns `None` while an earlier schedule for the job is pending.
    pub async fn schedule(&self, job_id: JobId) -> Option<JoinHandle<()>> {
        if !self.state.lock().await.pending.insert(job_id) {
            tracing::debug!(%job_id, "cleanup already scheduled");
            return None;
        }

        let coordinator = self.clone();
        Some(tokio::spawn(async move {
            if !coordinator.grace.is_zero() {
                tokio::time::sleep(coordinator.grace).await;
            }
            coordinator.run(job_id).await;
        }))
    }

    async fn run(&self, job_id: JobId) {
        let due = {
            let mut state = self.state.lock().await;
            state.runs += 1;
            state.pending.remove(&job_id);
            let paths = state.artifacts.remove(&job_id).unwrap_or_default();
            let (held, due): (Vec<PathBuf>, Vec<PathBuf>) = paths
                .into_iter()
                .partition(|path| state.protected.contains_key(path));
            state.deferred.extend(held);
            due
        };

        tracing::debug!(%job_id, files = due.len(), "running cleanup");
        for path in due {
            remove_artifact(&path).await;
        }
    }

    /// Keeps `path` from being deleted until a matching `unprotect`.
    pub async fn protect(&self, path: &Path) {
        *self
            .state
            .lock()
            .await
            .protected
            .entry(path.to_path_buf())
            .or_insert(0) += 1;
    }

    /// Releases one protection; deletes the path if its cleanup already came due.
    pub async fn unprotect(&self, path: &Path) {
        let delete = {
            let mut state = self.state.lock().await;
            let Some(count) = state.protected.get_mut(path) else {
                return;
            };
            *count -= 1;
            if *count > 0 {
                return;
            }
            state.protected.remove(path);
            state.deferred.remove(path)
        };
        if delete {
            remove_artifact(path).await;
        }
    }

    pub async fn is_protected(&self, path: &Path) -> bool {
        self.state.lock().await.protected.contains_key(path)
    }

    /// Number of cleanups executed so far.
    pub async fn runs(&self) -> usize {
        self.state.lock().await.runs
    }

    /// Jobs still tracked: scheduled but not yet run, or with registered artifacts.
    pub async fn tracked_jobs(&self) -> usize {
        let state = self.state.lock().await;
        state
            .pending
            .iter()
            .chain(state.artifacts.keys())
            .collect::<HashSet<_>>()
            .len()
    }
}

async fn remove_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!(path = %path.display(), "removed artifact"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove artifact"),
    }
}
