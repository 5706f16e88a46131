//! Typed job events published on the orchestrator's broadcast channel.

use crate::error::JobError;
use crate::job::types::{ChunkStatus, JobId, JobStatus, MergedTranscript, Progress};
use serde::{Deserialize, Serialize};

/// One observable change of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// Status change or chunk completion. `progress.percent` never decreases.
    Progress {
        job_id: JobId,
        status: JobStatus,
        progress: Progress,
    },
    ChunkStateChanged {
        job_id: JobId,
        chunk_index: usize,
        status: ChunkStatus,
        attempts: u32,
    },
    /// Emitted exactly once per job.
    Terminal {
        job_id: JobId,
        status: JobStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<MergedTranscript>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<JobError>,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Progress { job_id, .. }
            | JobEvent::ChunkStateChanged { job_id, .. }
            | JobEvent::Terminal { job_id, .. } => *job_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Terminal { .. })
    }
}
