//! Records shared by the registry, scheduler, merge engine and event stream.

use crate::config::JobConfig;
use crate::error::JobError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of one transcription job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Job lifecycle.
///
/// ```text
/// Queued → Planning → Processing → Merging → Completed
///    └─────────┴───────────┴──────────┴────→ Failed
///    └─────────┴───────────┴→ Cancelling → Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Planning,
    Processing,
    Merging,
    Completed,
    Failed,
    Cancelling,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// States from which `cancel` starts a cancellation.
    pub fn is_cancellable(self) -> bool {
        matches!(
            self,
            JobStatus::Queued | JobStatus::Planning | JobStatus::Processing
        )
    }

    /// Whether `self → next` is a forward edge of the lifecycle.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Planning)
                | (Planning, Processing)
                | (Processing, Merging)
                | (Merging, Completed)
                | (Queued | Planning | Processing | Merging, Failed)
                | (Queued | Planning | Processing, Cancelling)
                | (Cancelling, Cancelled)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Planning => "planning",
            JobStatus::Processing => "processing",
            JobStatus::Merging => "merging",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelling => "cancelling",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-chunk lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl ChunkStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ChunkStatus::Succeeded | ChunkStatus::Failed | ChunkStatus::Cancelled
        )
    }
}

/// Time window in source-audio seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Window {
    pub start_secs: f64,
    pub end_secs: f64,
}

impl Window {
    pub fn new(start_secs: f64, end_secs: f64) -> Self {
        Self {
            start_secs,
            end_secs,
        }
    }

    pub fn duration_secs(&self) -> f64 {
        self.end_secs - self.start_secs
    }

    pub fn contains(&self, start_secs: f64, end_secs: f64) -> bool {
        start_secs >= self.start_secs && end_secs <= self.end_secs
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.3}, {:.3}]", self.start_secs, self.end_secs)
    }
}

/// Timed text returned by the inference adapter, relative to its chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start_secs: f64,
    pub end_secs: f64,
    pub text: String,
    pub confidence: f32,
}

impl Segment {
    pub fn new(start_secs: f64, end_secs: f64, text: &str, confidence: f32) -> Self {
        Self {
            start_secs,
            end_secs,
            text: text.to_string(),
            confidence,
        }
    }
}

/// One chunk's adapter output.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChunkTranscript {
    pub segments: Vec<Segment>,
    pub full_text: String,
    pub confidence: f32,
}

/// A chunk of a job and its execution state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkTask {
    pub id: Uuid,
    pub job_id: JobId,
    pub index: usize,
    pub window: Window,
    pub status: ChunkStatus,
    pub attempts: u32,
    pub result: Option<ChunkTranscript>,
    pub last_error: Option<String>,
}

impl ChunkTask {
    pub fn new(job_id: JobId, index: usize, window: Window) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            index,
            window,
            status: ChunkStatus::Pending,
            attempts: 0,
            result: None,
            last_error: None,
        }
    }
}

/// Segment of the merged transcript, in global time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedSegment {
    pub start_secs: f64,
    pub end_secs: f64,
    pub text: String,
    pub confidence: f32,
    /// Index of the chunk the segment came from (debugging aid).
    pub chunk_index: usize,
}

/// Final transcript of a completed job.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MergedTranscript {
    pub segments: Vec<MergedSegment>,
    pub full_text: String,
    pub confidence: f32,
    /// Set when segment ordering had to fall back to chunk order.
    pub degraded: bool,
}

/// Description of the source audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioDescriptor {
    pub duration_secs: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub format: String,
}

/// Progress counters kept on the job record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub percent: f64,
    pub chunks_completed: usize,
    pub chunks_total: usize,
    pub elapsed_ms: u64,
    pub eta_ms: Option<u64>,
}

/// Answer to a progress query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: JobId,
    pub status: JobStatus,
    pub percent: f64,
    pub chunks_completed: usize,
    pub chunks_total: usize,
    pub elapsed_ms: u64,
    pub eta_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

/// Full job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub audio: AudioDescriptor,
    pub config: JobConfig,
    pub status: JobStatus,
    pub chunks: Vec<ChunkTask>,
    pub progress: Progress,
    pub error: Option<JobError>,
    pub result: Option<MergedTranscript>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: JobId, audio: AudioDescriptor, config: JobConfig) -> Self {
        Self {
            id,
            audio,
            config,
            status: JobStatus::Queued,
            chunks: Vec::new(),
            progress: Progress::default(),
            error: None,
            result: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Moves the job along a lifecycle edge and stamps the timestamps.
    ///
    /// Returns `false` without touching the record when `next` is not an
    /// allowed edge from the current status.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        let now = Utc::now();
        if next == JobStatus::Planning {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = next;
        true
    }

    /// Milliseconds since planning started, frozen once the job is terminal.
    pub fn elapsed_ms(&self) -> u64 {
        let Some(started) = self.started_at else {
            return 0;
        };
        let end = self.completed_at.unwrap_or_else(Utc::now);
        (end - started).num_milliseconds().max(0) as u64
    }

    pub fn running_chunks(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Running)
            .count()
    }

    pub fn succeeded_chunks(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Succeeded)
            .count()
    }

    pub fn snapshot_progress(&self) -> JobProgress {
        JobProgress {
            job_id: self.id,
            status: self.status,
            percent: self.progress.percent,
            chunks_completed: self.progress.chunks_completed,
            chunks_total: self.progress.chunks_total,
            elapsed_ms: self.progress.elapsed_ms,
            eta_ms: self.progress.eta_ms,
            error: self.error.clone(),
        }
    }
}
