//! JSON message protocol between the CLI and the daemon.
//!
//! One JSON object per line. Every command gets exactly one response,
//! except `follow`, which gets a stream of `event` responses ending with the
//! job's terminal event.

use crate::config::JobConfig;
use crate::error::ScribeError;
use crate::job::events::JobEvent;
use crate::job::types::{JobId, JobProgress, JobStatus, MergedTranscript};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Commands sent by the CLI to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Transcribe a WAV file readable by the daemon.
    Submit {
        path: PathBuf,
        /// Falls back to the daemon's `[job]` config.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        config: Option<JobConfig>,
        /// The daemon owns the file and deletes it after the job finishes.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        temporary: bool,
    },
    Progress { job_id: JobId },
    Cancel { job_id: JobId },
    Result { job_id: JobId },
    /// Stream the job's events until it is terminal.
    Follow { job_id: JobId },
    Shutdown,
}

impl Command {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Responses sent by the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Submitted {
        job_id: JobId,
    },
    Progress {
        progress: JobProgress,
    },
    Cancelled {
        job_id: JobId,
        status: JobStatus,
    },
    Transcript {
        job_id: JobId,
        transcript: MergedTranscript,
    },
    Event {
        event: JobEvent,
    },
    Ok,
    Error {
        code: String,
        message: String,
    },
}

impl Response {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Last response of a `follow` stream.
    pub fn ends_stream(&self) -> bool {
        match self {
            Response::Event { event } => event.is_terminal(),
            _ => true,
        }
    }
}

impl From<ScribeError> for Response {
    fn from(error: ScribeError) -> Self {
        Response::Error {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}
