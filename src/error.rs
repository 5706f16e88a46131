//! Error types for chunkscribe.

use crate::job::types::{JobId, JobStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScribeError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Audio input errors
    #[error("Unsupported audio input: {message}")]
    AudioFormat { message: String },

    // Job lookups
    #[error("Job not found: {job_id}")]
    JobNotFound { job_id: JobId },

    #[error("Job {job_id} has no transcript (status: {status})")]
    JobNotCompleted { job_id: JobId, status: JobStatus },

    // Transcription errors
    #[error("Transcription model not found at {path}")]
    TranscriptionModelNotFound { path: String },

    #[error(transparent)]
    Transcription(#[from] TranscriptionError),

    // IPC errors
    #[error("IPC socket error: {message}")]
    IpcSocket { message: String },

    #[error("IPC protocol error: {message}")]
    IpcProtocol { message: String },

    #[error("IPC connection failed: {message}")]
    IpcConnection { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl ScribeError {
    /// Machine-readable code used in IPC error responses.
    pub fn code(&self) -> &'static str {
        match self {
            ScribeError::ConfigFileNotFound { .. }
            | ScribeError::ConfigParse { .. }
            | ScribeError::ConfigInvalidValue { .. }
            | ScribeError::Config(_) => "config_error",
            ScribeError::AudioFormat { .. } => "audio_format",
            ScribeError::JobNotFound { .. } => "job_not_found",
            ScribeError::JobNotCompleted { .. } => "job_not_completed",
            ScribeError::TranscriptionModelNotFound { .. } => "model_not_found",
            ScribeError::Transcription(_) => "transcription",
            ScribeError::IpcSocket { .. }
            | ScribeError::IpcProtocol { .. }
            | ScribeError::IpcConnection { .. } => "ipc",
            ScribeError::Io(_) => "io",
            ScribeError::Other(_) => "internal",
        }
    }

    pub(crate) fn invalid(key: &str, message: impl Into<String>) -> Self {
        ScribeError::ConfigInvalidValue {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScribeError>;

/// Failure reported by an inference adapter for a single chunk.
///
/// `retryable` separates transient failures (timeouts, busy upstream) from
/// fatal ones (malformed or unsupported audio).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct TranscriptionError {
    pub retryable: bool,
    pub message: String,
}

impl fmt::Display for TranscriptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.retryable { "transient" } else { "fatal" };
        write!(f, "{} transcription failure: {}", kind, self.message)
    }
}

impl TranscriptionError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            message: message.into(),
        }
    }

    /// A chunk call that exceeded its dispatch deadline.
    pub fn timeout(after: std::time::Duration) -> Self {
        Self::transient(format!("timed out after {}", humantime::format_duration(after)))
    }
}

/// Machine-readable reason a job ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorCode {
    /// Chunk/overlap combination rejected by the planner.
    ConfigError,
    /// A chunk hit a non-retryable adapter error.
    ChunkFatal,
    /// A chunk kept failing transiently until its attempt budget ran out.
    ChunkTransientExhausted,
    /// The chunk task itself died (panic or lost worker).
    Internal,
}

impl JobErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobErrorCode::ConfigError => "config_error",
            JobErrorCode::ChunkFatal => "chunk_fatal",
            JobErrorCode::ChunkTransientExhausted => "chunk_transient_exhausted",
            JobErrorCode::Internal => "internal",
        }
    }
}

impl fmt::Display for JobErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error summary stored on a failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub code: JobErrorCode,
    pub message: String,
    /// Chunk that caused the failure, when one did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,
}

impl JobError {
    pub fn new(code: JobErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            chunk_index: None,
        }
    }

    pub fn for_chunk(code: JobErrorCode, chunk_index: usize, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            chunk_index: Some(chunk_index),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.chunk_index {
            Some(index) => write!(f, "{} (chunk {}): {}", self.code, index, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_invalid_value_display() {
        let error = ScribeError::ConfigInvalidValue {
            key: "overlap_secs".to_string(),
            message: "must be less than chunk_duration_secs".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for overlap_secs: must be less than chunk_duration_secs"
        );
        assert_eq!(error.code(), "config_error");
    }

    #[test]
    fn test_job_not_completed_display() {
        let job_id = JobId::new();
        let error = ScribeError::JobNotCompleted {
            job_id,
            status: JobStatus::Processing,
        };
        assert_eq!(
            error.to_string(),
            format!("Job {} has no transcript (status: processing)", job_id)
        );
        assert_eq!(error.code(), "job_not_completed");
    }

    #[test]
    fn test_transcription_error_display() {
        assert_eq!(
            TranscriptionError::transient("upstream busy").to_string(),
            "transient transcription failure: upstream busy"
        );
        assert_eq!(
            TranscriptionError::fatal("not a WAV file").to_string(),
            "fatal transcription failure: not a WAV file"
        );
    }

    #[test]
    fn test_timeout_is_retryable() {
        let error = TranscriptionError::timeout(std::time::Duration::from_secs(90));
        assert!(error.retryable);
        assert!(error.message.contains("1m 30s"), "got: {}", error.message);
    }

    #[test]
    fn test_transcription_error_converts_transparently() {
        let error: ScribeError = TranscriptionError::fatal("bad header").into();
        assert_eq!(error.to_string(), "fatal transcription failure: bad header");
        assert_eq!(error.code(), "transcription");
    }

    #[test]
    fn test_job_error_display_with_chunk() {
        let error = JobError::for_chunk(JobErrorCode::ChunkFatal, 1, "malformed audio");
        assert_eq!(error.to_string(), "chunk_fatal (chunk 1): malformed audio");

        let error = JobError::new(JobErrorCode::ConfigError, "step must be positive");
        assert_eq!(error.to_string(), "config_error: step must be positive");
    }

    #[test]
    fn test_job_error_code_serializes_snake_case() {
        let json = serde_json::to_string(&JobErrorCode::ChunkTransientExhausted).unwrap();
        assert_eq!(json, "\"chunk_transient_exhausted\"");
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: ScribeError = io_error.into();
        assert!(error.to_string().contains("file not found"));
        assert_eq!(error.code(), "io");
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: ScribeError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: ScribeError = io_error.into();
        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<ScribeError>();
        assert_sync::<ScribeError>();
    }
}
