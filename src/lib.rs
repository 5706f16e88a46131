//! chunkscribe - chunked transcription of long recordings
//!
//! Splits audio into overlapping windows, transcribes them concurrently with
//! retries, and stitches the results into one transcript.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
pub mod cancel;
pub mod cleanup;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod daemon;
pub mod defaults;
pub mod error;
pub mod ipc;
pub mod job;
pub mod merge;
pub mod orchestrator;
pub mod output;
pub mod planner;
pub mod scheduler;
pub mod stt;

// Façade
pub use orchestrator::Orchestrator;

// Inference seam
pub use stt::transcriber::{ChunkRequest, ChunkTranscriber, MockTranscriber};

// Job model
pub use audio::AudioInput;
pub use job::events::JobEvent;
pub use job::types::{JobId, JobProgress, JobStatus, MergedTranscript};

// Error handling
pub use error::{JobError, JobErrorCode, Result, ScribeError, TranscriptionError};

// Config
pub use config::{Config, JobConfig};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_starts_with_cargo_version() {
        let ver = version_string();
        assert!(
            ver.starts_with(env!("CARGO_PKG_VERSION")),
            "version_string should start with CARGO_PKG_VERSION, got: {}",
            ver
        );
    }

    #[test]
    fn version_string_contains_plus_when_git_hash_present() {
        let ver = version_string();
        if option_env!("GIT_HASH").is_some_and(|h| !h.is_empty()) {
            assert!(ver.contains('+'), "got: {}", ver);
        } else {
            assert_eq!(ver, env!("CARGO_PKG_VERSION"));
        }
    }
}
