//! Default configuration constants for chunkscribe.
//!
//! Shared by the config file types, the job config and the CLI so every entry
//! point agrees on the same bounds.

/// Default chunk window length in seconds.
///
/// Ten minutes keeps each inference call well inside typical upstream
/// request limits while producing few boundaries to merge.
pub const CHUNK_DURATION_SECS: f64 = 600.0;

/// Accepted range for `chunk_duration_secs`.
pub const MIN_CHUNK_DURATION_SECS: f64 = 60.0;
pub const MAX_CHUNK_DURATION_SECS: f64 = 1800.0;

/// Default overlap between consecutive windows in seconds.
///
/// Long enough to contain a word cut at the boundary, short enough that
/// deduplication rarely has to arbitrate more than one segment.
pub const OVERLAP_SECS: f64 = 10.0;

/// Upper bound for `overlap_secs`.
pub const MAX_OVERLAP_SECS: f64 = 30.0;

/// Default number of chunks of one job in flight at once.
pub const MAX_CONCURRENCY: usize = 3;

/// Accepted range for per-job `max_concurrency`.
pub const MIN_MAX_CONCURRENCY: usize = 1;
pub const MAX_MAX_CONCURRENCY: usize = 8;

/// Attempts per chunk before a transient failure becomes terminal.
pub const MAX_ATTEMPTS: u32 = 3;

/// First retry delay; doubles on every further attempt.
pub const BACKOFF_BASE_MS: u64 = 1000;

/// Ceiling for the exponential retry delay.
pub const BACKOFF_MAX_MS: u64 = 30_000;

/// Chunk dispatch timeout as a multiple of the chunk's audio length.
pub const TIMEOUT_MULTIPLIER: f64 = 2.0;

/// Minimum chunk dispatch timeout in seconds, for very short windows.
pub const TIMEOUT_FLOOR_SECS: u64 = 30;

/// Grace period before temporary artifacts of a finished job are deleted.
pub const CLEANUP_GRACE_SECS: u64 = 300;

/// Capacity of the job event broadcast channel.
///
/// Subscribers that fall further behind than this observe a lag and skip
/// ahead; the orchestrator never blocks on them.
pub const EVENT_BUFFER: usize = 256;

/// Default language hint for transcription.
///
/// "auto" leaves language selection to the inference adapter.
pub const DEFAULT_LANGUAGE: &str = "auto";

/// Language value that triggers automatic language detection.
pub const AUTO_LANGUAGE: &str = "auto";

/// Sample rate Whisper models expect, in Hz.
pub const WHISPER_SAMPLE_RATE: u32 = 16000;

/// Report the GPU backend compiled into this build.
///
/// Returns a human-readable name based on the compile-time feature flags.
/// Only one GPU backend can be active at a time; if none is enabled, returns "CPU".
pub fn gpu_backend() -> &'static str {
    if cfg!(feature = "cuda") {
        "CUDA"
    } else if cfg!(feature = "vulkan") {
        "Vulkan"
    } else if cfg!(feature = "hipblas") {
        "HIP/ROCm"
    } else if cfg!(feature = "openblas") {
        "OpenBLAS"
    } else {
        "CPU"
    }
}
