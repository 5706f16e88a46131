//! Command-line interface for chunkscribe
//!
//! Provides argument parsing using clap derive macros.

use crate::config::JobConfig;
use crate::job::types::JobId;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Chunked transcription of long recordings
#[derive(Parser, Debug)]
#[command(
    name = "chunkscribe",
    version,
    about = "Chunked transcription of long recordings"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug logs and chunk events, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Per-job overrides of the `[job]` config section.
#[derive(Args, Debug, Clone, Default, PartialEq)]
pub struct JobArgs {
    /// Chunk window length (60-1800 seconds)
    #[arg(long, value_name = "SECONDS")]
    pub chunk_duration: Option<f64>,

    /// Overlap between consecutive windows (0-30 seconds)
    #[arg(long, value_name = "SECONDS")]
    pub overlap: Option<f64>,

    /// Chunks of this job transcribed at once (1-8)
    #[arg(long, short = 'j', value_name = "N")]
    pub max_concurrency: Option<usize>,

    /// Language hint (e.g. en, de, auto)
    #[arg(long, value_name = "LANG")]
    pub language: Option<String>,

    /// Keep non-speech markers such as [MUSIC] in the transcript
    #[arg(long)]
    pub keep_markers: bool,
}

impl JobArgs {
    /// Applies the overrides on top of `base`.
    pub fn apply(&self, base: JobConfig) -> JobConfig {
        let mut config = base;
        if let Some(chunk) = self.chunk_duration {
            config.chunk_duration_secs = chunk;
        }
        if let Some(overlap) = self.overlap {
            config.overlap_secs = overlap;
        }
        if let Some(n) = self.max_concurrency {
            config.max_concurrency = n;
        }
        if let Some(language) = &self.language {
            config.language = language.clone();
        }
        if self.keep_markers {
            config.output.strip_markers = false;
        }
        config
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Transcribe a WAV file in this process
    Transcribe {
        /// WAV file to transcribe (16-bit PCM)
        file: PathBuf,

        #[command(flatten)]
        job: JobArgs,

        /// Whisper model file (overrides stt.model)
        #[arg(long, value_name = "PATH")]
        model: Option<PathBuf>,

        /// Print the merged transcript as JSON
        #[arg(long)]
        json: bool,

        /// Prefix each segment with its time range
        #[arg(long, short = 't')]
        timestamps: bool,
    },

    /// Print the chunk windows planned for a recording length
    Plan {
        /// Recording length in seconds
        #[arg(long, value_name = "SECONDS")]
        duration: f64,

        #[command(flatten)]
        job: JobArgs,
    },

    /// Start the daemon (foreground process for systemd)
    Daemon {
        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/chunkscribe.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Submit a WAV file to the daemon
    Submit {
        /// WAV file readable by the daemon
        file: PathBuf,

        #[command(flatten)]
        job: JobArgs,

        /// Follow the job until it finishes
        #[arg(long, short = 'f')]
        follow: bool,

        /// Let the daemon delete the file after the job finishes
        #[arg(long)]
        temporary: bool,

        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/chunkscribe.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Show a job's progress via IPC
    Status {
        job_id: JobId,

        /// Print progress as JSON
        #[arg(long)]
        json: bool,

        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/chunkscribe.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Cancel a job via IPC
    Cancel {
        job_id: JobId,

        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/chunkscribe.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Print the transcript of a completed job
    Result {
        job_id: JobId,

        /// Print the merged transcript as JSON
        #[arg(long)]
        json: bool,

        /// Prefix each segment with its time range
        #[arg(long, short = 't')]
        timestamps: bool,

        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/chunkscribe.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Follow a job's events until it finishes
    Follow {
        job_id: JobId,

        /// Path to Unix socket (default: $XDG_RUNTIME_DIR/chunkscribe.sock)
        #[arg(long, value_name = "PATH")]
        socket: Option<PathBuf>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}
