use crate::defaults;
use crate::error::{Result, ScribeError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub job: JobConfig,
    pub scheduler: SchedulerConfig,
    pub cleanup: CleanupConfig,
    pub stt: SttConfig,
    pub daemon: DaemonConfig,
}

/// Per-job chunking and output settings.
///
/// Submitted with every job; the `[job]` section only supplies defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JobConfig {
    pub chunk_duration_secs: f64,
    pub overlap_secs: f64,
    pub max_concurrency: usize,
    /// Language hint passed to the adapter ("auto" = let it decide).
    pub language: String,
    pub output: OutputOptions,
}

/// How the merged transcript is assembled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputOptions {
    /// Drop non-speech markers such as `[BLANK_AUDIO]`.
    pub strip_markers: bool,
    /// Override for the separator between segment texts.
    pub separator: Option<String>,
}

/// Worker pool, retry and timeout settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Attempts per chunk, including the first.
    pub max_attempts: u32,
    #[serde(with = "human_duration")]
    pub backoff_base: Duration,
    #[serde(with = "human_duration")]
    pub backoff_max: Duration,
    /// Chunk timeout = max(timeout_floor, chunk length × multiplier).
    pub timeout_multiplier: f64,
    #[serde(with = "human_duration")]
    pub timeout_floor: Duration,
    /// Ceiling on chunk calls in flight across all jobs (None = unbounded).
    pub global_max_concurrency: Option<usize>,
}

/// Temporary artifact cleanup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CleanupConfig {
    /// Delay between a job finishing and its artifacts being deleted ("0s" = immediately).
    #[serde(with = "human_duration")]
    pub grace: Duration,
}

/// Speech-to-text adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SttConfig {
    /// Path to a ggml Whisper model file.
    pub model: PathBuf,
    /// Inference threads (None = whisper default).
    pub threads: Option<usize>,
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DaemonConfig {
    /// Unix socket path (None = `$XDG_RUNTIME_DIR/chunkscribe.sock`).
    pub socket: Option<PathBuf>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            chunk_duration_secs: defaults::CHUNK_DURATION_SECS,
            overlap_secs: defaults::OVERLAP_SECS,
            max_concurrency: defaults::MAX_CONCURRENCY,
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            output: OutputOptions::default(),
        }
    }
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            strip_markers: true,
            separator: None,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::MAX_ATTEMPTS,
            backoff_base: Duration::from_millis(defaults::BACKOFF_BASE_MS),
            backoff_max: Duration::from_millis(defaults::BACKOFF_MAX_MS),
            timeout_multiplier: defaults::TIMEOUT_MULTIPLIER,
            timeout_floor: Duration::from_secs(defaults::TIMEOUT_FLOOR_SECS),
            global_max_concurrency: None,
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(defaults::CLEANUP_GRACE_SECS),
        }
    }
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            model: PathBuf::from("models/ggml-base.bin"),
            threads: None,
        }
    }
}

impl JobConfig {
    /// Distance between consecutive window starts.
    pub fn step_secs(&self) -> f64 {
        self.chunk_duration_secs - self.overlap_secs
    }

    /// Checks the submission ranges and the chunk/overlap relation.
    pub fn validate(&self) -> Result<()> {
        let chunk = self.chunk_duration_secs;
        if !chunk.is_finite()
            || !(defaults::MIN_CHUNK_DURATION_SECS..=defaults::MAX_CHUNK_DURATION_SECS)
                .contains(&chunk)
        {
            return Err(ScribeError::invalid(
                "chunk_duration_secs",
                format!(
                    "{} is outside {}..={}",
                    chunk,
                    defaults::MIN_CHUNK_DURATION_SECS,
                    defaults::MAX_CHUNK_DURATION_SECS
                ),
            ));
        }

        let overlap = self.overlap_secs;
        if !overlap.is_finite() || !(0.0..=defaults::MAX_OVERLAP_SECS).contains(&overlap) {
            return Err(ScribeError::invalid(
                "overlap_secs",
                format!("{} is outside 0..={}", overlap, defaults::MAX_OVERLAP_SECS),
            ));
        }

        if overlap >= chunk {
            return Err(ScribeError::invalid(
                "overlap_secs",
                "must be less than chunk_duration_secs",
            ));
        }

        if !(defaults::MIN_MAX_CONCURRENCY..=defaults::MAX_MAX_CONCURRENCY)
            .contains(&self.max_concurrency)
        {
            return Err(ScribeError::invalid(
                "max_concurrency",
                format!(
                    "{} is outside {}..={}",
                    self.max_concurrency,
                    defaults::MIN_MAX_CONCURRENCY,
                    defaults::MAX_MAX_CONCURRENCY
                ),
            ));
        }

        if self.language.trim().is_empty() {
            return Err(ScribeError::invalid("language", "must not be empty"));
        }

        Ok(())
    }

    /// Language hint for the adapter, `None` when detection is automatic.
    pub fn language_hint(&self) -> Option<&str> {
        if self.language == defaults::AUTO_LANGUAGE {
            None
        } else {
            Some(&self.language)
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(ScribeError::invalid("max_attempts", "must be at least 1"));
        }
        if self.backoff_max < self.backoff_base {
            return Err(ScribeError::invalid(
                "backoff_max",
                "must not be shorter than backoff_base",
            ));
        }
        if !self.timeout_multiplier.is_finite() || self.timeout_multiplier <= 0.0 {
            return Err(ScribeError::invalid(
                "timeout_multiplier",
                "must be a positive number",
            ));
        }
        if self.global_max_concurrency == Some(0) {
            return Err(ScribeError::invalid(
                "global_max_concurrency",
                "must be at least 1 when set",
            ));
        }
        Ok(())
    }

    /// Dispatch deadline for a chunk of the given length.
    pub fn chunk_timeout(&self, chunk_secs: f64) -> Duration {
        // Saturates: a huge multiplier means "no practical deadline".
        let scaled = Duration::try_from_secs_f64((chunk_secs * self.timeout_multiplier).max(0.0))
            .unwrap_or(Duration::MAX);
        scaled.max(self.timeout_floor)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ScribeError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                ScribeError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if file doesn't exist
    ///
    /// Only returns defaults if the file is missing.
    /// Returns errors for invalid TOML.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(ScribeError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - CHUNKSCRIBE_MODEL → stt.model
    /// - CHUNKSCRIBE_LANGUAGE → job.language
    /// - CHUNKSCRIBE_MAX_CONCURRENCY → job.max_concurrency
    /// - CHUNKSCRIBE_CLEANUP_GRACE → cleanup.grace (e.g. "0s", "10m")
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(model) = std::env::var("CHUNKSCRIBE_MODEL")
            && !model.is_empty()
        {
            self.stt.model = PathBuf::from(model);
        }

        if let Ok(language) = std::env::var("CHUNKSCRIBE_LANGUAGE")
            && !language.is_empty()
        {
            self.job.language = language;
        }

        if let Ok(value) = std::env::var("CHUNKSCRIBE_MAX_CONCURRENCY")
            && !value.is_empty()
        {
            match value.parse() {
                Ok(n) => self.job.max_concurrency = n,
                Err(e) => tracing::warn!(%value, error = %e, "ignoring CHUNKSCRIBE_MAX_CONCURRENCY"),
            }
        }

        if let Ok(value) = std::env::var("CHUNKSCRIBE_CLEANUP_GRACE")
            && !value.is_empty()
        {
            match humantime::parse_duration(&value) {
                Ok(grace) => self.cleanup.grace = grace,
                Err(e) => tracing::warn!(%value, error = %e, "ignoring CHUNKSCRIBE_CLEANUP_GRACE"),
            }
        }

        self
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.job.validate()?;
        self.scheduler.validate()
    }

    /// Render as TOML (used by `config show` and `config init`).
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ScribeError::ConfigParse {
            message: e.to_string(),
        })
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/chunkscribe/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chunkscribe")
            .join("config.toml")
    }
}

/// Serde adapter writing durations the way people type them ("30s", "5m").
mod human_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }
}
