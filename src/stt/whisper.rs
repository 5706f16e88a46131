//! Whisper-based chunk transcription.
//!
//! # Feature Gate
//!
//! The real implementation needs the `whisper` feature (enabled by default)
//! and cmake at build time:
//!
//! ```bash
//! cargo build --features whisper
//! ```
//!
//! Without it `WhisperTranscriber` still constructs, but every call fails
//! with a fatal error so jobs end in `Failed` instead of hanging.

use crate::config::SttConfig;
use crate::error::{Result, ScribeError, TranscriptionError};
use crate::stt::transcriber::{ChunkRequest, ChunkResult, ChunkTranscriber};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[cfg(feature = "whisper")]
use crate::audio::resample;
#[cfg(feature = "whisper")]
use crate::defaults;
#[cfg(feature = "whisper")]
use crate::job::types::{ChunkTranscript, Segment};
#[cfg(feature = "whisper")]
use std::sync::{Arc, Mutex, Once};
#[cfg(feature = "whisper")]
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

#[cfg(feature = "whisper")]
static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Configuration for Whisper transcriber.
#[derive(Debug, Clone, PartialEq)]
pub struct WhisperConfig {
    /// Path to the Whisper model file
    pub model_path: PathBuf,
    /// Number of threads for inference (None = whisper default)
    pub threads: Option<usize>,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        SttConfig::default().into()
    }
}

impl From<SttConfig> for WhisperConfig {
    fn from(config: SttConfig) -> Self {
        Self {
            model_path: config.model,
            threads: config.threads,
        }
    }
}

/// Whisper-backed [`ChunkTranscriber`].
///
/// Inference is CPU/GPU bound, so each call runs on the blocking pool. The
/// context sits behind a mutex; concurrent chunk calls each create their own
/// state from it.
#[cfg(feature = "whisper")]
pub struct WhisperTranscriber {
    context: Arc<Mutex<WhisperContext>>,
    config: WhisperConfig,
    model_name: String,
}

#[cfg(feature = "whisper")]
impl std::fmt::Debug for WhisperTranscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperTranscriber")
            .field("config", &self.config)
            .field("model_name", &self.model_name)
            .field("context", &"<WhisperContext>")
            .finish()
    }
}

/// Placeholder used when the crate is built without the `whisper` feature.
#[cfg(not(feature = "whisper"))]
#[derive(Debug)]
pub struct WhisperTranscriber {
    config: WhisperConfig,
    model_name: String,
}

fn model_name_from(config: &WhisperConfig) -> Result<String> {
    if !config.model_path.exists() {
        return Err(ScribeError::TranscriptionModelNotFound {
            path: config.model_path.to_string_lossy().to_string(),
        });
    }
    Ok(config
        .model_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string())
}

/// Convert i16 audio samples to f32 normalized to [-1.0, 1.0]
#[cfg_attr(not(feature = "whisper"), allow(dead_code))]
fn convert_audio(samples: &[i16]) -> Vec<f32> {
    samples
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Error for a failed `full` run; an abort requested by `cancel` is reported as such.
#[cfg_attr(not(feature = "whisper"), allow(dead_code))]
fn inference_failure(
    cancel: &CancellationToken,
    error: impl std::fmt::Display,
) -> TranscriptionError {
    if cancel.is_cancelled() {
        TranscriptionError::transient("inference aborted")
    } else {
        TranscriptionError::transient(format!("Whisper inference failed: {}", error))
    }
}

#[cfg(feature = "whisper")]
impl WhisperTranscriber {
    /// Load the model.
    ///
    /// # Errors
    /// `TranscriptionModelNotFound` when the file is missing, a fatal
    /// `Transcription` error when whisper rejects it.
    pub fn new(config: WhisperConfig) -> Result<Self> {
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        let model_name = model_name_from(&config)?;

        let mut context_params = WhisperContextParameters::default();
        // Fused attention avoids the standalone softmax kernel that crashes on
        // sm_120 GPUs with ggml <= 1.7.6.
        context_params.flash_attn(true);
        let model_path = config
            .model_path
            .to_str()
            .ok_or_else(|| TranscriptionError::fatal("Invalid UTF-8 in model path"))?;
        let context = WhisperContext::new_with_params(model_path, context_params).map_err(|e| {
            TranscriptionError::fatal(format!("Failed to load Whisper model: {}", e))
        })?;

        tracing::info!(model = %model_name, backend = defaults::gpu_backend(), "whisper model loaded");

        Ok(Self {
            context: Arc::new(Mutex::new(context)),
            config,
            model_name,
        })
    }

    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }

    fn run_inference(
        context: &Mutex<WhisperContext>,
        threads: Option<usize>,
        request: &ChunkRequest,
        cancel: CancellationToken,
    ) -> ChunkResult {
        let audio = resample(
            &request.samples,
            request.sample_rate,
            defaults::WHISPER_SAMPLE_RATE,
        );
        let audio_f32 = convert_audio(&audio);

        let mut state = {
            let context = context.lock().map_err(|e| {
                TranscriptionError::transient(format!("Failed to acquire context lock: {}", e))
            })?;
            context.create_state().map_err(|e| {
                TranscriptionError::transient(format!("Failed to create Whisper state: {}", e))
            })?
        };

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(request.language.as_deref());
        if let Some(threads) = threads {
            params.set_n_threads(threads as i32);
        }
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        // Polled by whisper.cpp between compute steps.
        let abort = cancel.clone();
        params.set_abort_callback_safe(move || abort.is_cancelled());

        state
            .full(params, &audio_f32)
            .map_err(|e| inference_failure(&cancel, e))?;

        let mut segments = Vec::new();
        for segment in state.as_iter() {
            let text = segment.to_string();
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            // Timestamps are centiseconds relative to the chunk start.
            let start_secs = (segment.start_timestamp() as f64 / 100.0).max(0.0);
            let end_secs = (segment.end_timestamp() as f64 / 100.0)
                .clamp(start_secs, request.duration_secs.max(start_secs));
            let confidence = (1.0 - segment.no_speech_probability()).clamp(0.0, 1.0);
            segments.push(Segment::new(start_secs, end_secs, text, confidence));
        }

        let full_text = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let confidence = if segments.is_empty() {
            0.0
        } else {
            segments.iter().map(|s| s.confidence).sum::<f32>() / segments.len() as f32
        };

        Ok(ChunkTranscript {
            segments,
            full_text,
            confidence,
        })
    }
}

#[cfg(feature = "whisper")]
#[async_trait::async_trait]
impl ChunkTranscriber for WhisperTranscriber {
    async fn transcribe_chunk(
        &self,
        request: ChunkRequest,
        cancel: CancellationToken,
    ) -> ChunkResult {
        if cancel.is_cancelled() {
            return Err(TranscriptionError::transient("cancelled before inference"));
        }
        tracing::debug!(
            job_id = %request.job_id,
            chunk = request.chunk_index,
            attempt = request.options.attempt,
            samples = request.samples.len(),
            "running whisper inference"
        );

        let context = Arc::clone(&self.context);
        let threads = self.config.threads;
        tokio::task::spawn_blocking(move || {
            Self::run_inference(&context, threads, &request, cancel)
        })
            .await
            .map_err(|e| TranscriptionError::transient(format!("inference task failed: {}", e)))?
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(not(feature = "whisper"))]
impl WhisperTranscriber {
    /// Checks the model file exists; inference itself is unavailable.
    pub fn new(config: WhisperConfig) -> Result<Self> {
        let model_name = model_name_from(&config)?;
        Ok(Self { config, model_name })
    }

    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }
}

#[cfg(not(feature = "whisper"))]
#[async_trait::async_trait]
impl ChunkTranscriber for WhisperTranscriber {
    async fn transcribe_chunk(
        &self,
        _request: ChunkRequest,
        _cancel: CancellationToken,
    ) -> ChunkResult {
        Err(TranscriptionError::fatal(concat!(
            "Whisper feature not enabled. This binary was built without speech recognition.\n",
            "To fix: cargo build --release (whisper is enabled by default)\n",
            "If build fails with cmake errors, install: sudo apt install cmake"
        )))
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_whisper_config_from_stt_config() {
        let config = WhisperConfig::from(SttConfig {
            model: PathBuf::from("/custom/model.bin"),
            threads: Some(4),
        });
        assert_eq!(config.model_path, PathBuf::from("/custom/model.bin"));
        assert_eq!(config.threads, Some(4));

        assert_eq!(
            WhisperConfig::default().model_path,
            PathBuf::from("models/ggml-base.bin")
        );
    }

    #[test]
    fn test_whisper_transcriber_new_fails_for_missing_model() {
        let config = WhisperConfig {
            model_path: PathBuf::from("/nonexistent/model.bin"),
            threads: None,
        };

        match WhisperTranscriber::new(config) {
            Err(ScribeError::TranscriptionModelNotFound { path }) => {
                assert_eq!(path, "/nonexistent/model.bin");
            }
            other => panic!("Expected TranscriptionModelNotFound error, got {:?}", other),
        }
    }

    #[test]
    fn test_whisper_transcriber_rejects_or_stubs_invalid_model() {
        let dir = TempDir::new().unwrap();
        let model_path = dir.path().join("ggml-base.bin");
        std::fs::write(&model_path, b"fake model data").unwrap();

        let result = WhisperTranscriber::new(WhisperConfig {
            model_path,
            threads: None,
        });

        // With whisper: the file is not a model. Without: the stub only checks existence.
        #[cfg(feature = "whisper")]
        assert!(matches!(result, Err(ScribeError::Transcription(e)) if !e.retryable));

        #[cfg(not(feature = "whisper"))]
        assert_eq!(result.unwrap().model_name(), "ggml-base");
    }

    #[cfg(not(feature = "whisper"))]
    #[tokio::test]
    async fn test_stub_fails_fatally() {
        use crate::job::types::JobId;
        use crate::stt::transcriber::ChunkOptions;
        use std::time::Duration;

        let dir = TempDir::new().unwrap();
        let model_path = dir.path().join("ggml-tiny.bin");
        std::fs::write(&model_path, b"x").unwrap();
        let transcriber = WhisperTranscriber::new(WhisperConfig {
            model_path,
            threads: None,
        })
        .unwrap();

        let request = ChunkRequest {
            job_id: JobId::new(),
            chunk_index: 0,
            samples: vec![0; 16],
            sample_rate: 16000,
            offset_secs: 0.0,
            duration_secs: 0.001,
            language: None,
            options: ChunkOptions {
                attempt: 1,
                timeout: Duration::from_secs(30),
            },
        };
        let error = transcriber
            .transcribe_chunk(request, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(!error.retryable);
    }

    #[test]
    fn test_inference_failure_reports_abort_after_cancel() {
        let cancel = CancellationToken::new();
        let error = inference_failure(&cancel, "failed to encode");
        assert!(error.retryable);
        assert!(error.message.contains("failed to encode"));

        cancel.cancel();
        let error = inference_failure(&cancel, "failed to encode");
        assert_eq!(error.message, "inference aborted");
    }

    #[test]
    fn test_convert_audio_i16_to_f32() {
        let samples = vec![0i16, 16384, -16384, 32767, -32768];
        let converted = convert_audio(&samples);

        assert_eq!(converted.len(), samples.len());
        assert_eq!(converted[0], 0.0);
        assert!((converted[1] - 0.5).abs() < 0.01);
        assert!((converted[2] + 0.5).abs() < 0.01);
        assert!((converted[3] - 0.999969).abs() < 0.01);
        assert_eq!(converted[4], -1.0);
    }
}
