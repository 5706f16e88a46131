//! WAV decoding into a mono PCM buffer that jobs slice per window.

use crate::error::{Result, ScribeError};
use crate::job::types::{AudioDescriptor, Window};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Decoded source audio of one job.
///
/// Samples are 16-bit mono at the source sample rate and shared behind an
/// `Arc`, so every chunk task can slice its window without copying the
/// whole recording.
#[derive(Debug, Clone)]
pub struct AudioInput {
    descriptor: AudioDescriptor,
    samples: Arc<[i16]>,
    artifacts: Vec<PathBuf>,
}

impl AudioInput {
    /// Wraps already-decoded mono samples.
    pub fn from_samples(samples: Vec<i16>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(ScribeError::AudioFormat {
                message: "sample rate must be positive".to_string(),
            });
        }
        let descriptor = AudioDescriptor {
            duration_secs: samples.len() as f64 / sample_rate as f64,
            sample_rate,
            channels: 1,
            format: "pcm_s16le".to_string(),
        };
        Ok(Self {
            descriptor,
            samples: samples.into(),
            artifacts: Vec::new(),
        })
    }

    /// Decodes 16-bit integer WAV data, down-mixing to mono.
    pub fn from_reader(reader: Box<dyn Read + Send>) -> Result<Self> {
        let mut wav_reader = hound::WavReader::new(reader).map_err(|e| ScribeError::AudioFormat {
            message: format!("Failed to parse WAV file: {}", e),
        })?;

        let spec = wav_reader.spec();
        if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
            return Err(ScribeError::AudioFormat {
                message: format!(
                    "only 16-bit integer PCM is supported, got {}-bit {:?}",
                    spec.bits_per_sample, spec.sample_format
                ),
            });
        }
        if spec.channels == 0 || spec.sample_rate == 0 {
            return Err(ScribeError::AudioFormat {
                message: "WAV header declares zero channels or sample rate".to_string(),
            });
        }

        let raw_samples: Vec<i16> = wav_reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ScribeError::AudioFormat {
                message: format!("Failed to read WAV samples: {}", e),
            })?;

        let mono = downmix(&raw_samples, spec.channels);
        let mut input = Self::from_samples(mono, spec.sample_rate)?;
        input.descriptor.channels = spec.channels;
        input.descriptor.format = "wav".to_string();
        Ok(input)
    }

    /// Decodes a WAV file from disk.
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| ScribeError::AudioFormat {
            message: format!("Failed to open {}: {}", path.display(), e),
        })?;
        Self::from_reader(Box::new(BufReader::new(file)))
    }

    /// Attaches a temporary file owned by the job (deleted after it finishes).
    pub fn with_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifacts.push(path.into());
        self
    }

    pub fn descriptor(&self) -> &AudioDescriptor {
        &self.descriptor
    }

    pub fn sample_rate(&self) -> u32 {
        self.descriptor.sample_rate
    }

    pub fn duration_secs(&self) -> f64 {
        self.descriptor.duration_secs
    }

    pub fn artifacts(&self) -> &[PathBuf] {
        &self.artifacts
    }

    /// Copies the samples that fall inside `window`.
    pub fn slice(&self, window: &Window) -> Vec<i16> {
        let rate = self.descriptor.sample_rate as f64;
        let len = self.samples.len();
        let start = ((window.start_secs * rate).round().max(0.0) as usize).min(len);
        let end = ((window.end_secs * rate).round().max(0.0) as usize).clamp(start, len);
        self.samples[start..end].to_vec()
    }
}

/// Averages interleaved channels into one.
fn downmix(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels as usize)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}
