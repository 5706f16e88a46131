//! Speech-to-text adapters for single chunks.

pub mod transcriber;
pub mod whisper;

pub use transcriber::{
    ChunkOptions, ChunkRequest, ChunkResult, ChunkTranscriber, MockReply, MockTranscriber,
};
pub use whisper::{WhisperConfig, WhisperTranscriber};
