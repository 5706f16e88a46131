//! Job records, registry and progress events.

pub mod events;
pub mod progress;
pub mod registry;
pub mod types;

pub use events::JobEvent;
pub use progress::{ProgressPublisher, compute_progress};
pub use registry::{JobHandle, JobRegistry};
pub use types::{
    AudioDescriptor, ChunkStatus, ChunkTask, ChunkTranscript, Job, JobId, JobProgress, JobStatus,
    MergedSegment, MergedTranscript, Progress, Segment, Window,
};
