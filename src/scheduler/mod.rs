//! Chunk dispatch, retries and timeouts.

pub mod pool;
pub mod retry;

pub use pool::{ChunkOutcome, ChunkUpdate, ChunkWork, JobDispatch, WorkerPool};
pub use retry::{RetryDecision, RetryPolicy};
