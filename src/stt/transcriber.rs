use crate::error::TranscriptionError;
use crate::job::types::{ChunkTranscript, JobId, Segment};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Result of one adapter call.
pub type ChunkResult = std::result::Result<ChunkTranscript, TranscriptionError>;

/// Audio and hints for one chunk call.
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub job_id: JobId,
    pub chunk_index: usize,
    /// Mono 16-bit PCM covering exactly the chunk window.
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    /// Window start in source time. Returned segment times stay relative to it.
    pub offset_secs: f64,
    pub duration_secs: f64,
    /// Language hint, `None` for automatic detection.
    pub language: Option<String>,
    pub options: ChunkOptions,
}

/// Dispatch metadata an adapter may use for logging or its own deadlines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkOptions {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Deadline the scheduler enforces around the call.
    pub timeout: Duration,
}

/// Speech-to-text capability for one chunk of audio.
///
/// Implementations receive the job's cancellation token. Honouring it is
/// optional: the scheduler stops waiting on cancellation and discards any
/// result that arrives afterwards.
#[async_trait::async_trait]
pub trait ChunkTranscriber: Send + Sync {
    async fn transcribe_chunk(&self, request: ChunkRequest, cancel: CancellationToken)
    -> ChunkResult;

    /// Name of the loaded model.
    fn model_name(&self) -> &str;
}

#[async_trait::async_trait]
impl<T: ChunkTranscriber + ?Sized> ChunkTranscriber for Arc<T> {
    async fn transcribe_chunk(
        &self,
        request: ChunkRequest,
        cancel: CancellationToken,
    ) -> ChunkResult {
        (**self).transcribe_chunk(request, cancel).await
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// One scripted reply of [`MockTranscriber`].
#[derive(Debug, Clone)]
pub enum MockReply {
    Transcript(ChunkTranscript),
    Error(TranscriptionError),
}

#[derive(Debug, Default)]
struct MockState {
    scripts: Mutex<HashMap<usize, VecDeque<MockReply>>>,
    calls: Mutex<HashMap<usize, usize>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Scriptable adapter for tests and dry runs.
///
/// Without a script a chunk answers with one segment spanning its window,
/// text `"chunk <index>"`, confidence 0.9. Scripts are consumed one reply per
/// call; once a chunk's script is exhausted its last reply repeats.
#[derive(Debug, Clone)]
pub struct MockTranscriber {
    model_name: String,
    delay: Duration,
    delays: HashMap<usize, Duration>,
    state: Arc<MockState>,
}

impl Default for MockTranscriber {
    fn default() -> Self {
        Self::new("mock")
    }
}

impl MockTranscriber {
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            delay: Duration::ZERO,
            delays: HashMap::new(),
            state: Arc::new(MockState::default()),
        }
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sleep this long inside calls for one chunk.
    pub fn with_chunk_delay(mut self, chunk_index: usize, delay: Duration) -> Self {
        self.delays.insert(chunk_index, delay);
        self
    }

    /// Replies for successive calls on one chunk.
    pub fn with_script(self, chunk_index: usize, replies: Vec<MockReply>) -> Self {
        if let Ok(mut scripts) = self.state.scripts.lock() {
            scripts.insert(chunk_index, replies.into());
        }
        self
    }

    pub fn with_response(self, chunk_index: usize, transcript: ChunkTranscript) -> Self {
        self.with_script(chunk_index, vec![MockReply::Transcript(transcript)])
    }

    pub fn with_failure(self, chunk_index: usize, error: TranscriptionError) -> Self {
        self.with_script(chunk_index, vec![MockReply::Error(error)])
    }

    /// Total calls made so far.
    pub fn calls(&self) -> usize {
        self.state
            .calls
            .lock()
            .map(|calls| calls.values().sum())
            .unwrap_or(0)
    }

    /// Calls made for one chunk.
    pub fn calls_for(&self, chunk_index: usize) -> usize {
        self.state
            .calls
            .lock()
            .map(|calls| calls.get(&chunk_index).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Highest number of calls observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.state.in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, request: &ChunkRequest) -> MockReply {
        let scripted = self.state.scripts.lock().ok().and_then(|mut scripts| {
            let script = scripts.get_mut(&request.chunk_index)?;
            if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            }
        });
        scripted.unwrap_or_else(|| {
            let text = format!("chunk {}", request.chunk_index);
            MockReply::Transcript(ChunkTranscript {
                segments: vec![Segment::new(0.0, request.duration_secs, &text, 0.9)],
                full_text: text,
                confidence: 0.9,
            })
        })
    }
}

/// Decrements the in-flight counter even when the call future is dropped.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl ChunkTranscriber for MockTranscriber {
    async fn transcribe_chunk(
        &self,
        request: ChunkRequest,
        cancel: CancellationToken,
    ) -> ChunkResult {
        if let Ok(mut calls) = self.state.calls.lock() {
            *calls.entry(request.chunk_index).or_default() += 1;
        }
        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.state.in_flight);

        let delay = self
            .delays
            .get(&request.chunk_index)
            .copied()
            .unwrap_or(self.delay);
        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return Err(TranscriptionError::transient("cancelled"));
                }
            }
        }

        match self.next_reply(&request) {
            MockReply::Transcript(transcript) => Ok(transcript),
            MockReply::Error(error) => Err(error),
        }
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(chunk_index: usize) -> ChunkRequest {
        ChunkRequest {
            job_id: JobId::new(),
            chunk_index,
            samples: vec![0; 160],
            sample_rate: 16000,
            offset_secs: 0.0,
            duration_secs: 12.5,
            language: None,
            options: ChunkOptions {
                attempt: 1,
                timeout: Duration::from_secs(30),
            },
        }
    }

    #[tokio::test]
    async fn test_mock_default_reply_spans_window() {
        let transcriber = MockTranscriber::new("test-model");

        let transcript = transcriber
            .transcribe_chunk(request(4), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(transcript.full_text, "chunk 4");
        assert_eq!(transcript.segments.len(), 1);
        assert_eq!(transcript.segments[0].end_secs, 12.5);
        assert_eq!(transcriber.calls_for(4), 1);
        assert_eq!(transcriber.model_name(), "test-model");
    }

    #[tokio::test]
    async fn test_mock_script_is_consumed_then_repeats() {
        let transcriber = MockTranscriber::default().with_script(
            0,
            vec![
                MockReply::Error(TranscriptionError::transient("busy")),
                MockReply::Transcript(ChunkTranscript {
                    full_text: "hello".to_string(),
                    ..ChunkTranscript::default()
                }),
            ],
        );
        let token = CancellationToken::new();

        let first = transcriber.transcribe_chunk(request(0), token.clone()).await;
        assert_eq!(first, Err(TranscriptionError::transient("busy")));

        for _ in 0..2 {
            let next = transcriber
                .transcribe_chunk(request(0), token.clone())
                .await
                .unwrap();
            assert_eq!(next.full_text, "hello");
        }
        assert_eq!(transcriber.calls(), 3);
    }

    #[tokio::test]
    async fn test_mock_failure_repeats() {
        let transcriber =
            MockTranscriber::default().with_failure(1, TranscriptionError::fatal("bad audio"));

        for _ in 0..3 {
            let result = transcriber
                .transcribe_chunk(request(1), CancellationToken::new())
                .await;
            assert!(matches!(result, Err(e) if !e.retryable));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_honours_cancellation_during_delay() {
        let transcriber = MockTranscriber::default().with_delay(Duration::from_secs(60));
        let token = CancellationToken::new();

        let call = {
            let transcriber = transcriber.clone();
            let token = token.clone();
            tokio::spawn(async move { transcriber.transcribe_chunk(request(0), token).await })
        };
        while transcriber.in_flight() == 0 {
            tokio::task::yield_now().await;
        }

        token.cancel();
        let result = call.await.unwrap();
        assert!(result.is_err());
        assert_eq!(transcriber.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_tracks_max_in_flight() {
        let transcriber = MockTranscriber::default().with_delay(Duration::from_millis(100));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let transcriber = transcriber.clone();
                tokio::spawn(async move {
                    transcriber
                        .transcribe_chunk(request(i), CancellationToken::new())
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(transcriber.max_in_flight(), 4);
        assert_eq!(transcriber.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_arc_transcriber_delegates() {
        let transcriber: Arc<dyn ChunkTranscriber> = Arc::new(MockTranscriber::new("shared"));
        assert_eq!(transcriber.model_name(), "shared");
        let transcript = transcriber
            .transcribe_chunk(request(2), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(transcript.full_text, "chunk 2");
    }
}
