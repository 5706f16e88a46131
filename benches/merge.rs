use chunkscribe::job::types::{ChunkTranscript, Segment, Window};
use chunkscribe::merge::{ChunkOutput, MergeOptions, merge};
use chunkscribe::planner::plan_windows;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;

const CHUNK_SECS: f64 = 600.0;
const OVERLAP_SECS: f64 = 10.0;
/// Whisper emits roughly one segment every few seconds of speech.
const SEGMENT_SECS: f64 = 4.0;

/// Synthetic transcripts for every window of a recording.
fn chunk_transcripts(duration_secs: f64) -> (Vec<Window>, Vec<ChunkTranscript>) {
    let windows = plan_windows(duration_secs, CHUNK_SECS, OVERLAP_SECS).unwrap_or_default();
    let transcripts = windows
        .iter()
        .map(|window| {
            let mut segments = Vec::new();
            let mut start = 0.0;
            while start < window.duration_secs() {
                let end = (start + SEGMENT_SECS).min(window.duration_secs());
                let absolute = window.start_secs + start;
                segments.push(Segment::new(
                    start,
                    end,
                    &format!("[NOISE] words spoken at {:.0} seconds", absolute),
                    0.85,
                ));
                start = end;
            }
            let full_text = segments
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            ChunkTranscript {
                segments,
                full_text,
                confidence: 0.85,
            }
        })
        .collect();
    (windows, transcripts)
}

fn criterion_benchmark(c: &mut Criterion) {
    let options = MergeOptions::default();
    let mut group = c.benchmark_group("merge");

    for hours in [1u32, 4, 12] {
        let (windows, transcripts) = chunk_transcripts(f64::from(hours) * 3600.0);
        let chunks: Vec<ChunkOutput<'_>> = windows
            .iter()
            .zip(&transcripts)
            .enumerate()
            .map(|(index, (window, transcript))| ChunkOutput {
                index,
                window: *window,
                transcript,
            })
            .collect();

        group.bench_with_input(
            BenchmarkId::new("hours", hours),
            &chunks,
            |b, chunks| b.iter(|| merge(black_box(chunks), black_box(&options))),
        );
    }

    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
