//! Merge engine: per-chunk transcripts into one transcript in source time.
//!
//! Handles:
//! - Conversion of window-relative segment times to global time
//! - Deduplication of segments repeated in the overlap of adjacent chunks
//! - Whisper marker removal
//! - Deterministic ordering with a chunk-order fallback

use crate::config::JobConfig;
use crate::job::types::{ChunkTranscript, MergedSegment, MergedTranscript, Window};
use std::cmp::Ordering;

/// Whisper output markers that carry no speech.
const NON_SPEECH_MARKERS: [&str; 7] = [
    "[BLANK_AUDIO]",
    "[INAUDIBLE]",
    "[MUSIC]",
    "[APPLAUSE]",
    "[LAUGHTER]",
    "(BLANK_AUDIO)",
    "(inaudible)",
];

/// Languages written without spaces between words.
const UNSPACED_LANGUAGES: [&str; 6] = ["zh", "ja", "th", "lo", "km", "my"];

/// A succeeded chunk handed to [`merge`].
#[derive(Debug, Clone, Copy)]
pub struct ChunkOutput<'a> {
    pub index: usize,
    pub window: Window,
    pub transcript: &'a ChunkTranscript,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOptions {
    /// Language hint; picks the default separator.
    pub language: Option<String>,
    pub strip_markers: bool,
    /// Overrides the language's separator.
    pub separator: Option<String>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            language: None,
            strip_markers: true,
            separator: None,
        }
    }
}

impl MergeOptions {
    pub fn from_job_config(config: &JobConfig) -> Self {
        Self {
            language: config.language_hint().map(str::to_string),
            strip_markers: config.output.strip_markers,
            separator: config.output.separator.clone(),
        }
    }

    pub fn separator(&self) -> &str {
        match &self.separator {
            Some(separator) => separator,
            None => natural_separator(self.language.as_deref()),
        }
    }
}

/// Word separator of a language code such as `"ja"` or `"zh-TW"`.
pub fn natural_separator(language: Option<&str>) -> &'static str {
    let primary = language
        .and_then(|code| code.split(['-', '_']).next())
        .map(str::to_ascii_lowercase);
    match primary {
        Some(code) if UNSPACED_LANGUAGES.contains(&code.as_str()) => "",
        _ => " ",
    }
}

/// Removes non-speech markers and collapses whitespace.
pub fn clean_text(text: &str) -> String {
    let mut cleaned = text.to_string();
    for marker in NON_SPEECH_MARKERS {
        cleaned = cleaned.replace(marker, "");
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Segment on its way through the merge.
#[derive(Debug, Clone)]
struct Candidate {
    segment: MergedSegment,
    window: Window,
    /// Position within its chunk.
    order: usize,
}

/// Merges succeeded chunk transcripts.
///
/// Chunks may arrive in any order; they are processed by index. Output is
/// identical for identical input.
pub fn merge(chunks: &[ChunkOutput<'_>], options: &MergeOptions) -> MergedTranscript {
    let mut ordered: Vec<&ChunkOutput<'_>> = chunks.iter().collect();
    ordered.sort_by_key(|chunk| chunk.index);

    let cores = core_regions(&ordered);
    let mut candidates = Vec::new();
    let mut dropped = 0usize;
    for (pos, chunk) in ordered.iter().enumerate() {
        for candidate in globalize(chunk, options) {
            if survives(&candidate.segment, pos, &ordered, &cores) {
                candidates.push(candidate);
            } else {
                dropped += 1;
            }
        }
    }

    candidates.sort_by(|a, b| {
        a.segment
            .start_secs
            .total_cmp(&b.segment.start_secs)
            .then(a.segment.chunk_index.cmp(&b.segment.chunk_index))
            .then(a.order.cmp(&b.order))
    });

    let mut degraded = false;
    if !starts_ordered(&candidates) {
        tracing::warn!(
            segments = candidates.len(),
            "merge produced out-of-order segments, falling back to chunk order"
        );
        degraded = true;
        candidates.sort_by(|a, b| {
            a.segment
                .chunk_index
                .cmp(&b.segment.chunk_index)
                .then(a.order.cmp(&b.order))
        });
        for candidate in &mut candidates {
            sanitize_times(candidate);
        }
    }

    let segments: Vec<MergedSegment> = candidates.into_iter().map(|c| c.segment).collect();
    let full_text = segments
        .iter()
        .map(|s| s.text.as_str())
        .collect::<Vec<_>>()
        .join(options.separator());
    let confidence = weighted_confidence(&segments);

    tracing::debug!(
        chunks = ordered.len(),
        segments = segments.len(),
        dropped,
        degraded,
        "merged transcript"
    );

    MergedTranscript {
        segments,
        full_text,
        confidence,
        degraded,
    }
}

/// Each chunk's core: its window cut at the midpoints of the overlaps it
/// shares with its neighbours.
fn core_regions(ordered: &[&ChunkOutput<'_>]) -> Vec<(f64, f64)> {
    (0..ordered.len())
        .map(|pos| {
            let window = ordered[pos].window;
            let start = match pos.checked_sub(1) {
                Some(prev) => (window.start_secs + ordered[prev].window.end_secs) / 2.0,
                None => window.start_secs,
            };
            let end = match ordered.get(pos + 1) {
                Some(next) => (next.window.start_secs + window.end_secs) / 2.0,
                None => window.end_secs,
            };
            (start, end)
        })
        .collect()
}

fn distance_to(point: f64, (start, end): (f64, f64)) -> f64 {
    if point < start {
        start - point
    } else if point > end {
        point - end
    } else {
        0.0
    }
}

/// Whether a segment inside an overlap belongs to its own chunk.
///
/// The copy whose chunk core lies closer to the segment midpoint wins; on a
/// tie the earlier chunk keeps it.
fn survives(
    segment: &MergedSegment,
    pos: usize,
    ordered: &[&ChunkOutput<'_>],
    cores: &[(f64, f64)],
) -> bool {
    let window = ordered[pos].window;
    let midpoint = (segment.start_secs + segment.end_secs) / 2.0;
    let own = distance_to(midpoint, cores[pos]);

    if let Some(prev) = pos.checked_sub(1) {
        let overlap = Window::new(window.start_secs, ordered[prev].window.end_secs);
        if overlap.contains(segment.start_secs, segment.end_secs)
            && own >= distance_to(midpoint, cores[prev])
        {
            return false;
        }
    }

    if let Some(next) = ordered.get(pos + 1) {
        let overlap = Window::new(next.window.start_secs, window.end_secs);
        if overlap.contains(segment.start_secs, segment.end_secs)
            && own > distance_to(midpoint, cores[pos + 1])
        {
            return false;
        }
    }

    true
}

/// Converts a chunk's segments to global time and cleans their text.
fn globalize(chunk: &ChunkOutput<'_>, options: &MergeOptions) -> Vec<Candidate> {
    let window = chunk.window;
    let clean = |text: &str| {
        if options.strip_markers {
            clean_text(text)
        } else {
            text.trim().to_string()
        }
    };

    let mut candidates: Vec<Candidate> = chunk
        .transcript
        .segments
        .iter()
        .filter_map(|segment| {
            let text = clean(&segment.text);
            if text.is_empty() {
                return None;
            }
            let start_secs =
                (window.start_secs + segment.start_secs).clamp(window.start_secs, window.end_secs);
            let end_secs = (window.start_secs + segment.end_secs)
                .clamp(window.start_secs, window.end_secs)
                .max(start_secs);
            Some(MergedSegment {
                start_secs,
                end_secs,
                text,
                confidence: segment.confidence.clamp(0.0, 1.0),
                chunk_index: chunk.index,
            })
        })
        .enumerate()
        .map(|(order, segment)| Candidate {
            segment,
            window,
            order,
        })
        .collect();

    if chunk.transcript.segments.is_empty() {
        let text = clean(&chunk.transcript.full_text);
        if !text.is_empty() {
            candidates.push(Candidate {
                segment: MergedSegment {
                    start_secs: window.start_secs,
                    end_secs: window.end_secs,
                    text,
                    confidence: chunk.transcript.confidence.clamp(0.0, 1.0),
                    chunk_index: chunk.index,
                },
                window,
                order: 0,
            });
        }
    }

    candidates
}

fn starts_ordered(candidates: &[Candidate]) -> bool {
    candidates.windows(2).all(|pair| {
        pair[0].segment.start_secs.partial_cmp(&pair[1].segment.start_secs)
            != Some(Ordering::Greater)
            && pair[0].segment.start_secs.is_finite()
            && pair[1].segment.start_secs.is_finite()
    })
}

fn sanitize_times(candidate: &mut Candidate) {
    let segment = &mut candidate.segment;
    if !segment.start_secs.is_finite() {
        segment.start_secs = candidate.window.start_secs;
    }
    if !segment.end_secs.is_finite() || segment.end_secs < segment.start_secs {
        segment.end_secs = candidate.window.end_secs.max(segment.start_secs);
    }
    if !segment.confidence.is_finite() {
        segment.confidence = 0.0;
    }
}

/// Duration-weighted mean, by text length when every segment is instantaneous.
fn weighted_confidence(segments: &[MergedSegment]) -> f32 {
    if segments.is_empty() {
        return 0.0;
    }
    let weigh = |weight: fn(&MergedSegment) -> f64| {
        let total: f64 = segments.iter().map(weight).sum();
        (total > 0.0).then(|| {
            segments
                .iter()
                .map(|s| s.confidence as f64 * weight(s))
                .sum::<f64>()
                / total
        })
    };

    weigh(|s| (s.end_secs - s.start_secs).max(0.0))
        .or_else(|| weigh(|s| s.text.chars().count() as f64))
        .unwrap_or(0.0) as f32
}
