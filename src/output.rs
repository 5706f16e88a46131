//! Shared rendering for terminal output.
//! Used by `chunkscribe transcribe`, `follow` and `status`.

use crate::job::events::JobEvent;
use crate::job::types::{JobProgress, JobStatus, MergedTranscript, Progress, Window};
use std::time::Duration;

const DIM: &str = "\x1b[2m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

const BAR_WIDTH: usize = 24;

/// Clear the current terminal line (replaces the progress bar).
pub fn clear_line() {
    eprint!("\r\x1b[2K");
}

/// Return the ANSI color code for a segment confidence.
fn confidence_color(confidence: f32) -> &'static str {
    if confidence >= 0.9 {
        GREEN
    } else if confidence >= 0.7 {
        "" // default terminal color
    } else if confidence >= 0.5 {
        YELLOW
    } else {
        RED
    }
}

fn status_color(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Completed => GREEN,
        JobStatus::Failed => RED,
        JobStatus::Cancelling | JobStatus::Cancelled => YELLOW,
        _ => "",
    }
}

/// `HH:MM:SS.mmm` for a position in the source audio.
pub fn format_timestamp(secs: f64) -> String {
    let millis = (secs.max(0.0) * 1000.0).round() as u64;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        millis / 3_600_000,
        millis / 60_000 % 60,
        millis / 1000 % 60,
        millis % 1000
    )
}

/// Fixed-width bar such as `[######------]`.
pub fn progress_bar(percent: f64, width: usize) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * width as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

fn format_eta(eta_ms: Option<u64>) -> String {
    match eta_ms {
        // Whole seconds read better than humantime's millisecond tail.
        Some(ms) => format!(
            "eta {}",
            humantime::format_duration(Duration::from_secs(ms.div_ceil(1000)))
        ),
        None => "eta --".to_string(),
    }
}

fn progress_line(status: JobStatus, progress: &Progress) -> String {
    format!(
        "{} {:5.1}%  {}/{} chunks  {}  {DIM}{}{RESET}",
        progress_bar(progress.percent, BAR_WIDTH),
        progress.percent,
        progress.chunks_completed,
        progress.chunks_total,
        format_eta(progress.eta_ms),
        status
    )
}

/// Multi-line summary for `chunkscribe status`.
pub fn format_progress(progress: &JobProgress) -> String {
    let mut out = String::new();
    let color = status_color(progress.status);
    out.push_str(&format!("Job {}\n", progress.job_id));
    out.push_str(&format!(
        "  {DIM}Status:{RESET}   {color}{}{RESET}\n",
        progress.status
    ));
    out.push_str(&format!(
        "  {DIM}Progress:{RESET} {} {:.1}% ({}/{} chunks)\n",
        progress_bar(progress.percent, BAR_WIDTH),
        progress.percent,
        progress.chunks_completed,
        progress.chunks_total
    ));
    out.push_str(&format!(
        "  {DIM}Elapsed:{RESET}  {}\n",
        humantime::format_duration(Duration::from_secs(progress.elapsed_ms / 1000))
    ));
    if !progress.status.is_terminal() {
        out.push_str(&format!(
            "  {DIM}ETA:{RESET}      {}\n",
            format_eta(progress.eta_ms)
        ));
    }
    if let Some(error) = &progress.error {
        out.push_str(&format!("  {DIM}Error:{RESET}    {RED}{}{RESET}\n", error));
    }
    out
}

/// Render one job event to stderr.
///
/// Progress redraws the current line; chunk changes are only shown when
/// `verbose`; the terminal event ends the line.
pub fn render_event(event: &JobEvent, verbose: bool) {
    match event {
        JobEvent::Progress {
            status, progress, ..
        } => {
            clear_line();
            eprint!("{}", progress_line(*status, progress));
        }
        JobEvent::ChunkStateChanged {
            chunk_index,
            status,
            attempts,
            ..
        } => {
            if verbose {
                clear_line();
                eprintln!("{DIM}chunk {chunk_index}: {status:?} (attempt {attempts}){RESET}");
            }
        }
        JobEvent::Terminal { status, error, .. } => {
            clear_line();
            let color = status_color(*status);
            match error {
                Some(error) => eprintln!("{color}{status}{RESET}: {error}"),
                None => eprintln!("{color}{status}{RESET}"),
            }
        }
    }
}

/// Transcript text, optionally one timestamped line per segment.
///
/// `color` tints each segment by confidence.
pub fn format_transcript(transcript: &MergedTranscript, timestamps: bool, color: bool) -> String {
    if !timestamps {
        return transcript.full_text.clone();
    }

    let mut out = String::new();
    for segment in &transcript.segments {
        out.push_str(&format!(
            "[{} --> {}] ",
            format_timestamp(segment.start_secs),
            format_timestamp(segment.end_secs)
        ));
        let tint = if color {
            confidence_color(segment.confidence)
        } else {
            ""
        };
        if tint.is_empty() {
            out.push_str(&format!("{}\n", segment.text));
        } else {
            out.push_str(&format!("{tint}{}{RESET}\n", segment.text));
        }
    }
    out
}

/// Table of planned windows for `chunkscribe plan`.
pub fn format_windows(windows: &[Window]) -> String {
    let mut out = String::new();
    for (index, window) in windows.iter().enumerate() {
        out.push_str(&format!(
            "{:>4}  {} --> {}  ({:.1}s)\n",
            index,
            format_timestamp(window.start_secs),
            format_timestamp(window.end_secs),
            window.duration_secs()
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{JobError, JobErrorCode};
    use crate::job::types::{JobId, MergedSegment};

    fn segment(start_secs: f64, end_secs: f64, text: &str, confidence: f32) -> MergedSegment {
        MergedSegment {
            start_secs,
            end_secs,
            text: text.to_string(),
            confidence,
            chunk_index: 0,
        }
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0.0), "00:00:00.000");
        assert_eq!(format_timestamp(590.25), "00:09:50.250");
        assert_eq!(format_timestamp(3723.5), "01:02:03.500");
        assert_eq!(format_timestamp(-1.0), "00:00:00.000");
    }

    #[test]
    fn test_progress_bar_bounds() {
        assert_eq!(progress_bar(0.0, 4), "[----]");
        assert_eq!(progress_bar(50.0, 4), "[##--]");
        assert_eq!(progress_bar(100.0, 4), "[####]");
        assert_eq!(progress_bar(250.0, 4), "[####]");
    }

    #[test]
    fn test_confidence_color_thresholds() {
        assert_eq!(confidence_color(0.95), GREEN);
        assert_eq!(confidence_color(0.8), "");
        assert_eq!(confidence_color(0.6), YELLOW);
        assert_eq!(confidence_color(0.1), RED);
    }

    #[test]
    fn test_format_eta() {
        assert_eq!(format_eta(None), "eta --");
        assert_eq!(format_eta(Some(80_000)), "eta 1m 20s");
        assert_eq!(format_eta(Some(1)), "eta 1s");
    }

    #[test]
    fn test_format_progress_includes_error() {
        let progress = JobProgress {
            job_id: JobId::new(),
            status: JobStatus::Failed,
            percent: 66.7,
            chunks_completed: 2,
            chunks_total: 3,
            elapsed_ms: 5_000,
            eta_ms: None,
            error: Some(JobError::for_chunk(JobErrorCode::ChunkFatal, 2, "corrupt audio")),
        };

        let text = format_progress(&progress);
        assert!(text.contains("failed"));
        assert!(text.contains("2/3 chunks"));
        assert!(text.contains("corrupt audio"));
        assert!(!text.contains("ETA"));
    }

    #[test]
    fn test_format_transcript_plain_and_timestamped() {
        let transcript = MergedTranscript {
            segments: vec![
                segment(0.0, 4.0, "hello there", 0.95),
                segment(600.0, 603.5, "general", 0.4),
            ],
            full_text: "hello there general".to_string(),
            confidence: 0.7,
            degraded: false,
        };

        assert_eq!(
            format_transcript(&transcript, false, false),
            "hello there general"
        );
        assert_eq!(
            format_transcript(&transcript, true, false),
            "[00:00:00.000 --> 00:00:04.000] hello there\n\
             [00:10:00.000 --> 00:10:03.500] general\n"
        );
        assert!(format_transcript(&transcript, true, true).contains(&format!("{RED}general{RESET}")));
    }

    #[test]
    fn test_format_windows() {
        let windows = [Window::new(0.0, 600.0), Window::new(590.0, 1190.0)];
        let text = format_windows(&windows);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "   1  00:09:50.000 --> 00:19:50.000  (600.0s)");
    }
}
