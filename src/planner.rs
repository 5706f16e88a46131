//! Chunk planner: splits a source duration into overlapping windows.
//!
//! ```text
//! 0          C                       D
//! |----w0----|
//!        |----w1----|
//!               |----w2---|
//!        ^ step = C − O, consecutive windows share O seconds
//! ```

use crate::error::{Result, ScribeError};
use crate::job::types::Window;

/// Tolerance when deciding that a window reaches the end of the audio.
const END_EPSILON: f64 = 1e-9;

/// Computes the chunk windows for `duration_secs` of audio.
///
/// Windows cover `[0, duration]` without gaps, start at `i · step`, and
/// consecutive windows overlap by exactly `overlap_secs` (the last one may be
/// shorter). Fails when `chunk_secs <= overlap_secs` or any input is negative
/// or not finite.
pub fn plan_windows(
    duration_secs: f64,
    chunk_secs: f64,
    overlap_secs: f64,
) -> Result<Vec<Window>> {
    if !duration_secs.is_finite() || duration_secs < 0.0 {
        return Err(ScribeError::invalid(
            "duration_secs",
            format!("{} is not a valid duration", duration_secs),
        ));
    }
    if !chunk_secs.is_finite() || !overlap_secs.is_finite() || overlap_secs < 0.0 {
        return Err(ScribeError::invalid(
            "overlap_secs",
            "chunk duration and overlap must be finite and non-negative",
        ));
    }
    if chunk_secs <= overlap_secs {
        return Err(ScribeError::invalid(
            "overlap_secs",
            format!(
                "overlap {}s must be shorter than chunk duration {}s",
                overlap_secs, chunk_secs
            ),
        ));
    }

    if duration_secs <= chunk_secs {
        return Ok(vec![Window::new(0.0, duration_secs)]);
    }

    let step = chunk_secs - overlap_secs;
    let mut windows =
        Vec::with_capacity(expected_window_count(duration_secs, chunk_secs, overlap_secs));
    let mut index = 0usize;
    loop {
        // Multiply instead of accumulating so rounding never opens a gap.
        let start = index as f64 * step;
        let end = (start + chunk_secs).min(duration_secs);
        if end >= duration_secs - END_EPSILON {
            windows.push(Window::new(start, duration_secs));
            break;
        }
        windows.push(Window::new(start, end));
        index += 1;
    }

    Ok(windows)
}

/// `⌈(D − O) / (C − O)⌉` clamped to at least one window.
pub fn expected_window_count(duration_secs: f64, chunk_secs: f64, overlap_secs: f64) -> usize {
    let step = chunk_secs - overlap_secs;
    if step <= 0.0 || duration_secs <= chunk_secs {
        return 1;
    }
    (((duration_secs - overlap_secs) / step).ceil() as usize).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_covers(windows: &[Window], duration: f64, overlap: f64) {
        assert!(!windows.is_empty());
        assert_eq!(windows[0].start_secs, 0.0);
        assert_eq!(windows[windows.len() - 1].end_secs, duration);
        for pair in windows.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            assert!(
                b.start_secs <= a.end_secs,
                "gap between {} and {}",
                a,
                b
            );
            assert!(
                (a.end_secs - b.start_secs - overlap).abs() < 1e-6,
                "{} and {} should overlap by {}",
                a,
                b,
                overlap
            );
        }
    }

    #[test]
    fn long_recording_matches_reference_windows() {
        let windows = plan_windows(1500.0, 600.0, 10.0).unwrap();
        assert_eq!(
            windows,
            vec![
                Window::new(0.0, 600.0),
                Window::new(590.0, 1190.0),
                Window::new(1180.0, 1500.0),
            ]
        );
    }

    #[test]
    fn short_audio_yields_single_window() {
        assert_eq!(
            plan_windows(42.5, 600.0, 10.0).unwrap(),
            vec![Window::new(0.0, 42.5)]
        );
        assert_eq!(
            plan_windows(600.0, 600.0, 10.0).unwrap(),
            vec![Window::new(0.0, 600.0)]
        );
    }

    #[test]
    fn zero_duration_yields_single_empty_window() {
        assert_eq!(
            plan_windows(0.0, 60.0, 0.0).unwrap(),
            vec![Window::new(0.0, 0.0)]
        );
    }

    #[test]
    fn exact_multiple_does_not_emit_trailing_sliver() {
        // (1190 − 10) / 590 = 2 exactly
        let windows = plan_windows(1190.0, 600.0, 10.0).unwrap();
        assert_eq!(
            windows,
            vec![Window::new(0.0, 600.0), Window::new(590.0, 1190.0)]
        );
    }

    #[test]
    fn zero_overlap_tiles_the_duration() {
        let windows = plan_windows(180.0, 60.0, 0.0).unwrap();
        assert_eq!(windows.len(), 3);
        assert_covers(&windows, 180.0, 0.0);
    }

    #[test]
    fn overlap_not_below_chunk_is_rejected() {
        assert!(matches!(
            plan_windows(1000.0, 60.0, 60.0),
            Err(ScribeError::ConfigInvalidValue { .. })
        ));
        assert!(plan_windows(1000.0, 30.0, 45.0).is_err());
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert!(plan_windows(-1.0, 60.0, 0.0).is_err());
        assert!(plan_windows(f64::NAN, 60.0, 0.0).is_err());
        assert!(plan_windows(100.0, f64::INFINITY, 0.0).is_err());
        assert!(plan_windows(100.0, 60.0, -5.0).is_err());
    }

    #[test]
    fn coverage_and_count_hold_across_grid() {
        for duration in (0..=7200).step_by(97).map(|d| d as f64 + 0.25) {
            for chunk in [60.0, 61.0, 300.0, 600.0, 1800.0] {
                for overlap in [0.0, 1.0, 10.0, 29.5, 30.0] {
                    let windows = plan_windows(duration, chunk, overlap).unwrap();
                    assert_eq!(
                        windows.len(),
                        expected_window_count(duration, chunk, overlap),
                        "count mismatch for D={} C={} O={}",
                        duration,
                        chunk,
                        overlap
                    );
                    assert_covers(&windows, duration, overlap);
                    let step = chunk - overlap;
                    for (i, window) in windows.iter().enumerate() {
                        assert!((window.start_secs - i as f64 * step).abs() < 1e-6);
                        assert!(window.duration_secs() <= chunk + 1e-9);
                    }
                }
            }
        }
    }
}
