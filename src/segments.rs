//! The time-aligned transcript model.
//!
//! A `Segment` is one time-stamped unit of transcript text, in seconds from the start of the
//! video. Sources may emit overlapping segments; nothing downstream requires disjointness, only
//! ascending start order.

use serde::{Deserialize, Serialize};

/// Latest timestamp accepted anywhere in a transcript: one week, in seconds.
pub const MAX_TIMESTAMP: f64 = 7.0 * 24.0 * 3600.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl Segment {
    /// Build a segment, dropping blank text and repairing inverted or negative timestamps.
    ///
    /// Returns `None` when the text is empty after trimming or a timestamp is not finite.
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Option<Self> {
        let text = text.into();
        if text.trim().is_empty() || !start.is_finite() || !end.is_finite() {
            return None;
        }

        let start = start.max(0.0);
        let end = end.max(start);
        Some(Self { start, end, text })
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Shift both timestamps by `offset` seconds (used to rebase chunk-relative transcription).
    pub(crate) fn shifted(mut self, offset: f64) -> Self {
        self.start += offset;
        self.end += offset;
        self
    }
}

/// Put a freshly sourced sequence into canonical form.
///
/// Blank segments are dropped and the remainder is stably sorted by start, so ties keep the
/// order the source emitted them in.
pub fn normalize(segments: Vec<Segment>) -> Vec<Segment> {
    let mut out: Vec<Segment> = segments
        .into_iter()
        .filter_map(|s| Segment::new(s.start, s.end, s.text))
        .collect();
    out.sort_by(|a, b| a.start.total_cmp(&b.start));
    out
}

/// Join segment texts the way prompts expect them: single-space separated, trimmed.
pub fn join_text(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| s.text.trim())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Format seconds as `HH:MM:SS`, truncating fractional seconds.
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    format!("{h:02}:{m:02}:{s:02}")
}
