//! Removal of externally flagged time ranges (sponsor reads, intros, ...) from a transcript.
//!
//! Policy: any segment that overlaps an excluded range is dropped whole. Clipping would leave
//! half sentences behind, so we never cut a segment. Ranges are half-open; a segment that only
//! touches a range boundary is kept.
//!
//! Note that this is stricter than inclusive-end matching, which would also drop a segment
//! ending exactly where a range starts (or starting exactly where one ends). Such segments
//! survive here on purpose.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::segments::Segment;

/// An externally supplied interval to remove, e.g. a SponsorBlock entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcludedRange {
    pub start: f64,
    pub end: f64,
    pub category: String,
}

/// The record shape served by the SponsorBlock `skipSegments` API.
#[derive(Debug, Clone, Deserialize)]
pub struct SponsorBlockSegment {
    pub segment: [f64; 2],
    #[serde(default)]
    pub category: String,
}

impl From<SponsorBlockSegment> for ExcludedRange {
    fn from(raw: SponsorBlockSegment) -> Self {
        Self {
            start: raw.segment[0],
            end: raw.segment[1],
            category: raw.category,
        }
    }
}

impl ExcludedRange {
    pub fn new(start: f64, end: f64, category: impl Into<String>) -> Self {
        Self {
            start,
            end,
            category: category.into(),
        }
    }

    fn is_valid(&self) -> bool {
        self.start.is_finite() && self.end.is_finite() && self.end >= self.start
    }

    /// Whether `seg` shares any time with this range.
    ///
    /// A zero-length segment counts as overlapping when it lies inside the range.
    pub fn overlaps(&self, seg: &Segment) -> bool {
        if seg.start == seg.end {
            return self.start <= seg.start && seg.start < self.end;
        }
        seg.start < self.end && self.start < seg.end
    }
}

/// Drop every segment overlapping any excluded range.
///
/// The survivors keep their relative order, and filtering is idempotent. Invalid ranges
/// (inverted or non-finite) are ignored with a warning.
pub fn filter(segments: Vec<Segment>, excluded: &[ExcludedRange]) -> Vec<Segment> {
    let ranges: Vec<&ExcludedRange> = excluded
        .iter()
        .filter(|r| {
            let ok = r.is_valid();
            if !ok {
                warn!(
                    start = r.start,
                    end = r.end,
                    category = %r.category,
                    "ignoring invalid excluded range"
                );
            }
            ok
        })
        .collect();

    if ranges.is_empty() {
        return segments
            .into_iter()
            .filter(|s| !s.text.trim().is_empty())
            .collect();
    }

    let before = segments.len();
    let kept: Vec<Segment> = segments
        .into_iter()
        .filter(|s| !s.text.trim().is_empty())
        .filter(|s| !ranges.iter().any(|r| r.overlaps(s)))
        .collect();

    debug!(
        ranges = ranges.len(),
        dropped = before - kept.len(),
        kept = kept.len(),
        "filtered excluded ranges"
    );
    kept
}
