//! Fixed-duration, content-independent windowing.
//!
//! Windows are laid out from time 0 purely by elapsed time: leaf `i` covers
//! `[i * leaf, (i + 1) * leaf)` and parent `p` owns leaves `p * k .. (p + 1) * k` where
//! `k = parent / leaf`. A segment belongs to the leaf containing its start, even when it runs
//! past the boundary. Empty leaves are kept so the structure never depends on speech density.

use serde::Serialize;

use crate::Result;
use crate::error::Error;
use crate::opts::WindowPlan;
use crate::segments::{MAX_TIMESTAMP, Segment, join_text};

/// A leaf window and the segments that start inside it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Window {
    /// Global leaf index, counted from the start of the video.
    pub index: usize,
    pub start: f64,
    pub end: f64,
    /// Not serialized: the filtered transcript already carries every segment.
    #[serde(skip_serializing)]
    pub segments: Vec<Segment>,
}

impl Window {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The window's transcript as one prompt-ready string.
    pub fn transcript(&self) -> String {
        join_text(&self.segments)
    }
}

/// A parent window: an ordered run of `leaves_per_parent` leaf windows (fewer for the last one).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParentWindow {
    pub index: usize,
    pub start: f64,
    /// Nominal end (`start + parent duration`); the final parent may extend past the video.
    pub end: f64,
    pub children: Vec<Window>,
}

impl ParentWindow {
    pub fn span(&self) -> Span {
        Span {
            index: self.index,
            start: self.start,
            end: self.end,
        }
    }

    /// Split into the parent's span and its leaf windows.
    pub fn into_parts(self) -> (Span, Vec<Window>) {
        let span = self.span();
        (span, self.children)
    }
}

/// Position of a window without its contents.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Span {
    pub index: usize,
    pub start: f64,
    pub end: f64,
}

/// Group `segments` into parent windows of leaf windows.
///
/// The timeline runs to `max(duration, last segment end)`; the final leaf is clipped to it.
/// `segments` are expected in ascending start order and that order is kept inside each window.
///
/// A timeline longer than [`MAX_TIMESTAMP`] is refused with [`Error::Invariant`] before any
/// window is allocated.
pub fn sectionize(
    segments: Vec<Segment>,
    plan: WindowPlan,
    duration: Option<f64>,
) -> Result<Vec<ParentWindow>> {
    let leaf = f64::from(plan.leaf_seconds());
    let parent = f64::from(plan.parent_seconds());

    let timeline_end = segments
        .iter()
        .map(|s| s.end)
        .chain(duration.filter(|d| d.is_finite()))
        .fold(0.0_f64, f64::max);
    if timeline_end > MAX_TIMESTAMP {
        return Err(Error::invariant(format!(
            "timeline of {timeline_end}s exceeds the {MAX_TIMESTAMP}s limit"
        )));
    }

    let leaf_count = (timeline_end / leaf).ceil() as usize;
    if leaf_count == 0 {
        // Nothing but zero-length content at t=0 (or nothing at all).
        if segments.is_empty() {
            return Ok(Vec::new());
        }
        return Ok(vec![ParentWindow {
            index: 0,
            start: 0.0,
            end: parent,
            children: vec![Window {
                index: 0,
                start: 0.0,
                end: 0.0,
                segments,
            }],
        }]);
    }

    let mut leaves: Vec<Window> = (0..leaf_count)
        .map(|i| {
            let start = i as f64 * leaf;
            Window {
                index: i,
                start,
                end: ((i + 1) as f64 * leaf).min(timeline_end),
                segments: Vec::new(),
            }
        })
        .collect();

    for seg in segments {
        // A zero-length segment sitting exactly on the timeline end belongs to the last leaf.
        let idx = ((seg.start / leaf).floor() as usize).min(leaf_count - 1);
        leaves[idx].segments.push(seg);
    }

    let per_parent = plan.leaves_per_parent();
    let mut parents = Vec::with_capacity(leaf_count.div_ceil(per_parent));
    let mut leaves = leaves.into_iter().peekable();
    while leaves.peek().is_some() {
        let index = parents.len();
        let children: Vec<Window> = leaves.by_ref().take(per_parent).collect();
        let start = index as f64 * parent;
        parents.push(ParentWindow {
            index,
            start,
            end: start + parent,
            children,
        });
    }
    Ok(parents)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, end: f64, text: &str) -> Segment {
        Segment {
            start,
            end,
            text: text.to_string(),
        }
    }

    fn sections(
        segments: Vec<Segment>,
        plan: WindowPlan,
        duration: Option<f64>,
    ) -> Vec<ParentWindow> {
        sectionize(segments, plan, duration).expect("timeline within bounds")
    }

    fn plan(leaf: u32, parent: u32) -> WindowPlan {
        WindowPlan::new(leaf, parent).expect("valid plan")
    }

    #[test]
    fn twelve_minute_video_makes_three_leaves_under_one_parent() {
        let segments = vec![seg(10.0, 20.0, "a"), seg(400.0, 410.0, "b"), seg(700.0, 705.0, "c")];
        let parents = sections(segments, plan(300, 3600), Some(720.0));

        assert_eq!(parents.len(), 1);
        let p = &parents[0];
        assert_eq!((p.start, p.end), (0.0, 3600.0));

        let spans: Vec<(f64, f64)> = p.children.iter().map(|w| (w.start, w.end)).collect();
        assert_eq!(spans, vec![(0.0, 300.0), (300.0, 600.0), (600.0, 720.0)]);
        assert_eq!(p.children[2].segments[0].text, "c");
    }

    #[test]
    fn empty_leaves_are_retained() {
        let segments = vec![seg(10.0, 20.0, "a"), seg(650.0, 660.0, "c")];
        let parents = sections(segments, plan(300, 3600), Some(720.0));
        let leaves = &parents[0].children;
        assert_eq!(leaves.len(), 3);
        assert!(leaves[1].is_empty());
    }

    #[test]
    fn boundary_spanning_segment_belongs_to_its_start_window() {
        let segments = vec![seg(295.0, 310.0, "spans")];
        let parents = sections(segments, plan(300, 600), Some(600.0));
        let leaves = &parents[0].children;
        assert_eq!(leaves[0].segments.len(), 1);
        assert!(leaves[1].is_empty());
    }

    #[test]
    fn timeline_extends_to_last_segment_when_duration_is_short_or_missing() {
        let segments = vec![seg(0.0, 5.0, "a"), seg(610.0, 650.0, "late")];
        let parents = sections(segments.clone(), plan(300, 600), Some(100.0));
        let leaves: Vec<&Window> = parents.iter().flat_map(|p| &p.children).collect();
        assert_eq!(leaves.len(), 3);
        assert_eq!(leaves[2].end, 650.0);
        assert_eq!(parents.len(), 2);

        assert_eq!(sections(segments, plan(300, 600), None).len(), 2);
    }

    #[test]
    fn no_content_and_no_duration_yields_no_windows() {
        assert!(sections(Vec::new(), plan(300, 3600), None).is_empty());
        assert!(sections(Vec::new(), plan(300, 3600), Some(0.0)).is_empty());
    }

    #[test]
    fn windows_exist_for_silent_videos_of_known_duration() {
        let parents = sections(Vec::new(), plan(300, 600), Some(900.0));
        let leaves: Vec<&Window> = parents.iter().flat_map(|p| &p.children).collect();
        assert_eq!(leaves.len(), 3);
        assert!(leaves.iter().all(|w| w.is_empty()));
    }

    #[test]
    fn every_leaf_maps_to_exactly_one_parent_and_children_tile_the_parent() {
        for leaf in [60_u32, 300, 450] {
            for k in 1_u32..=5 {
                for duration in [1.0, 59.0, 300.0, 1234.5, 7200.0, 10_001.0] {
                    let plan = plan(leaf, leaf * k);
                    let parents = sections(Vec::new(), plan, Some(duration));

                    let mut next_leaf = 0;
                    for (pi, p) in parents.iter().enumerate() {
                        assert_eq!(p.index, pi);
                        assert!(p.children.len() <= k as usize);
                        assert_eq!(p.children[0].start, p.start, "first child starts the parent");
                        for pair in p.children.windows(2) {
                            assert_eq!(pair[0].end, pair[1].start, "no gaps or overlaps");
                        }
                        for child in &p.children {
                            assert_eq!(child.index, next_leaf);
                            assert!(child.start >= p.start && child.end <= p.end);
                            next_leaf += 1;
                        }
                        let last = p.children.last().expect("non-empty parent");
                        let covered = p.end.min(duration);
                        assert_eq!(last.end, covered, "children cover the parent span");
                    }
                    assert_eq!(next_leaf, (duration / f64::from(leaf)).ceil() as usize);
                }
            }
        }
    }

    #[test]
    fn segment_order_is_preserved_within_windows() {
        let segments: Vec<Segment> = (0..50)
            .map(|i| seg(f64::from(i) * 13.0, f64::from(i) * 13.0 + 20.0, &format!("s{i}")))
            .collect();
        let parents = sections(segments.clone(), plan(60, 120), None);
        let flattened: Vec<Segment> = parents
            .into_iter()
            .flat_map(|p| p.children)
            .flat_map(|w| w.segments)
            .collect();
        assert_eq!(flattened, segments);
    }

    #[test]
    fn absurd_timestamps_are_refused_without_allocating() {
        let late = vec![seg(1e15, 1e15 + 1.0, "late")];
        assert!(matches!(
            sectionize(late, plan(300, 3600), None),
            Err(Error::Invariant(_))
        ));
        assert!(matches!(
            sectionize(Vec::new(), plan(300, 3600), Some(1e18)),
            Err(Error::Invariant(_))
        ));
    }

    #[test]
    fn a_week_long_timeline_is_still_windowed() {
        let parents = sections(Vec::new(), plan(300, 3600), Some(MAX_TIMESTAMP));
        assert_eq!(parents.len(), 7 * 24);
    }
}
