//! Final result assembly.
//!
//! Assembly is pure: it arranges what the earlier stages produced and checks that the pieces
//! line up. A mismatch here is a bug in this crate, so it is reported as
//! [`Error::Invariant`] instead of being papered over.

use serde::Serialize;
use uuid::Uuid;

use crate::Result;
use crate::consolidate::ConsolidatedSummary;
use crate::error::Error;
use crate::segments::Segment;
use crate::source::TranscriptOrigin;
use crate::stats::RunStats;
use crate::video::VideoRef;

/// Where a summary starts, as a label and a link into the video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Anchor {
    pub label: String,
    pub link: String,
}

impl Anchor {
    fn at(video: &VideoRef, seconds: f64) -> Self {
        Self {
            label: video.timestamp_label(seconds),
            link: video.deep_link(seconds),
        }
    }
}

/// One parent window ready for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct Section {
    #[serde(flatten)]
    pub summary: ConsolidatedSummary,
    pub anchor: Anchor,
    /// One anchor per child, in child order.
    pub child_anchors: Vec<Anchor>,
}

/// Run-level facts that are not part of the summary hierarchy itself.
#[derive(Debug, Clone)]
pub struct RunMeta {
    pub run_id: Uuid,
    pub origin: TranscriptOrigin,
    pub stats: RunStats,
}

/// Everything an external renderer needs.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub run_id: Uuid,
    pub video: VideoRef,
    pub origin: TranscriptOrigin,
    /// The full filtered transcript, in order.
    pub transcript: Vec<Segment>,
    pub hierarchy: Vec<Section>,
    pub stats: RunStats,
    /// True only when every leaf and parent carries a genuine summary (or was skipped).
    pub complete: bool,
}

impl PipelineResult {
    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

/// Build the final result, checking the structural invariants along the way.
pub fn assemble(
    meta: RunMeta,
    video: VideoRef,
    transcript: Vec<Segment>,
    hierarchy: Vec<ConsolidatedSummary>,
) -> Result<PipelineResult> {
    if let Some(pair) = transcript.windows(2).find(|p| p[1].start < p[0].start) {
        return Err(Error::invariant(format!(
            "transcript out of order: {} after {}",
            pair[1].start, pair[0].start
        )));
    }

    let mut next_leaf = 0;
    for (position, section) in hierarchy.iter().enumerate() {
        check_section(position, section, &mut next_leaf)?;
    }

    let complete = hierarchy.iter().all(|s| s.complete);
    let hierarchy = hierarchy
        .into_iter()
        .map(|summary| Section {
            anchor: Anchor::at(&video, summary.parent.start),
            child_anchors: summary
                .children
                .iter()
                .map(|c| Anchor::at(&video, c.window.start))
                .collect(),
            summary,
        })
        .collect();

    Ok(PipelineResult {
        run_id: meta.run_id,
        video,
        origin: meta.origin,
        transcript,
        hierarchy,
        stats: meta.stats,
        complete,
    })
}

fn check_section(
    position: usize,
    section: &ConsolidatedSummary,
    next_leaf: &mut usize,
) -> Result<()> {
    let parent = section.parent;
    if parent.index != position {
        return Err(Error::invariant(format!(
            "parent window {} found at position {position}",
            parent.index
        )));
    }
    if section.children.is_empty() {
        return Err(Error::invariant(format!("parent window {} has no children", parent.index)));
    }

    for child in &section.children {
        let w = &child.window;
        if w.index != *next_leaf {
            return Err(Error::invariant(format!(
                "leaf window {} found where {} was expected",
                w.index, next_leaf
            )));
        }
        if w.start < parent.start || w.end > parent.end {
            return Err(Error::invariant(format!(
                "leaf window {} [{}, {}) outside parent {} [{}, {})",
                w.index, w.start, w.end, parent.index, parent.start, parent.end
            )));
        }
        *next_leaf += 1;
    }

    if let Some(pair) = section.children.windows(2).find(|p| p[0].window.end != p[1].window.start) {
        return Err(Error::invariant(format!(
            "gap or overlap between leaf windows {} and {}",
            pair[0].window.index, pair[1].window.index
        )));
    }

    let any_failed =
        section.status.is_failed() || section.children.iter().any(|c| c.status.is_failed());
    if section.complete == any_failed {
        return Err(Error::invariant(format!(
            "parent window {} completeness flag disagrees with its units",
            parent.index
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sections::{Span, Window};
    use crate::summary::{FailureKind, SummaryUnit, UnitStatus};
    use crate::video::Platform;

    fn video() -> VideoRef {
        VideoRef {
            platform: Platform::Youtube,
            ..VideoRef::new("abc", "https://www.youtube.com/watch?v=abc")
        }
    }

    fn meta() -> RunMeta {
        RunMeta {
            run_id: Uuid::nil(),
            origin: TranscriptOrigin::Captions {
                language: "en".to_owned(),
            },
            stats: RunStats::default(),
        }
    }

    fn unit(index: usize, status: UnitStatus) -> SummaryUnit {
        let start = index as f64 * 300.0;
        SummaryUnit {
            window: Window {
                index,
                start,
                end: start + 300.0,
                segments: Vec::new(),
            },
            text: "summary".to_owned(),
            status,
            attempts: 1,
        }
    }

    fn section(index: usize, children: Vec<SummaryUnit>) -> ConsolidatedSummary {
        let complete = children.iter().all(|c| !c.status.is_failed());
        ConsolidatedSummary {
            parent: Span {
                index,
                start: index as f64 * 600.0,
                end: (index + 1) as f64 * 600.0,
            },
            overall: "overall".to_owned(),
            status: UnitStatus::Ok,
            attempts: 1,
            children,
            complete,
        }
    }

    #[test]
    fn assembles_anchors_and_completeness() -> anyhow::Result<()> {
        let failed = UnitStatus::Failed {
            kind: FailureKind::Exhausted,
            reason: "timeout".to_owned(),
        };
        let hierarchy = vec![
            section(0, vec![unit(0, UnitStatus::Ok), unit(1, UnitStatus::Ok)]),
            section(1, vec![unit(2, failed)]),
        ];
        let transcript = vec![Segment::new(1.0, 2.0, "hi").expect("segment")];

        let result = assemble(meta(), video(), transcript, hierarchy)?;
        assert!(!result.is_complete());
        assert!(result.hierarchy[0].summary.complete);
        assert_eq!(result.hierarchy[1].anchor.label, "00:10:00");
        assert_eq!(
            result.hierarchy[0].child_anchors[1].link,
            "https://www.youtube.com/watch?v=abc&t=300"
        );
        assert_eq!(result.transcript.len(), 1);
        Ok(())
    }

    #[test]
    fn rejects_index_mismatch() {
        let hierarchy = vec![section(0, vec![unit(0, UnitStatus::Ok), unit(2, UnitStatus::Ok)])];
        assert!(matches!(
            assemble(meta(), video(), Vec::new(), hierarchy),
            Err(Error::Invariant(_))
        ));

        let hierarchy = vec![section(1, vec![unit(0, UnitStatus::Ok)])];
        assert!(matches!(
            assemble(meta(), video(), Vec::new(), hierarchy),
            Err(Error::Invariant(_))
        ));
    }

    #[test]
    fn rejects_child_outside_parent() {
        let units = vec![
            unit(0, UnitStatus::Ok),
            unit(1, UnitStatus::Ok),
            unit(2, UnitStatus::Ok),
        ];
        let hierarchy = vec![section(0, units)];
        assert!(matches!(
            assemble(meta(), video(), Vec::new(), hierarchy),
            Err(Error::Invariant(_))
        ));
    }

    #[test]
    fn rejects_unordered_transcript() {
        let transcript = vec![
            Segment::new(5.0, 6.0, "late").expect("segment"),
            Segment::new(1.0, 2.0, "early").expect("segment"),
        ];
        assert!(matches!(
            assemble(meta(), video(), transcript, Vec::new()),
            Err(Error::Invariant(_))
        ));
    }

    #[test]
    fn empty_run_is_complete() -> anyhow::Result<()> {
        let result = assemble(meta(), video(), Vec::new(), Vec::new())?;
        assert!(result.is_complete());
        assert!(result.hierarchy.is_empty());
        Ok(())
    }
}
