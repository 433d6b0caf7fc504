use std::time::Duration;

use serde::Serialize;

use crate::consolidate::ConsolidatedSummary;

/// Wall-clock time spent per phase, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseTimings {
    pub source_ms: u64,
    pub summaries_ms: u64,
    pub consolidation_ms: u64,
}

impl PhaseTimings {
    pub(crate) fn millis(d: Duration) -> u64 {
        u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Aggregate counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Generation calls issued, retries included.
    pub backend_calls: usize,
    /// Calls beyond the first one for any unit, leaf or parent.
    pub retries: usize,
    pub leaf_units: usize,
    pub failed_units: usize,
    pub skipped_units: usize,
    pub failed_parents: usize,
    pub timings: PhaseTimings,
}

impl RunStats {
    pub fn tally(
        hierarchy: &[ConsolidatedSummary],
        backend_calls: usize,
        timings: PhaseTimings,
    ) -> Self {
        let mut stats = RunStats {
            backend_calls,
            timings,
            ..RunStats::default()
        };

        for section in hierarchy {
            stats.retries += section.attempts.saturating_sub(1) as usize;
            if section.status.is_failed() {
                stats.failed_parents += 1;
            }
            for unit in &section.children {
                stats.leaf_units += 1;
                stats.retries += unit.attempts.saturating_sub(1) as usize;
                if unit.status.is_failed() {
                    stats.failed_units += 1;
                } else if unit.status.is_skipped() {
                    stats.skipped_units += 1;
                }
            }
        }
        stats
    }
}
