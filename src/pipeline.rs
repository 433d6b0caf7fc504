//! The end-to-end run: source → filter → sectionize → summarize → consolidate → assemble.
//!
//! Everything except leaf summarization runs sequentially within a run. Leaf windows are
//! dispatched concurrently through the engine; consolidation starts once every leaf has
//! settled, so each parent sees its complete set of children.

use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::Result;
use crate::assemble::{PipelineResult, RunMeta, assemble};
use crate::backend::GenerationBackend;
use crate::consolidate::Consolidator;
use crate::filter::{ExcludedRange, filter};
use crate::opts::{Opts, WindowPlan};
use crate::progress::{Phase, Progress};
use crate::sections::{Window, sectionize};
use crate::segments::MAX_TIMESTAMP;
use crate::source::SegmentSource;
use crate::stats::{PhaseTimings, RunStats};
use crate::summary::SummaryEngine;
use crate::video::{VideoInfo, VideoRef};

/// A configured pipeline. Construction validates the options and takes ownership of the
/// generation backend; one pipeline may serve many runs.
pub struct Pipeline {
    plan: WindowPlan,
    source: SegmentSource,
    engine: SummaryEngine,
}

impl Pipeline {
    /// Fails with [`crate::Error::Configuration`] before anything is fetched or generated.
    pub fn new(opts: &Opts, source: SegmentSource, backend: GenerationBackend) -> Result<Self> {
        let plan = opts.validate()?;
        let engine = SummaryEngine::new(backend, opts)?;
        Ok(Self { plan, source, engine })
    }

    pub fn engine(&self) -> &SummaryEngine {
        &self.engine
    }

    /// Run the whole pipeline for one video.
    ///
    /// Only a missing transcript aborts the run ([`crate::Error::SourceUnavailable`], or
    /// [`crate::Error::Cancelled`] if cancellation arrives first). Once a transcript exists
    /// the run always produces a result; backend failures and cancellation show up as
    /// `Failed` units inside it.
    pub async fn run(
        &self,
        info: &VideoInfo,
        excluded: &[ExcludedRange],
        cancel: &CancellationToken,
        progress: &dyn Progress,
    ) -> Result<PipelineResult> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline", video = %info.id, %run_id);
        self.run_inner(run_id, info, excluded, cancel, progress)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        info: &VideoInfo,
        excluded: &[ExcludedRange],
        cancel: &CancellationToken,
        progress: &dyn Progress,
    ) -> Result<PipelineResult> {
        let video = VideoRef::from(info);
        let calls_before = self.engine.calls_issued();

        if let Err(err) = self.engine.health_check().await {
            warn!(
                backend = self.engine.backend_name(),
                error = %err,
                "generation backend failed its health check"
            );
        }
        if let Err(err) = self.source.health_check().await {
            warn!(error = %err, "transcription backend failed its health check");
        }

        let started = Instant::now();
        let transcript = self.source.fetch(info, cancel, progress).await?;
        let source_elapsed = started.elapsed();

        let duration = video.duration.filter(|d| {
            let plausible = *d <= MAX_TIMESTAMP;
            if !plausible {
                warn!(duration = *d, "ignoring implausible video duration");
            }
            plausible
        });
        let filtered = filter(transcript.segments, excluded);
        let parents = sectionize(filtered.clone(), self.plan, duration)?;

        let mut spans = Vec::with_capacity(parents.len());
        let mut leaves: Vec<Window> = Vec::new();
        for parent in parents {
            let (span, children) = parent.into_parts();
            spans.push((span, children.len()));
            leaves.extend(children);
        }
        info!(
            segments = filtered.len(),
            leaves = leaves.len(),
            parents = spans.len(),
            "transcript sectioned"
        );

        let started = Instant::now();
        progress.begin(Phase::Summaries, Some(leaves.len() as u64));
        let units = self
            .engine
            .summarize_all(leaves, cancel, |_| progress.step(Phase::Summaries))
            .await;
        progress.finish(Phase::Summaries);
        let summaries_elapsed = started.elapsed();

        let started = Instant::now();
        progress.begin(Phase::Consolidation, Some(spans.len() as u64));
        let consolidator = Consolidator::new(&self.engine);
        let mut units = units.into_iter();
        let mut hierarchy = Vec::with_capacity(spans.len());
        for (span, count) in spans {
            let children = units.by_ref().take(count).collect();
            hierarchy.push(consolidator.consolidate(span, children, cancel).await);
            progress.step(Phase::Consolidation);
        }
        progress.finish(Phase::Consolidation);
        let consolidation_elapsed = started.elapsed();

        let timings = PhaseTimings {
            source_ms: PhaseTimings::millis(source_elapsed),
            summaries_ms: PhaseTimings::millis(summaries_elapsed),
            consolidation_ms: PhaseTimings::millis(consolidation_elapsed),
        };
        let calls = self.engine.calls_issued().saturating_sub(calls_before);
        let stats = RunStats::tally(&hierarchy, calls, timings);
        info!(
            calls = stats.backend_calls,
            failed = stats.failed_units,
            skipped = stats.skipped_units,
            "run finished"
        );

        let meta = RunMeta {
            run_id,
            origin: transcript.origin,
            stats,
        };
        assemble(meta, video, filtered, hierarchy)
    }
}
