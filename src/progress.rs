use std::fmt;

/// Pipeline phases reported to a [`Progress`] observer, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Captions,
    Transcription,
    Summaries,
    Consolidation,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Captions => "captions",
            Phase::Transcription => "transcription",
            Phase::Summaries => "summaries",
            Phase::Consolidation => "consolidation",
        })
    }
}

/// Observer for long-running work.
///
/// `total` is the number of steps the phase will report, or `None` when it is not known up
/// front. Implementations must be cheap; they are called from the pipeline's own task.
pub trait Progress: Send + Sync {
    fn begin(&self, _phase: Phase, _total: Option<u64>) {}

    fn step(&self, _phase: Phase) {}

    fn finish(&self, _phase: Phase) {}
}

/// Discards every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {}
