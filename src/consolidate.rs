//! Parent-level consolidation of leaf summaries.
//!
//! A parent summary is only ever built from genuine leaf summaries. Failed leaves show up in
//! the parent prompt as an explicit "no summary available" note for their time range, so the
//! backend is never asked to paper over missing content, and a parent with nothing genuine to
//! work from is marked failed without a backend call.

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::retry::GiveUp;
use crate::sections::Span;
use crate::segments::format_timestamp;
use crate::summary::{FailureKind, SkipReason, SummaryEngine, SummaryUnit, UnitStatus};

/// A parent window's narrative plus the leaf units it was built from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsolidatedSummary {
    pub parent: Span,
    pub overall: String,
    pub status: UnitStatus,
    /// Backend calls issued for the parent-level summary itself.
    pub attempts: u32,
    /// Leaf units in window-index order.
    pub children: Vec<SummaryUnit>,
    /// False whenever the parent or any child is a placeholder instead of a real summary.
    pub complete: bool,
}

impl ConsolidatedSummary {
    fn new(
        parent: Span,
        overall: String,
        status: UnitStatus,
        attempts: u32,
        children: Vec<SummaryUnit>,
    ) -> Self {
        let complete = !status.is_failed() && children.iter().all(|c| !c.status.is_failed());
        Self {
            parent,
            overall,
            status,
            attempts,
            children,
            complete,
        }
    }

    pub fn failed_children(&self) -> usize {
        self.children.iter().filter(|c| c.status.is_failed()).count()
    }
}

/// Merges finished leaf units into one [`ConsolidatedSummary`] per parent window.
///
/// Parent calls go through the same engine (gate, retry, timeout) as leaf calls.
pub struct Consolidator<'a> {
    engine: &'a SummaryEngine,
}

impl<'a> Consolidator<'a> {
    pub fn new(engine: &'a SummaryEngine) -> Self {
        Self { engine }
    }

    /// Consolidate one parent window.
    ///
    /// `children` must be the parent's complete set of leaf units, already settled (Ok, Failed
    /// or Skipped) and in window-index order.
    pub async fn consolidate(
        &self,
        parent: Span,
        children: Vec<SummaryUnit>,
        cancel: &CancellationToken,
    ) -> ConsolidatedSummary {
        let prompts = self.engine.prompts();
        let ok = children.iter().filter(|c| c.status.is_ok()).count();
        let failed = children.iter().filter(|c| c.status.is_failed()).count();

        if ok == 0 {
            if failed == 0 {
                debug!(parent = parent.index, "no speech in parent window");
                let status = UnitStatus::Skipped {
                    reason: SkipReason::EmptyInput,
                };
                return ConsolidatedSummary::new(parent, String::new(), status, 0, children);
            }

            error!(
                parent = parent.index,
                failed,
                "every child summary failed; nothing to consolidate"
            );
            let status = UnitStatus::Failed {
                kind: FailureKind::NoInput,
                reason: format!("all {failed} child summaries failed"),
            };
            let overall = prompts.unavailable.clone();
            return ConsolidatedSummary::new(parent, overall, status, 0, children);
        }

        // A lone genuine summary with no gaps around it already is the parent narrative.
        if ok == 1 && failed == 0 {
            let overall = children
                .iter()
                .find(|c| c.status.is_ok())
                .map(|c| c.text.clone())
                .unwrap_or_default();
            return ConsolidatedSummary::new(parent, overall, UnitStatus::Ok, 0, children);
        }

        let body = children
            .iter()
            .filter_map(|child| match child.status {
                UnitStatus::Ok => Some(child.text.clone()),
                UnitStatus::Failed { .. } => Some(prompts.render_failed_child(
                    &format_timestamp(child.window.start),
                    &format_timestamp(child.window.end),
                )),
                UnitStatus::Skipped { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        info!(parent = parent.index, ok, failed, "consolidating parent window");
        let out = self.engine.generate(&prompts.render_parent(&body), cancel).await;

        match out.result {
            Ok(overall) => {
                ConsolidatedSummary::new(parent, overall, UnitStatus::Ok, out.attempts, children)
            }
            Err(give_up) => {
                if !matches!(give_up, GiveUp::Cancelled(_)) {
                    error!(
                        parent = parent.index,
                        error = %give_up.error(),
                        "parent summary failed"
                    );
                }
                let status = UnitStatus::from_give_up(&give_up);
                let overall = prompts.unavailable.clone();
                ConsolidatedSummary::new(parent, overall, status, out.attempts, children)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::backend::{GenerationBackend, Generator};
    use crate::error::BackendError;
    use crate::opts::{Opts, Prompts};
    use crate::retry::RetryPolicy;
    use crate::sections::Window;

    #[derive(Default)]
    struct Recorder {
        prompts: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl Generator for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn complete(&self, prompt: &str) -> Result<String, BackendError> {
            self.prompts.lock().expect("lock").push(prompt.to_owned());
            if self.fail {
                return Err(BackendError::transport("down"));
            }
            Ok("the whole story".to_owned())
        }

        async fn health_check(&self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn engine(recorder: Arc<Recorder>) -> anyhow::Result<SummaryEngine> {
        let opts = Opts {
            retry: RetryPolicy::immediate(2),
            ..Opts::default()
        };
        Ok(SummaryEngine::new(GenerationBackend::Shared(recorder), &opts)?)
    }

    fn parent() -> Span {
        Span {
            index: 0,
            start: 0.0,
            end: 3600.0,
        }
    }

    fn unit(index: usize, status: UnitStatus, text: &str) -> SummaryUnit {
        let start = index as f64 * 300.0;
        SummaryUnit {
            window: Window {
                index,
                start,
                end: start + 300.0,
                segments: Vec::new(),
            },
            text: text.to_owned(),
            status,
            attempts: 1,
        }
    }

    fn failed() -> UnitStatus {
        UnitStatus::Failed {
            kind: FailureKind::Exhausted,
            reason: "timeout".to_owned(),
        }
    }

    fn skipped() -> UnitStatus {
        UnitStatus::Skipped {
            reason: SkipReason::EmptyInput,
        }
    }

    #[tokio::test]
    async fn failed_children_become_placeholder_notes() -> anyhow::Result<()> {
        let recorder = Arc::new(Recorder::default());
        let engine = engine(recorder.clone())?;
        let children = vec![
            unit(0, UnitStatus::Ok, "intro"),
            unit(1, failed(), "[No summary available.]"),
            unit(2, UnitStatus::Ok, "demo"),
        ];

        let out = Consolidator::new(&engine)
            .consolidate(parent(), children, &CancellationToken::new())
            .await;

        assert_eq!(out.status, UnitStatus::Ok);
        assert_eq!(out.overall, "the whole story");
        assert!(!out.complete);
        assert_eq!(out.failed_children(), 1);

        let prompts = recorder.prompts.lock().expect("lock");
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("intro\n[No summary available for 00:05:00-00:10:00.]\ndemo"));
        Ok(())
    }

    #[tokio::test]
    async fn all_children_failed_marks_parent_failed_without_calling_backend() -> anyhow::Result<()>
    {
        let recorder = Arc::new(Recorder::default());
        let engine = engine(recorder.clone())?;
        let children = vec![unit(0, failed(), ""), unit(1, failed(), ""), unit(2, skipped(), "")];

        let out = Consolidator::new(&engine)
            .consolidate(parent(), children, &CancellationToken::new())
            .await;

        assert!(matches!(out.status, UnitStatus::Failed { kind: FailureKind::NoInput, .. }));
        assert_eq!(out.overall, Prompts::default().unavailable);
        assert!(recorder.prompts.lock().expect("lock").is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn silent_parent_is_skipped() -> anyhow::Result<()> {
        let recorder = Arc::new(Recorder::default());
        let engine = engine(recorder.clone())?;
        let out = Consolidator::new(&engine)
            .consolidate(parent(), vec![unit(0, skipped(), "")], &CancellationToken::new())
            .await;
        assert!(out.status.is_skipped());
        assert!(out.complete);
        assert!(recorder.prompts.lock().expect("lock").is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn single_genuine_summary_is_reused() -> anyhow::Result<()> {
        let recorder = Arc::new(Recorder::default());
        let engine = engine(recorder.clone())?;
        let children = vec![unit(0, UnitStatus::Ok, "only part"), unit(1, skipped(), "")];

        let out = Consolidator::new(&engine)
            .consolidate(parent(), children, &CancellationToken::new())
            .await;

        assert_eq!(out.overall, "only part");
        assert_eq!(out.attempts, 0);
        assert!(out.complete);
        assert!(recorder.prompts.lock().expect("lock").is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn parent_call_failure_keeps_children() -> anyhow::Result<()> {
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Recorder::default()
        });
        let engine = engine(recorder.clone())?;
        let children = vec![unit(0, UnitStatus::Ok, "a"), unit(1, UnitStatus::Ok, "b")];

        let out = Consolidator::new(&engine)
            .consolidate(parent(), children, &CancellationToken::new())
            .await;

        assert!(matches!(out.status, UnitStatus::Failed { kind: FailureKind::Exhausted, .. }));
        assert_eq!(out.attempts, 2);
        assert_eq!(out.children.len(), 2);
        assert!(out.children.iter().all(|c| c.status.is_ok()));
        assert!(!out.complete);
        Ok(())
    }
}
