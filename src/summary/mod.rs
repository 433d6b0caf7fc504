//! Per-window summarization against the generation backend.
//!
//! The engine owns the backend handle and everything that protects it:
//! - an admission gate bounding calls in flight (one semaphore per backend instance)
//! - a single-writer queue when the backend is a non-reentrant local model
//! - the shared retry policy and a per-call timeout, counted from the moment a call actually
//!   reaches the backend (for a local model, when its worker picks the request up)
//!
//! Failures stay local to their window. A window whose call cannot be completed becomes a
//! `Failed` unit carrying the reason and a placeholder text; its siblings carry on.

mod queue;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::Result;
use crate::backend::{GenerationBackend, Generator};
use crate::error::{BackendError, Error};
use crate::opts::{Opts, Prompts};
use crate::retry::{Attempted, GiveUp, RetryPolicy};
use crate::sections::Window;

use queue::SerialQueue;

/// Why a unit has no genuine summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient failures exhausted the retry budget.
    Exhausted,
    /// The backend rejected the request or returned something unusable.
    Permanent,
    /// The run was cancelled before the call could complete.
    Cancelled,
    /// Every child of a parent window failed, so there was nothing to consolidate.
    NoInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// No transcript text fell inside the window.
    EmptyInput,
}

/// Outcome of one summarization unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum UnitStatus {
    Ok,
    Failed { kind: FailureKind, reason: String },
    Skipped { reason: SkipReason },
}

impl UnitStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, UnitStatus::Ok)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, UnitStatus::Failed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, UnitStatus::Skipped { .. })
    }

    pub(crate) fn from_give_up(give_up: &GiveUp) -> Self {
        let kind = match give_up {
            GiveUp::Exhausted(_) => FailureKind::Exhausted,
            GiveUp::Permanent(_) => FailureKind::Permanent,
            GiveUp::Cancelled(_) => FailureKind::Cancelled,
        };
        UnitStatus::Failed {
            kind,
            reason: give_up.error().to_string(),
        }
    }
}

/// A leaf window's summary (or the explicit reason it has none).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryUnit {
    pub window: Window,
    /// The summary on success, a placeholder on failure, empty when skipped.
    pub text: String,
    pub status: UnitStatus,
    /// Backend calls actually issued for this unit.
    pub attempts: u32,
}

/// Turns leaf windows into [`SummaryUnit`]s through the generation backend.
pub struct SummaryEngine {
    generator: Arc<dyn Generator>,
    gate: Semaphore,
    retry: RetryPolicy,
    call_timeout: Duration,
    /// The backend is a [`SerialQueue`], which enforces `call_timeout` itself.
    queued: bool,
    prompts: Prompts,
    calls: AtomicUsize,
}

impl SummaryEngine {
    /// Build an engine from validated options.
    ///
    /// A [`GenerationBackend::Local`] model is moved onto a dedicated worker thread here and is
    /// reachable only through this engine from then on.
    pub fn new(backend: GenerationBackend, opts: &Opts) -> Result<Self> {
        if opts.max_in_flight == 0 {
            return Err(Error::config("max_in_flight must be at least 1"));
        }

        let (generator, queued): (Arc<dyn Generator>, bool) = match backend {
            GenerationBackend::Shared(generator) => (generator, false),
            GenerationBackend::Local(model) => {
                (Arc::new(SerialQueue::spawn(model, opts.call_timeout)?), true)
            }
        };

        Ok(Self {
            generator,
            gate: Semaphore::new(opts.max_in_flight),
            retry: opts.retry.clone(),
            call_timeout: opts.call_timeout,
            queued,
            prompts: opts.prompts.clone(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn backend_name(&self) -> &str {
        self.generator.name()
    }

    pub fn prompts(&self) -> &Prompts {
        &self.prompts
    }

    /// Total backend calls issued so far, retries included.
    pub fn calls_issued(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub async fn health_check(&self) -> std::result::Result<(), BackendError> {
        if self.queued {
            return self.generator.health_check().await;
        }
        match tokio::time::timeout(self.call_timeout, self.generator.health_check()).await {
            Ok(res) => res,
            Err(_) => Err(BackendError::timeout("health check timed out")),
        }
    }

    /// Summarize one leaf window.
    ///
    /// Empty windows resolve to `Skipped` without touching the backend.
    pub async fn summarize(&self, window: Window, cancel: &CancellationToken) -> SummaryUnit {
        if window.is_empty() {
            return SummaryUnit {
                window,
                text: String::new(),
                status: UnitStatus::Skipped {
                    reason: SkipReason::EmptyInput,
                },
                attempts: 0,
            };
        }

        let prompt = self.prompts.render_leaf(&window.transcript());
        let out = self.generate(&prompt, cancel).await;

        match out.result {
            Ok(text) => SummaryUnit {
                window,
                text,
                status: UnitStatus::Ok,
                attempts: out.attempts,
            },
            Err(give_up) => {
                let status = UnitStatus::from_give_up(&give_up);
                if matches!(give_up, GiveUp::Cancelled(_)) {
                    debug!(window = window.index, "summary cancelled");
                } else {
                    error!(
                        window = window.index,
                        attempts = out.attempts,
                        error = %give_up.error(),
                        "window summary failed"
                    );
                }
                SummaryUnit {
                    window,
                    text: self.prompts.unavailable.clone(),
                    status,
                    attempts: out.attempts,
                }
            }
        }
    }

    /// Summarize many windows concurrently, bounded by the admission gate.
    ///
    /// `on_done` observes units in completion order; the returned units are in window-index
    /// order regardless of how the calls were scheduled.
    pub async fn summarize_all<F>(
        &self,
        windows: Vec<Window>,
        cancel: &CancellationToken,
        mut on_done: F,
    ) -> Vec<SummaryUnit>
    where
        F: FnMut(&SummaryUnit),
    {
        let mut units = Vec::with_capacity(windows.len());
        let mut pending: FuturesUnordered<_> = windows
            .into_iter()
            .map(|window| self.summarize(window, cancel))
            .collect();

        while let Some(unit) = pending.next().await {
            on_done(&unit);
            units.push(unit);
        }

        units.sort_by_key(|unit| unit.window.index);
        units
    }

    /// Run one prompt through the gate, timeout, and retry policy.
    ///
    /// Cancellation stops new calls from being issued (including calls still waiting at the
    /// gate) but never interrupts a call already in flight.
    pub(crate) async fn generate(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Attempted<String> {
        if cancel.is_cancelled() {
            return Attempted {
                result: Err(GiveUp::Cancelled(not_issued())),
                attempts: 0,
            };
        }

        let held_back = AtomicBool::new(false);
        let held_back_ref = &held_back;
        let out = self
            .retry
            .run(cancel, move |attempt| async move {
                let _permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        held_back_ref.store(true, Ordering::Relaxed);
                        return Err(not_issued());
                    }
                    permit = self.gate.acquire() => permit
                        .map_err(|_| BackendError::permanent("admission gate closed"))?,
                };

                self.calls.fetch_add(1, Ordering::Relaxed);
                debug!(attempt, backend = self.generator.name(), "issuing generation call");

                let text = self.complete_timed(prompt).await?;
                let text = text.trim();
                if text.is_empty() {
                    warn!(attempt, "backend returned an empty completion");
                    return Err(BackendError::permanent("backend returned an empty completion"));
                }
                Ok(text.to_owned())
            })
            .await;

        if held_back.load(Ordering::Relaxed) {
            return Attempted {
                result: Err(GiveUp::Cancelled(not_issued())),
                attempts: out.attempts.saturating_sub(1),
            };
        }
        out
    }

    async fn complete_timed(&self, prompt: &str) -> std::result::Result<String, BackendError> {
        if self.queued {
            return self.generator.complete(prompt).await;
        }
        tokio::time::timeout(self.call_timeout, self.generator.complete(prompt))
            .await
            .unwrap_or_else(|_| Err(call_timed_out(self.call_timeout)))
    }
}

fn not_issued() -> BackendError {
    BackendError::permanent("run cancelled before the call was issued")
}

fn call_timed_out(limit: Duration) -> BackendError {
    BackendError::timeout(format!("no completion within {}ms", limit.as_millis()))
}
