//! Single-writer queue in front of a non-reentrant model.
//!
//! The model lives on one dedicated OS thread. Async callers enqueue a prompt together with a
//! oneshot reply channel and await the answer; the worker drains requests strictly in arrival
//! order, so the model never sees two calls at once and waiting callers never block a runtime
//! thread.
//!
//! The per-call timeout starts when the worker picks a request up, not when it is enqueued:
//! time spent waiting behind other requests does not count against a call. Requests whose
//! caller has already gone away are dropped unseen.

use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::call_timed_out;
use crate::backend::{Generator, LocalModel};
use crate::error::BackendError;

enum Request {
    Complete {
        prompt: String,
        started: oneshot::Sender<()>,
        reply: oneshot::Sender<Result<String, BackendError>>,
    },
    HealthCheck {
        started: oneshot::Sender<()>,
        reply: oneshot::Sender<Result<(), BackendError>>,
    },
}

/// A [`Generator`] facade over a [`LocalModel`] owned by a worker thread.
///
/// Dropping the queue closes the channel; the worker finishes the request it is on and exits.
pub(crate) struct SerialQueue {
    name: String,
    tx: mpsc::UnboundedSender<Request>,
    call_timeout: Duration,
}

impl SerialQueue {
    pub(crate) fn spawn(
        mut model: Box<dyn LocalModel>,
        call_timeout: Duration,
    ) -> std::io::Result<Self> {
        let name = model.name().to_owned();
        let (tx, mut rx) = mpsc::unbounded_channel::<Request>();

        thread::Builder::new()
            .name(format!("tldw-local-{name}"))
            .spawn(move || {
                while let Some(request) = rx.blocking_recv() {
                    match request {
                        Request::Complete { prompt, started, reply } => {
                            if reply.is_closed() {
                                debug!(model = model.name(), "caller gone; dropping request");
                                continue;
                            }
                            let _ = started.send(());
                            debug!(
                                model = model.name(),
                                prompt_chars = prompt.len(),
                                "local completion"
                            );
                            let res = model.complete(&prompt);
                            // The caller may have timed out meanwhile.
                            let _ = reply.send(res);
                        }
                        Request::HealthCheck { started, reply } => {
                            if reply.is_closed() {
                                continue;
                            }
                            let _ = started.send(());
                            let _ = reply.send(model.health_check());
                        }
                    }
                }
                debug!(model = model.name(), "local model worker stopped");
            })?;

        Ok(Self {
            name,
            tx,
            call_timeout,
        })
    }

    fn worker_gone(&self) -> BackendError {
        warn!(model = %self.name, "local model worker is not running");
        BackendError::permanent(format!("local model '{}' worker stopped", self.name))
    }

    /// Wait for the worker to pick the request up, then give it `call_timeout` to answer.
    async fn await_reply<T>(
        &self,
        started: oneshot::Receiver<()>,
        reply: oneshot::Receiver<Result<T, BackendError>>,
    ) -> Result<T, BackendError> {
        started.await.map_err(|_| self.worker_gone())?;
        match tokio::time::timeout(self.call_timeout, reply).await {
            Ok(Ok(res)) => res,
            Ok(Err(_)) => Err(self.worker_gone()),
            Err(_) => Err(call_timed_out(self.call_timeout)),
        }
    }
}

#[async_trait]
impl Generator for SerialQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, prompt: &str) -> Result<String, BackendError> {
        let (started, started_rx) = oneshot::channel();
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Complete {
                prompt: prompt.to_owned(),
                started,
                reply,
            })
            .map_err(|_| self.worker_gone())?;
        self.await_reply(started_rx, rx).await
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        let (started, started_rx) = oneshot::channel();
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::HealthCheck { started, reply })
            .map_err(|_| self.worker_gone())?;
        self.await_reply(started_rx, rx).await
    }
}
