//! One retry policy for every backend call site.
//!
//! Attempts are bounded, delays grow exponentially and are capped, and only failures the
//! backend classified as transient are retried. Waiting between attempts observes the run's
//! cancellation token; an attempt already in progress is never interrupted.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::BackendError;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Must be at least 1.
    pub max_attempts: u32,

    #[serde(deserialize_with = "de_secs")]
    pub base_delay: Duration,

    /// Growth factor applied per failed attempt.
    pub multiplier: f64,

    #[serde(deserialize_with = "de_secs")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Why a retried operation gave up.
#[derive(Debug, Clone)]
pub enum GiveUp {
    /// Transient failures used up every attempt.
    Exhausted(BackendError),
    /// The backend reported a failure that retrying cannot fix.
    Permanent(BackendError),
    /// The run was cancelled while waiting to retry.
    Cancelled(BackendError),
}

impl GiveUp {
    pub fn error(&self) -> &BackendError {
        match self {
            GiveUp::Exhausted(err) | GiveUp::Permanent(err) | GiveUp::Cancelled(err) => err,
        }
    }
}

/// The result of a retried operation plus how many attempts it took.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, GiveUp>,
    pub attempts: u32,
}

impl RetryPolicy {
    /// A policy that retries immediately; handy for tests and local backends.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before the attempt following failed attempt number `failed_attempt` (1-based).
    pub fn delay_after(&self, failed_attempt: u32, hint: Option<Duration>) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(32) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let backoff = self
            .base_delay
            .mul_f64(factor)
            .min(self.max_delay.max(self.base_delay));
        match hint {
            Some(hint) => backoff.max(hint),
            None => backoff,
        }
    }

    /// Run `op` until it succeeds, fails permanently, runs out of attempts, or `cancel` fires
    /// between attempts. `op` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> Attempted<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match op(attempt).await {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                return Attempted {
                    result: Err(GiveUp::Permanent(err)),
                    attempts: attempt,
                };
            }
            if attempt >= max_attempts {
                return Attempted {
                    result: Err(GiveUp::Exhausted(err)),
                    attempts: attempt,
                };
            }

            let delay = self.delay_after(attempt, err.retry_after());
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "backend call failed; retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Attempted {
                        result: Err(GiveUp::Cancelled(err)),
                        attempts: attempt,
                    };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Deserialize a duration written as (fractional) seconds.
pub(crate) fn de_secs<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = f64::deserialize(deserializer)?;
    Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
}
