use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// tldw's crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// tldw's crate-wide error type.
///
/// This is intentionally decoupled from `anyhow` so downstream libraries aren't forced to
/// adopt `anyhow` in their own public APIs.
///
/// Only a few things can abort a run: both transcript sources failing, an invalid configuration
/// (reported before any segment is processed), or a broken assembly invariant. Backend failures
/// during summarization never surface here; they become `Failed` units instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("no transcript source available (captions: {captions}; transcription: {transcription})")]
    SourceUnavailable {
        captions: String,
        transcription: String,
    },

    /// The run was cancelled before a transcript was available.
    #[error("run cancelled before a transcript was available")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("result invariant violated: {0}")]
    Invariant(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant(message.into())
    }
}

/// Which flavour of retryable failure a backend reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    Timeout,
    RateLimited,
    Transport,
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransientKind::Timeout => "timeout",
            TransientKind::RateLimited => "rate limited",
            TransientKind::Transport => "transport",
        };
        f.write_str(name)
    }
}

/// Failure reported by a generation or transcription backend.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Retryable: timeouts, rate limits, connection resets, 5xx responses.
    #[error("transient backend failure ({kind}): {message}")]
    Transient {
        kind: TransientKind,
        message: String,
        /// Server-provided hint (e.g. `Retry-After`), honoured by the retry policy.
        retry_after: Option<Duration>,
    },

    /// Not retryable: auth failures, malformed requests, unusable responses.
    #[error("permanent backend failure: {0}")]
    Permanent(String),
}

impl BackendError {
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Transient {
            kind: TransientKind::Timeout,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self::Transient {
            kind: TransientKind::RateLimited,
            message: "too many requests".to_owned(),
            retry_after,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transient {
            kind: TransientKind::Transport,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            Self::Permanent(_) => None,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::timeout(err.to_string());
        }
        if err.is_connect() || err.is_request() || err.is_body() {
            return Self::transport(err.to_string());
        }
        if let Some(status) = err.status() {
            return classify_status(status.as_u16(), None, err.to_string());
        }
        Self::permanent(err.to_string())
    }
}

/// Map an HTTP status code onto the backend taxonomy.
pub(crate) fn classify_status(
    status: u16,
    retry_after: Option<Duration>,
    message: impl Into<String>,
) -> BackendError {
    match status {
        429 => BackendError::rate_limited(retry_after),
        408 => BackendError::timeout(message),
        500..=599 => BackendError::transport(message),
        _ => BackendError::permanent(message),
    }
}

/// Non-fatal caption retrieval failures.
///
/// Every variant triggers fallback to transcription; none of them aborts a run.
#[derive(Debug, Clone, Error)]
pub enum CaptionError {
    #[error("no caption track available")]
    NoTrack,

    #[error("caption response body was empty")]
    EmptyBody,

    #[error("caption request returned HTTP {0}")]
    Status(u16),

    #[error("caption payload was malformed: {0}")]
    Malformed(String),

    #[error("caption payload could not be decoded: {0}")]
    Decode(String),

    #[error("caption request timed out")]
    Timeout,

    #[error("caption transport failure: {0}")]
    Transport(String),

    #[error("caption retrieval failed: {0}")]
    Other(String),
}

impl CaptionError {
    /// Stable, low-cardinality name used as a log field.
    pub fn category(&self) -> &'static str {
        match self {
            CaptionError::NoTrack => "no_track",
            CaptionError::EmptyBody => "empty_body",
            CaptionError::Status(_) => "http_status",
            CaptionError::Malformed(_) => "malformed",
            CaptionError::Decode(_) => "decode",
            CaptionError::Timeout => "timeout",
            CaptionError::Transport(_) => "transport",
            CaptionError::Other(_) => "other",
        }
    }
}

impl From<reqwest::Error> for CaptionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CaptionError::Timeout
        } else if err.is_decode() {
            CaptionError::Decode(err.to_string())
        } else if err.is_connect() || err.is_request() || err.is_body() {
            CaptionError::Transport(err.to_string())
        } else if let Some(status) = err.status() {
            CaptionError::Status(status.as_u16())
        } else {
            CaptionError::Other(err.to_string())
        }
    }
}
