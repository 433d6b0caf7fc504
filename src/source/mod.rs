//! Transcript acquisition with caption → transcription fallback.
//!
//! Captions are cheap and preferred. Anything that goes wrong while getting them (no track,
//! HTTP errors, empty or malformed bodies, decode failures, timeouts) is logged with its
//! category and answered by transcribing the audio instead. Only when both routes fail does the
//! run abort with [`Error::SourceUnavailable`].
//!
//! A transcript running more than one leaf window past the video's known duration (or past
//! [`MAX_TIMESTAMP`] at all) is treated as malformed, whichever route produced it.

pub mod audio;
pub mod captions;
pub mod transcribe;

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::error::{BackendError, Error};
use crate::opts::Opts;
use crate::progress::{Phase, Progress};
use crate::retry::{GiveUp, RetryPolicy};
use crate::segments::{MAX_TIMESTAMP, Segment, normalize};
use crate::video::VideoInfo;

use audio::AudioSource;
use captions::CaptionProvider;
use transcribe::{Transcriber, transcribe_chunks};

/// Where the transcript of a run came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptOrigin {
    Captions {
        language: String,
    },
    Transcription {
        backend: String,
        /// Why captions were not used.
        caption_failure: String,
    },
}

/// A normalized transcript plus its provenance.
#[derive(Debug, Clone)]
pub struct Transcript {
    pub segments: Vec<Segment>,
    pub origin: TranscriptOrigin,
}

struct TranscriptionRoute {
    transcriber: Arc<dyn Transcriber>,
    audio: Arc<dyn AudioSource>,
}

/// Produces the ordered segment sequence for a video.
pub struct SegmentSource {
    captions: Option<Arc<dyn CaptionProvider>>,
    transcription: Option<TranscriptionRoute>,
    retry: RetryPolicy,
    chunk_seconds: u32,
    leaf_seconds: u32,
    force_transcription: bool,
}

impl SegmentSource {
    /// A source with no providers yet; add them with [`Self::with_captions`] and
    /// [`Self::with_transcription`].
    pub fn new(opts: &Opts) -> Self {
        Self {
            captions: None,
            transcription: None,
            retry: opts.retry.clone(),
            chunk_seconds: opts.transcription_chunk_seconds,
            leaf_seconds: opts.leaf_window_seconds,
            force_transcription: opts.force_transcription,
        }
    }

    pub fn with_captions(mut self, provider: impl CaptionProvider + 'static) -> Self {
        self.captions = Some(Arc::new(provider));
        self
    }

    /// Transcription fallback. Both halves are trait objects so frontends can pick them at
    /// runtime.
    pub fn with_transcription(
        mut self,
        transcriber: Arc<dyn Transcriber>,
        audio: Arc<dyn AudioSource>,
    ) -> Self {
        self.transcription = Some(TranscriptionRoute { transcriber, audio });
        self
    }

    /// Probe the transcription backend, if any. Failures are reported, not fatal.
    pub async fn health_check(&self) -> std::result::Result<(), BackendError> {
        match &self.transcription {
            Some(route) => route.transcriber.health_check().await,
            None => Ok(()),
        }
    }

    pub async fn fetch(
        &self,
        video: &VideoInfo,
        cancel: &CancellationToken,
        progress: &dyn Progress,
    ) -> Result<Transcript> {
        let caption_failure = match self.try_captions(video, progress).await {
            Ok(transcript) => return Ok(transcript),
            Err(reason) => reason,
        };

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let Some(route) = &self.transcription else {
            return Err(Error::SourceUnavailable {
                captions: caption_failure,
                transcription: "no transcription backend configured".to_owned(),
            });
        };

        let unavailable = |transcription: String| Error::SourceUnavailable {
            captions: caption_failure.clone(),
            transcription,
        };

        let chunks = route
            .audio
            .chunks(self.chunk_seconds)
            .await
            .map_err(|e| unavailable(format!("audio unavailable: {e}")))?;

        let transcribed =
            transcribe_chunks(&*route.transcriber, chunks, &self.retry, cancel, progress).await;
        let segments = match transcribed {
            Ok(segments) => segments,
            Err(GiveUp::Cancelled(_)) => return Err(Error::Cancelled),
            Err(give_up) => return Err(unavailable(give_up.error().to_string())),
        };

        let segments = normalize(segments);
        if let Some(reason) = self.overrun(&segments, video) {
            return Err(unavailable(reason));
        }
        info!(segments = segments.len(), "transcript produced by transcription");
        Ok(Transcript {
            segments,
            origin: TranscriptOrigin::Transcription {
                backend: route.transcriber.name().to_owned(),
                caption_failure,
            },
        })
    }

    /// Try captions; `Err` carries the reason they were not used.
    async fn try_captions(
        &self,
        video: &VideoInfo,
        progress: &dyn Progress,
    ) -> std::result::Result<Transcript, String> {
        if self.force_transcription {
            return Err("captions skipped: transcription forced".to_owned());
        }
        let Some(provider) = &self.captions else {
            return Err("no caption provider configured".to_owned());
        };

        progress.begin(Phase::Captions, None);
        let fetched = provider.fetch(video).await;
        progress.finish(Phase::Captions);

        match fetched {
            Ok(captions) => {
                let segments = normalize(captions.segments);
                if segments.is_empty() {
                    warn!(
                        category = "empty_body",
                        provider = provider.name(),
                        "captions contained no text; falling back to transcription"
                    );
                    return Err("captions contained no text".to_owned());
                }
                if let Some(reason) = self.overrun(&segments, video) {
                    warn!(
                        category = "malformed",
                        provider = provider.name(),
                        reason = %reason,
                        "captions do not fit the video; falling back to transcription"
                    );
                    return Err(reason);
                }
                info!(
                    segments = segments.len(),
                    language = %captions.language,
                    "transcript taken from captions"
                );
                Ok(Transcript {
                    segments,
                    origin: TranscriptOrigin::Captions {
                        language: captions.language,
                    },
                })
            }
            Err(err) => {
                warn!(
                    category = err.category(),
                    provider = provider.name(),
                    error = %err,
                    "captions unavailable; falling back to transcription"
                );
                Err(err.to_string())
            }
        }
    }

    /// Why `segments` cannot belong to `video`, if they end implausibly late.
    fn overrun(&self, segments: &[Segment], video: &VideoInfo) -> Option<String> {
        let last = segments.iter().map(|s| s.end).fold(0.0_f64, f64::max);
        let limit = match video.duration.filter(|d| d.is_finite() && *d > 0.0) {
            Some(duration) => (duration + f64::from(self.leaf_seconds)).min(MAX_TIMESTAMP),
            None => MAX_TIMESTAMP,
        };
        (last > limit).then(|| format!("transcript ends at {last:.0}s, past the {limit:.0}s limit"))
    }
}
