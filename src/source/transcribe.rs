use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::BackendError;
use crate::progress::{Phase, Progress};
use crate::retry::{GiveUp, RetryPolicy};
use crate::segments::Segment;

use super::audio::AudioChunk;

/// Speech-to-text backend.
///
/// `transcribe` returns segments timed relative to the start of the chunk; the caller rebases
/// them onto the video timeline.
#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &str;

    async fn transcribe(&self, chunk: &AudioChunk) -> Result<Vec<Segment>, BackendError>;

    async fn health_check(&self) -> Result<(), BackendError>;
}

/// Transcribe `chunks` in order and stitch the results onto one timeline.
///
/// Each chunk gets the shared retry policy. A chunk that still fails fails the whole
/// transcription: a transcript with a silent hole would look complete when it is not.
pub(crate) async fn transcribe_chunks(
    transcriber: &dyn Transcriber,
    chunks: Vec<AudioChunk>,
    retry: &RetryPolicy,
    cancel: &CancellationToken,
    progress: &dyn Progress,
) -> Result<Vec<Segment>, GiveUp> {
    progress.begin(Phase::Transcription, Some(chunks.len() as u64));
    info!(backend = transcriber.name(), chunks = chunks.len(), "transcribing audio");

    let mut segments = Vec::new();
    for chunk in &chunks {
        if cancel.is_cancelled() {
            return Err(GiveUp::Cancelled(BackendError::permanent(
                "run cancelled during transcription",
            )));
        }
        let out = retry.run(cancel, |_| transcriber.transcribe(chunk)).await;
        let found = out.result?;
        debug!(
            chunk = chunk.index,
            offset = chunk.offset,
            segments = found.len(),
            "chunk transcribed"
        );
        segments.extend(found.into_iter().map(|s| s.shifted(chunk.offset)));
        progress.step(Phase::Transcription);
    }

    progress.finish(Phase::Transcription);
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::progress::NoProgress;
    use crate::source::audio::AudioPayload;

    /// Emits one segment per chunk at chunk-relative 1s..2s, failing the first call for chunk 1.
    struct Flaky {
        failed_once: Mutex<bool>,
    }

    #[async_trait]
    impl Transcriber for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn transcribe(&self, chunk: &AudioChunk) -> Result<Vec<Segment>, BackendError> {
            let mut failed = self.failed_once.lock().expect("lock");
            if chunk.index == 1 && !*failed {
                *failed = true;
                return Err(BackendError::transport("connection reset"));
            }
            Ok(vec![Segment::new(1.0, 2.0, format!("chunk {}", chunk.index)).expect("segment")])
        }

        async fn health_check(&self) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn chunk(index: usize) -> AudioChunk {
        AudioChunk {
            index,
            offset: index as f64 * 300.0,
            payload: AudioPayload::Pcm16kMono(Vec::new()),
        }
    }

    #[tokio::test]
    async fn segments_are_rebased_by_chunk_offset() -> anyhow::Result<()> {
        let flaky = Flaky {
            failed_once: Mutex::new(false),
        };
        let segments = transcribe_chunks(
            &flaky,
            vec![chunk(0), chunk(1), chunk(2)],
            &RetryPolicy::immediate(2),
            &CancellationToken::new(),
            &NoProgress,
        )
        .await
        .map_err(|e| anyhow::anyhow!("{}", e.error()))?;

        let starts: Vec<f64> = segments.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![1.0, 301.0, 601.0]);
        assert_eq!(segments[1].text, "chunk 1");
        Ok(())
    }

    #[tokio::test]
    async fn a_chunk_that_keeps_failing_fails_transcription() {
        let flaky = Flaky {
            failed_once: Mutex::new(false),
        };
        let res = transcribe_chunks(
            &flaky,
            vec![chunk(0), chunk(1)],
            &RetryPolicy::immediate(1),
            &CancellationToken::new(),
            &NoProgress,
        )
        .await;
        assert!(matches!(res, Err(GiveUp::Exhausted(_))));
    }
}
