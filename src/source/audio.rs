//! Audio handed to transcription, split into bounded-duration chunks.
//!
//! Decoding and resampling happen upstream; sources here either already hold 16 kHz mono PCM
//! or pass pre-split encoded files straight through to a backend that accepts them.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::Result;
use crate::error::Error;

/// Sample rate expected by PCM consumers.
pub const SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, Clone)]
pub enum AudioPayload {
    /// 16 kHz mono samples in `[-1.0, 1.0]`.
    Pcm16kMono(Vec<f32>),
    /// An encoded file (mp3, m4a, ...) for backends that decode server-side.
    Encoded { file_name: String, bytes: Vec<u8> },
}

/// One bounded slice of the audio track.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub index: usize,
    /// Start of the chunk in seconds from the start of the video.
    pub offset: f64,
    pub payload: AudioPayload,
}

/// Supplies the audio track for transcription fallback.
///
/// Only called once captions have failed, so implementations may defer expensive work
/// (downloads, file reads) until then.
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Split the track into chunks no longer than `chunk_seconds`.
    async fn chunks(&self, chunk_seconds: u32) -> Result<Vec<AudioChunk>>;
}

/// In-memory 16 kHz mono PCM.
#[derive(Debug, Clone)]
pub struct PcmAudio {
    samples: Vec<f32>,
}

impl PcmAudio {
    pub fn new(samples: Vec<f32>) -> Self {
        Self { samples }
    }

    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / f64::from(SAMPLE_RATE)
    }
}

#[async_trait]
impl AudioSource for PcmAudio {
    async fn chunks(&self, chunk_seconds: u32) -> Result<Vec<AudioChunk>> {
        if chunk_seconds == 0 {
            return Err(Error::config("chunk duration must be positive"));
        }
        let per_chunk = chunk_seconds as usize * SAMPLE_RATE as usize;

        Ok(self
            .samples
            .chunks(per_chunk)
            .enumerate()
            .map(|(index, samples)| AudioChunk {
                index,
                offset: index as f64 * f64::from(chunk_seconds),
                payload: AudioPayload::Pcm16kMono(samples.to_vec()),
            })
            .collect())
    }
}

/// Audio already split into consecutive files of exactly the chunk duration (the last one may
/// be shorter), read lazily from disk.
#[derive(Debug, Clone)]
pub struct ChunkFiles {
    paths: Vec<PathBuf>,
}

impl ChunkFiles {
    pub fn new(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            paths: paths.into_iter().collect(),
        }
    }
}

#[async_trait]
impl AudioSource for ChunkFiles {
    async fn chunks(&self, chunk_seconds: u32) -> Result<Vec<AudioChunk>> {
        let mut out = Vec::with_capacity(self.paths.len());
        for (index, path) in self.paths.iter().enumerate() {
            let bytes = tokio::fs::read(path).await?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("chunk-{index}"));
            out.push(AudioChunk {
                index,
                offset: index as f64 * f64::from(chunk_seconds),
                payload: AudioPayload::Encoded { file_name, bytes },
            });
        }
        Ok(out)
    }
}
