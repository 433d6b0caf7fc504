//! `tldw` — hierarchical summaries of long videos from their transcripts.
//!
//! A run takes a video's metadata, gets a transcript (captions first, speech-to-text as the
//! fallback), drops externally flagged ranges such as sponsor reads, cuts the timeline into
//! fixed leaf and parent windows, summarizes every leaf through a text-generation backend and
//! consolidates the leaves of each parent into one narrative.
//!
//! The library is built to keep going when its collaborators misbehave: caption failures fall
//! back to transcription, backend failures are retried and then isolated to their window, and
//! a run that has a transcript always yields a renderable [`PipelineResult`] that says which
//! parts are genuine summaries and which are placeholders.
//!
//! Start with [`Pipeline`], [`Opts`] and [`source::SegmentSource`].

// High-level API (most consumers should start here).
pub mod opts;
pub mod pipeline;

// Errors and the shared retry policy.
pub mod error;
pub mod retry;

// Transcript model and acquisition.
pub mod segments;
pub mod source;
pub mod video;
pub mod wav;

// Windowing and summarization stages.
pub mod assemble;
pub mod consolidate;
pub mod filter;
pub mod sections;
pub mod summary;

// Backend interfaces and implementations.
pub mod backend;
pub mod backends;

// Run reporting.
pub mod progress;
pub mod stats;

// Logging configuration and control.
#[cfg(feature = "logging")]
pub mod logging;

pub use assemble::PipelineResult;
pub use backend::{GenerationBackend, Generator, LocalModel};
pub use error::{BackendError, Error, Result};
pub use filter::ExcludedRange;
pub use opts::Opts;
pub use pipeline::Pipeline;
pub use segments::Segment;
pub use video::{VideoInfo, VideoRef};
