use std::time::Duration;

use serde::Deserialize;

use crate::Result;
use crate::error::Error;
use crate::retry::{RetryPolicy, de_secs};

/// Options that control how a run is performed.
///
/// This struct represents *library-level configuration*, not CLI flags directly.
/// The CLI is responsible for mapping user input into this type so that:
/// - the library remains reusable outside of a CLI context
/// - other frontends (services, tests, batch jobs) can construct options programmatically
///
/// Every field has a default, so a JSON config file only needs the values it overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Opts {
    /// Leaf window length: the smallest summarization granularity.
    pub leaf_window_seconds: u32,

    /// Parent window length. Must be an integer multiple of `leaf_window_seconds`.
    pub parent_window_seconds: u32,

    /// Maximum generation calls in flight at once against one backend instance.
    pub max_in_flight: usize,

    pub retry: RetryPolicy,

    /// Timeout for a single generation call, independent of any run-level deadline.
    #[serde(deserialize_with = "de_secs")]
    pub call_timeout: Duration,

    /// Timeout for the caption download request.
    #[serde(deserialize_with = "de_secs")]
    pub caption_timeout: Duration,

    /// Upper bound on the audio duration sent to the transcription backend per call.
    pub transcription_chunk_seconds: u32,

    /// Skip captions entirely and always transcribe.
    pub force_transcription: bool,

    pub prompts: Prompts,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            leaf_window_seconds: 300,
            parent_window_seconds: 3600,
            max_in_flight: 5,
            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(60),
            caption_timeout: Duration::from_secs(30),
            transcription_chunk_seconds: 300,
            force_transcription: false,
            prompts: Prompts::default(),
        }
    }
}

impl Opts {
    /// Check every invariant that must hold before a run starts.
    ///
    /// Returns the window plan on success so callers cannot forget to validate.
    pub fn validate(&self) -> Result<WindowPlan> {
        if self.max_in_flight == 0 {
            return Err(Error::config("max_in_flight must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config("retry.max_attempts must be at least 1"));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(Error::config("retry.multiplier must be a finite value >= 1"));
        }
        if self.call_timeout.is_zero() {
            return Err(Error::config("call_timeout must be positive"));
        }
        if self.transcription_chunk_seconds == 0 {
            return Err(Error::config("transcription_chunk_seconds must be positive"));
        }
        WindowPlan::new(self.leaf_window_seconds, self.parent_window_seconds)
    }
}

/// Validated leaf/parent window durations.
///
/// Construction is the only place the ratio is checked; holding a `WindowPlan` means the
/// parent duration is an exact multiple of the leaf duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPlan {
    leaf_seconds: u32,
    parent_seconds: u32,
}

impl WindowPlan {
    pub fn new(leaf_seconds: u32, parent_seconds: u32) -> Result<Self> {
        if leaf_seconds == 0 {
            return Err(Error::config("leaf window duration must be positive"));
        }
        if parent_seconds == 0 || parent_seconds % leaf_seconds != 0 {
            return Err(Error::config(format!(
                "parent window ({parent_seconds}s) must be a positive integer multiple of the leaf window ({leaf_seconds}s)"
            )));
        }
        Ok(Self {
            leaf_seconds,
            parent_seconds,
        })
    }

    pub fn leaf_seconds(&self) -> u32 {
        self.leaf_seconds
    }

    pub fn parent_seconds(&self) -> u32 {
        self.parent_seconds
    }

    pub fn leaves_per_parent(&self) -> usize {
        (self.parent_seconds / self.leaf_seconds) as usize
    }
}

/// Prompt templates sent to the generation backend.
///
/// `{transcript}` and `{summaries}` are substituted verbatim.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Prompts {
    pub leaf: String,
    pub parent: String,

    /// Stands in for a failed leaf inside the parent prompt. `{start}`/`{end}` are `HH:MM:SS`.
    pub failed_child_note: String,

    /// Text recorded for any summary that could not be produced.
    pub unavailable: String,
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            leaf: "The following is a transcript of a section of a video.\n{transcript}\n Based on the previous transcript, describe what is happening in this section".to_owned(),
            parent: "The following is a set of summaries of sections of a video.\n{summaries}\nTake those summaries of individual sections and distill it into a consolidated summary of the entire video.".to_owned(),
            failed_child_note: "[No summary available for {start}-{end}.]".to_owned(),
            unavailable: "[No summary available.]".to_owned(),
        }
    }
}

impl Prompts {
    pub fn render_leaf(&self, transcript: &str) -> String {
        self.leaf.replace("{transcript}", transcript)
    }

    pub fn render_parent(&self, summaries: &str) -> String {
        self.parent.replace("{summaries}", summaries)
    }

    pub fn render_failed_child(&self, start: &str, end: &str) -> String {
        self.failed_child_note
            .replace("{start}", start)
            .replace("{end}", end)
    }
}
