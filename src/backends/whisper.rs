//! Local whisper.cpp transcription over 16 kHz mono PCM.

use std::os::raw::{c_char, c_void};
use std::path::Path;
use std::sync::{Arc, Once};

use async_trait::async_trait;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::Result;
use crate::error::{BackendError, Error};
use crate::segments::Segment;
use crate::source::audio::{AudioChunk, AudioPayload};
use crate::source::transcribe::Transcriber;

/// A no-op log callback used to silence logs emitted by whisper.cpp.
unsafe extern "C" fn whisper_log_callback(
    _level: u32,
    _c_msg: *const c_char,
    _user_data: *mut c_void,
) {
}

fn silence_whisper_logging() {
    static INIT: Once = Once::new();

    INIT.call_once(|| unsafe {
        whisper_rs::set_log_callback(Some(whisper_log_callback), std::ptr::null_mut());
    });
}

/// Transcribes PCM chunks with a whisper.cpp model loaded once at construction.
///
/// Each chunk runs on the blocking pool with its own decoder state, so the shared context is
/// only ever read.
pub struct WhisperTranscriber {
    ctx: Arc<WhisperContext>,
    name: String,
    language: Option<String>,
}

impl WhisperTranscriber {
    pub fn load(model_path: &Path, language: Option<String>) -> Result<Self> {
        silence_whisper_logging();

        let path = model_path.to_string_lossy();
        let ctx = WhisperContext::new_with_params(&path, WhisperContextParameters::default())
            .map_err(|e| Error::config(format!("failed to load whisper model from {path}: {e}")))?;

        let name = model_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "whisper".to_owned());

        Ok(Self {
            ctx: Arc::new(ctx),
            name,
            language,
        })
    }
}

fn run_full(
    ctx: &WhisperContext,
    language: Option<&str>,
    samples: &[f32],
) -> std::result::Result<Vec<Segment>, BackendError> {
    let mut params = FullParams::new(SamplingStrategy::BeamSearch {
        beam_size: 5,
        patience: 1.0,
    });
    params.set_n_threads(num_cpus::get() as i32);
    params.set_translate(false);
    params.set_language(language);
    params.set_no_context(true);
    params.set_single_segment(false);
    params.set_print_progress(false);
    params.set_print_special(false);
    params.set_print_realtime(false);
    params.set_print_timestamps(false);

    let mut state = ctx
        .create_state()
        .map_err(|e| BackendError::permanent(format!("failed to create whisper state: {e}")))?;
    state
        .full(params, samples)
        .map_err(|e| BackendError::permanent(format!("whisper inference failed: {e}")))?;

    let mut segments = Vec::new();
    for seg in state.as_iter() {
        let text = seg
            .to_str()
            .map_err(|e| BackendError::permanent(format!("whisper produced invalid text: {e}")))?;
        // whisper timestamps are in centiseconds.
        let start = seg.start_timestamp() as f64 / 100.0;
        let end = seg.end_timestamp() as f64 / 100.0;
        segments.extend(Segment::new(start, end, text.trim()));
    }
    Ok(segments)
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    fn name(&self) -> &str {
        &self.name
    }

    async fn transcribe(
        &self,
        chunk: &AudioChunk,
    ) -> std::result::Result<Vec<Segment>, BackendError> {
        let AudioPayload::Pcm16kMono(samples) = &chunk.payload else {
            return Err(BackendError::permanent("whisper needs 16 kHz mono PCM, not encoded audio"));
        };

        let ctx = self.ctx.clone();
        let language = self.language.clone();
        let samples = samples.clone();
        tokio::task::spawn_blocking(move || run_full(&ctx, language.as_deref(), &samples))
            .await
            .map_err(|e| BackendError::permanent(format!("whisper worker failed: {e}")))?
    }

    async fn health_check(&self) -> std::result::Result<(), BackendError> {
        Ok(())
    }
}
