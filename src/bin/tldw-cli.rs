use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use tldw::backends::openai::{DEFAULT_CHAT_MODEL, DEFAULT_TRANSCRIPTION_MODEL, GROQ_BASE_URL};
use tldw::backends::{CommandModel, OpenAiConfig, OpenAiGenerator, OpenAiTranscriber};
use tldw::filter::SponsorBlockSegment;
use tldw::progress::{NoProgress, Phase, Progress};
use tldw::source::SegmentSource;
use tldw::source::audio::{AudioSource, ChunkFiles, PcmAudio};
use tldw::source::captions::HttpCaptions;
use tldw::source::transcribe::Transcriber;
use tldw::{ExcludedRange, GenerationBackend, Opts, Pipeline, VideoInfo};

#[tokio::main]
async fn main() -> Result<()> {
    tldw::logging::init();
    let params = Params::parse();

    let opts = build_opts(&params)?;
    let info: VideoInfo = read_json(&params.info_path).context("failed to read video info")?;
    let excluded = match &params.sponsorblock_path {
        Some(path) => {
            let raw: Vec<SponsorBlockSegment> =
                read_json(path).context("failed to read excluded ranges")?;
            raw.into_iter().map(ExcludedRange::from).collect()
        }
        None => Vec::new(),
    };

    let mut source =
        SegmentSource::new(&opts).with_captions(HttpCaptions::new(opts.caption_timeout));
    if let Some(audio) = audio_source(&params)? {
        source = source.with_transcription(transcriber(&params)?, audio);
    }

    let pipeline = Pipeline::new(&opts, source, generation_backend(&params)?)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; finishing calls in flight and writing a partial result");
            on_signal.cancel();
        }
    });

    let progress: Box<dyn Progress> = if params.progress {
        Box::new(BarProgress::new())
    } else {
        Box::new(NoProgress)
    };

    let result = pipeline.run(&info, &excluded, &cancel, progress.as_ref()).await?;

    let mut writer: Box<dyn Write> = match &params.output_path {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    serde_json::to_writer_pretty(&mut writer, &result)?;
    writeln!(writer)?;
    writer.flush()?;

    if !result.is_complete() {
        warn!(
            failed_units = result.stats.failed_units,
            failed_parents = result.stats.failed_parents,
            "some summaries are placeholders"
        );
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LlmProvider {
    /// Any OpenAI-compatible `/chat/completions` endpoint (Groq by default).
    Openai,
    /// A local executable reading the prompt on stdin.
    Local,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum WhisperProvider {
    /// Any OpenAI-compatible `/audio/transcriptions` endpoint (Groq by default).
    Openai,
    /// whisper.cpp in-process (requires the `whisper` feature and `--audio-wav`).
    Local,
}

#[derive(Parser, Debug)]
#[command(name = "tldw")]
#[command(about = "Summarize a long video from its captions or audio")]
struct Params {
    /// Video metadata as written by `yt-dlp --dump-json`.
    #[arg(short = 'i', long = "info")]
    info_path: PathBuf,

    /// Excluded ranges in SponsorBlock `skipSegments` format.
    #[arg(short = 's', long = "sponsorblock")]
    sponsorblock_path: Option<PathBuf>,

    /// Pre-split encoded audio chunks, in order, each `--chunk-seconds` long.
    #[arg(long = "audio-chunk", conflicts_with = "audio_wav")]
    audio_chunks: Vec<PathBuf>,

    /// The whole audio track as 16 kHz mono 16-bit WAV.
    #[arg(long = "audio-wav")]
    audio_wav: Option<PathBuf>,

    /// Library options as JSON; flags below override it.
    #[arg(short = 'c', long = "config")]
    config_path: Option<PathBuf>,

    #[arg(long = "llm", value_enum, default_value_t = LlmProvider::Openai)]
    llm: LlmProvider,

    #[arg(long = "llm-base-url", default_value = GROQ_BASE_URL)]
    llm_base_url: String,

    #[arg(long = "llm-model", default_value = DEFAULT_CHAT_MODEL)]
    llm_model: String,

    /// Executable for `--llm local`.
    #[arg(long = "local-command")]
    local_command: Option<PathBuf>,

    /// Argument passed to the local executable (repeatable).
    #[arg(long = "local-arg", allow_hyphen_values = true)]
    local_args: Vec<String>,

    #[arg(long = "whisper", value_enum, default_value_t = WhisperProvider::Openai)]
    whisper: WhisperProvider,

    #[arg(long = "whisper-base-url", default_value = GROQ_BASE_URL)]
    whisper_base_url: String,

    #[arg(long = "whisper-model", default_value = DEFAULT_TRANSCRIPTION_MODEL)]
    whisper_model: String,

    /// ggml model file for `--whisper local`.
    #[arg(long = "whisper-model-path")]
    whisper_model_path: Option<PathBuf>,

    #[arg(long = "force-transcription", default_value_t = false)]
    force_transcription: bool,

    #[arg(long = "chunk-seconds")]
    chunk_seconds: Option<u32>,

    #[arg(long = "leaf-seconds")]
    leaf_seconds: Option<u32>,

    #[arg(long = "parent-seconds")]
    parent_seconds: Option<u32>,

    #[arg(long = "max-in-flight")]
    max_in_flight: Option<usize>,

    /// Write the JSON result here instead of stdout.
    #[arg(short = 'o', long = "output")]
    output_path: Option<PathBuf>,

    /// Show progress bars on stderr.
    #[arg(short = 'p', long = "progress", default_value_t = false)]
    progress: bool,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("invalid JSON in {}", path.display()))
}

fn build_opts(params: &Params) -> Result<Opts> {
    let mut opts: Opts = match &params.config_path {
        Some(path) => read_json(path)?,
        None => Opts::default(),
    };
    if let Some(v) = params.leaf_seconds {
        opts.leaf_window_seconds = v;
    }
    if let Some(v) = params.parent_seconds {
        opts.parent_window_seconds = v;
    }
    if let Some(v) = params.max_in_flight {
        opts.max_in_flight = v;
    }
    if let Some(v) = params.chunk_seconds {
        opts.transcription_chunk_seconds = v;
    }
    opts.force_transcription |= params.force_transcription;
    Ok(opts)
}

fn api_key() -> Option<String> {
    ["OPENAI_API_KEY", "GROQ_API_KEY"]
        .into_iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|key| key.trim().to_owned())
        .find(|key| !key.is_empty())
}

fn generation_backend(params: &Params) -> Result<GenerationBackend> {
    Ok(match params.llm {
        LlmProvider::Openai => GenerationBackend::shared(OpenAiGenerator::new(OpenAiConfig {
            base_url: params.llm_base_url.clone(),
            api_key: api_key(),
            model: params.llm_model.clone(),
        })),
        LlmProvider::Local => {
            let Some(program) = &params.local_command else {
                bail!("--llm local needs --local-command");
            };
            GenerationBackend::local(CommandModel::new(program, params.local_args.iter().cloned()))
        }
    })
}

fn audio_source(params: &Params) -> Result<Option<Arc<dyn AudioSource>>> {
    if let Some(path) = &params.audio_wav {
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let samples = tldw::wav::read_pcm(BufReader::new(file))?;
        return Ok(Some(Arc::new(PcmAudio::new(samples))));
    }
    if !params.audio_chunks.is_empty() {
        return Ok(Some(Arc::new(ChunkFiles::new(params.audio_chunks.iter().cloned()))));
    }
    Ok(None)
}

fn transcriber(params: &Params) -> Result<Arc<dyn Transcriber>> {
    match params.whisper {
        WhisperProvider::Openai => Ok(Arc::new(OpenAiTranscriber::new(OpenAiConfig {
            base_url: params.whisper_base_url.clone(),
            api_key: api_key(),
            model: params.whisper_model.clone(),
        }))),
        WhisperProvider::Local => local_whisper(params),
    }
}

#[cfg(feature = "whisper")]
fn local_whisper(params: &Params) -> Result<Arc<dyn Transcriber>> {
    let Some(path) = &params.whisper_model_path else {
        bail!("--whisper local needs --whisper-model-path");
    };
    Ok(Arc::new(tldw::backends::WhisperTranscriber::load(path, None)?))
}

#[cfg(not(feature = "whisper"))]
fn local_whisper(_params: &Params) -> Result<Arc<dyn Transcriber>> {
    bail!("this build has no local whisper support; rebuild with `--features whisper`")
}

/// Renders pipeline progress as a single reusable bar on stderr.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new() -> Self {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
        let template = "{spinner:.green} {msg:<14} {bar:40.cyan/blue} {pos}/{len} {elapsed}";
        if let Ok(style) = ProgressStyle::with_template(template) {
            bar.set_style(style.progress_chars("#>-"));
        }
        Self { bar }
    }
}

impl Progress for BarProgress {
    fn begin(&self, phase: Phase, total: Option<u64>) {
        self.bar.reset();
        match total {
            Some(total) => self.bar.set_length(total),
            None => self.bar.unset_length(),
        }
        self.bar.set_message(phase.to_string());
    }

    fn step(&self, _phase: Phase) {
        self.bar.inc(1);
    }

    fn finish(&self, phase: Phase) {
        self.bar.finish_with_message(format!("{phase} done"));
    }
}
