//! OpenAI-compatible HTTP backends (OpenAI, Groq, local servers speaking the same API).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::Generator;
use crate::error::{BackendError, classify_status};
use crate::segments::Segment;
use crate::source::audio::{AudioChunk, AudioPayload};
use crate::source::transcribe::Transcriber;
use crate::wav::encode_pcm;

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_CHAT_MODEL: &str = "llama3-8b-8192";
pub const DEFAULT_TRANSCRIPTION_MODEL: &str = "whisper-large-v3";

/// Endpoint and credentials shared by the chat and transcription clients.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub base_url: String,
    /// Sent as a bearer token when present; local servers often need none.
    pub api_key: Option<String>,
    pub model: String,
}

impl OpenAiConfig {
    pub fn groq(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: GROQ_BASE_URL.to_owned(),
            api_key: Some(api_key.into()),
            model: model.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.trim_end_matches('/'))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

/// Parse `Retry-After` given in (possibly fractional) seconds. HTTP dates are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?;
    let secs: f64 = value.trim().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}

/// Turn a non-success response into the backend taxonomy, keeping a bit of the body for logs.
async fn status_error(resp: reqwest::Response) -> BackendError {
    let status = resp.status();
    let hint = retry_after(resp.headers());
    let body = resp.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(200).collect();
    classify_status(status.as_u16(), hint, format!("HTTP {status}: {snippet}"))
}

async fn probe_models(client: &reqwest::Client, config: &OpenAiConfig) -> Result<(), BackendError> {
    let resp = config.authorize(client.get(config.url("models"))).send().await?;
    if resp.status().is_success() {
        Ok(())
    } else {
        Err(status_error(resp).await)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u64,
}

/// `/chat/completions` text generation. Safe to call concurrently.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    config: OpenAiConfig,
    tokens_used: AtomicU64,
}

impl OpenAiGenerator {
    pub fn new(config: OpenAiConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: OpenAiConfig) -> Self {
        Self {
            client,
            config,
            tokens_used: AtomicU64::new(0),
        }
    }

    /// Total tokens reported by the API across every successful call.
    pub fn tokens_used(&self) -> u64 {
        self.tokens_used.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, prompt: &str) -> Result<String, BackendError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
        };

        let resp = self
            .config
            .authorize(self.client.post(self.config.url("chat/completions")))
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::permanent(format!("unexpected chat response: {e}")))?;

        if let Some(usage) = &parsed.usage {
            let used = usage.total_tokens;
            let total = self.tokens_used.fetch_add(used, Ordering::Relaxed) + used;
            debug!(tokens = usage.total_tokens, total, "chat completion usage");
        }

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| BackendError::permanent("chat response had no message content"))
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        probe_models(&self.client, &self.config).await
    }
}

#[derive(Deserialize)]
struct VerboseTranscription {
    segments: Vec<TranscribedSegment>,
}

#[derive(Deserialize)]
struct TranscribedSegment {
    start: f64,
    end: f64,
    text: String,
}

/// `/audio/transcriptions` speech-to-text with `verbose_json` segment timings.
pub struct OpenAiTranscriber {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl OpenAiTranscriber {
    pub fn new(config: OpenAiConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: OpenAiConfig) -> Self {
        Self { client, config }
    }

    fn file_part(chunk: &AudioChunk) -> Result<Part, BackendError> {
        let part = match &chunk.payload {
            AudioPayload::Pcm16kMono(samples) => {
                let wav = encode_pcm(samples).map_err(|e| BackendError::permanent(e.to_string()))?;
                Part::bytes(wav).file_name(format!("chunk-{}.wav", chunk.index))
            }
            AudioPayload::Encoded { file_name, bytes } => {
                Part::bytes(bytes.clone()).file_name(file_name.clone())
            }
        };
        Ok(part)
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn transcribe(&self, chunk: &AudioChunk) -> Result<Vec<Segment>, BackendError> {
        let form = Form::new()
            .text("model", self.config.model.clone())
            .text("response_format", "verbose_json")
            .part("file", Self::file_part(chunk)?);

        let resp = self
            .config
            .authorize(self.client.post(self.config.url("audio/transcriptions")))
            .multipart(form)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(status_error(resp).await);
        }

        let parsed: VerboseTranscription = resp
            .json()
            .await
            .map_err(|e| {
                BackendError::permanent(format!("unexpected transcription response: {e}"))
            })?;

        debug!(
            chunk = chunk.index,
            segments = parsed.segments.len(),
            "chunk transcription received"
        );
        Ok(parsed
            .segments
            .into_iter()
            .filter_map(|s| Segment::new(s.start, s.end, s.text.trim()))
            .collect())
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        probe_models(&self.client, &self.config).await
    }
}
