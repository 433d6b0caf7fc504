//! Caption retrieval: track selection, json3 parsing, and the HTTP provider.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::CaptionError;
use crate::segments::{MAX_TIMESTAMP, Segment};
use crate::video::{CaptionFormat, VideoInfo};

/// A caption track chosen from the video's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionTrack {
    pub language: String,
    pub url: String,
    /// True for platform-generated (ASR) captions.
    pub automatic: bool,
}

/// Captions as retrieved, before normalization.
#[derive(Debug, Clone)]
pub struct Captions {
    pub language: String,
    pub segments: Vec<Segment>,
}

/// Produces timed captions for a video.
///
/// Every failure is non-fatal to the run: the caller falls back to transcription.
#[async_trait]
pub trait CaptionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, video: &VideoInfo) -> Result<Captions, CaptionError>;
}

/// Pick the caption track to download.
///
/// Manual subtitles win: the first language (in key order) starting with `en` that offers a
/// json3 rendition. Otherwise automatic captions, preferring the untranslated `en-orig` track
/// over `en`.
pub fn select_track(info: &VideoInfo) -> Option<CaptionTrack> {
    let manual = info
        .subtitles
        .iter()
        .find(|(lang, _)| lang.starts_with("en"))
        .and_then(|(lang, formats)| {
            json3_url(formats).map(|url| CaptionTrack {
                language: lang.clone(),
                url,
                automatic: false,
            })
        });
    if manual.is_some() {
        return manual;
    }

    let lang = ["en-orig", "en"]
        .into_iter()
        .find(|lang| info.automatic_captions.contains_key(*lang))?;
    let url = json3_url(&info.automatic_captions[lang])?;
    Some(CaptionTrack {
        language: lang.to_owned(),
        url,
        automatic: true,
    })
}

fn json3_url(formats: &[CaptionFormat]) -> Option<String> {
    formats
        .iter()
        .find(|f| f.ext == "json3" && !f.url.is_empty())
        .map(|f| f.url.clone())
}

#[derive(Deserialize)]
struct Json3 {
    events: Vec<Json3Event>,
}

#[derive(Deserialize)]
struct Json3Event {
    #[serde(rename = "tStartMs")]
    start_ms: Option<f64>,
    #[serde(rename = "dDurationMs", default)]
    duration_ms: Option<f64>,
    #[serde(default)]
    segs: Option<Vec<Json3Seg>>,
}

#[derive(Deserialize)]
struct Json3Seg {
    #[serde(default)]
    utf8: String,
}

/// Parse a json3 caption document into segments.
///
/// Events without text are layout-only and skipped silently; events with text but no start
/// time are skipped with a warning. A document without any usable event, or with an event timed
/// past [`MAX_TIMESTAMP`], is malformed.
pub fn parse_json3(body: &[u8]) -> Result<Vec<Segment>, CaptionError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(CaptionError::EmptyBody);
    }
    let text = std::str::from_utf8(body).map_err(|e| CaptionError::Decode(e.to_string()))?;
    let doc: Json3 =
        serde_json::from_str(text).map_err(|e| CaptionError::Malformed(e.to_string()))?;

    let mut segments = Vec::with_capacity(doc.events.len());
    for (i, event) in doc.events.into_iter().enumerate() {
        let text: String = event.segs.unwrap_or_default().into_iter().map(|s| s.utf8).collect();
        if text.trim().is_empty() {
            continue;
        }
        let Some(start_ms) = event.start_ms else {
            warn!(event = i, "caption event without tStartMs; skipping");
            continue;
        };
        let end_ms = start_ms + event.duration_ms.unwrap_or(0.0).max(0.0);
        if end_ms / 1000.0 > MAX_TIMESTAMP {
            return Err(CaptionError::Malformed(format!(
                "caption event {i} ends at {end_ms}ms, past any plausible video"
            )));
        }
        segments.extend(Segment::new(start_ms / 1000.0, end_ms / 1000.0, text.trim()));
    }

    if segments.is_empty() {
        return Err(CaptionError::Malformed("no caption event carries text".to_owned()));
    }
    Ok(segments)
}

/// Downloads the selected json3 track over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCaptions {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpCaptions {
    pub fn new(timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), timeout)
    }

    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl CaptionProvider for HttpCaptions {
    fn name(&self) -> &str {
        "http-json3"
    }

    async fn fetch(&self, video: &VideoInfo) -> Result<Captions, CaptionError> {
        let track = select_track(video).ok_or(CaptionError::NoTrack)?;
        debug!(language = %track.language, automatic = track.automatic, "downloading captions");

        let resp = self.client.get(&track.url).timeout(self.timeout).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CaptionError::Status(status.as_u16()));
        }
        let body = resp.bytes().await?;

        Ok(Captions {
            language: track.language,
            segments: parse_json3(&body)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(json: &str) -> VideoInfo {
        serde_json::from_str(json).expect("valid info json")
    }

    #[test]
    fn manual_english_subtitles_win() {
        let info = info(
            r#"{"id":"x",
                "subtitles":{"de":[{"ext":"json3","url":"de"}],"en-GB":[{"ext":"vtt","url":"v"},{"ext":"json3","url":"gb"}]},
                "automatic_captions":{"en":[{"ext":"json3","url":"auto"}]}}"#,
        );
        let track = select_track(&info).expect("track");
        assert_eq!(track.url, "gb");
        assert!(!track.automatic);
    }

    #[test]
    fn automatic_prefers_original_language_track() {
        let info = info(
            r#"{"id":"x",
                "subtitles":{"en":[{"ext":"vtt","url":"only-vtt"}]},
                "automatic_captions":{"en":[{"ext":"json3","url":"translated"}],"en-orig":[{"ext":"json3","url":"orig"}]}}"#,
        );
        let track = select_track(&info).expect("track");
        assert_eq!((track.language.as_str(), track.url.as_str()), ("en-orig", "orig"));
        assert!(track.automatic);
    }

    #[test]
    fn no_english_track_selects_nothing() {
        let info = info(r#"{"id":"x","automatic_captions":{"fr":[{"ext":"json3","url":"fr"}]}}"#);
        assert_eq!(select_track(&info), None);
    }

    #[test]
    fn parses_events_and_skips_layout_only_ones() -> anyhow::Result<()> {
        let body = br#"{"events":[
            {"tStartMs":0,"dDurationMs":120000,"id":1,"wpWinPosId":1},
            {"tStartMs":1500,"dDurationMs":2000,"segs":[{"utf8":"hello "},{"utf8":"world"}]},
            {"tStartMs":3500,"segs":[{"utf8":"\n"}]},
            {"dDurationMs":10,"segs":[{"utf8":"no start"}]},
            {"tStartMs":4000,"segs":[{"utf8":"tail"}]}
        ]}"#;
        let segments = parse_json3(body)?;
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0], Segment::new(1.5, 3.5, "hello world").expect("segment"));
        assert_eq!((segments[1].start, segments[1].end), (4.0, 4.0));
        Ok(())
    }

    #[test]
    fn failure_categories() {
        let category = |body: &[u8]| parse_json3(body).map(|_| ()).map_err(|e| e.category());
        assert_eq!(category(b""), Err("empty_body"));
        assert_eq!(category(b"  \n"), Err("empty_body"));
        assert_eq!(category(b"{\"events\": [\xff]}"), Err("decode"));
        assert_eq!(category(b"<html>blocked</html>"), Err("malformed"));
        assert_eq!(category(br#"{"wireMagic":"pb3"}"#), Err("malformed"));
        assert_eq!(category(br#"{"events":[]}"#), Err("malformed"));
    }

    #[test]
    fn out_of_range_event_times_are_malformed() {
        let late = br#"{"events":[
            {"tStartMs":0,"segs":[{"utf8":"ok"}]},
            {"tStartMs":1e18,"segs":[{"utf8":"late"}]}
        ]}"#;
        assert!(matches!(parse_json3(late), Err(CaptionError::Malformed(_))));

        let long = br#"{"events":[{"tStartMs":0,"dDurationMs":1e18,"segs":[{"utf8":"long"}]}]}"#;
        assert!(matches!(parse_json3(long), Err(CaptionError::Malformed(_))));
    }
}
