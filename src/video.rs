//! Video identity and metadata as handed to the pipeline.
//!
//! Retrieving metadata is someone else's job (typically `yt-dlp --dump-json`); we only read the
//! handful of fields the pipeline needs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::segments::format_timestamp;

/// The hosting platform, derived from the metadata extractor name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Youtube,
    Twitch,
    Other,
}

impl Platform {
    pub fn from_extractor(extractor: &str) -> Self {
        let extractor = extractor.to_ascii_lowercase();
        if extractor.starts_with("youtube") {
            Platform::Youtube
        } else if extractor.starts_with("twitch") {
            Platform::Twitch
        } else {
            Platform::Other
        }
    }
}

/// One downloadable caption rendition.
#[derive(Debug, Clone, Deserialize)]
pub struct CaptionFormat {
    #[serde(default)]
    pub ext: String,
    #[serde(default)]
    pub url: String,
}

/// The subset of yt-dlp's info JSON we consume.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoInfo {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub webpage_url: String,
    #[serde(default)]
    pub extractor: String,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub subtitles: BTreeMap<String, Vec<CaptionFormat>>,
    #[serde(default)]
    pub automatic_captions: BTreeMap<String, Vec<CaptionFormat>>,
}

/// Identity of the video a run is about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRef {
    pub id: String,
    pub title: String,
    pub url: String,
    pub platform: Platform,
    /// Known duration in seconds, if the metadata carried one.
    pub duration: Option<f64>,
}

impl VideoRef {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            url: url.into(),
            platform: Platform::Other,
            duration: None,
        }
    }

    /// Link to `seconds` into the video, in the platform's own timestamp syntax.
    pub fn deep_link(&self, seconds: f64) -> String {
        let secs = seconds.max(0.0) as u64;
        match self.platform {
            Platform::Youtube => {
                let sep = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{sep}t={secs}", self.url)
            }
            Platform::Twitch => {
                let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
                format!("{}?t={h}h{m}m{s:02}s", self.url)
            }
            Platform::Other => self.url.clone(),
        }
    }

    pub fn timestamp_label(&self, seconds: f64) -> String {
        format_timestamp(seconds)
    }
}

impl From<&VideoInfo> for VideoRef {
    fn from(info: &VideoInfo) -> Self {
        let title = if info.title.trim().is_empty() {
            info.id.clone()
        } else {
            info.title.clone()
        };
        Self {
            id: info.id.clone(),
            title,
            url: info.webpage_url.clone(),
            platform: Platform::from_extractor(&info.extractor),
            duration: info.duration.filter(|d| d.is_finite() && *d >= 0.0),
        }
    }
}
