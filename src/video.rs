// src/video.rs
//! Video metadata enrichment via the YouTube Data API.
//!
//! Only duration, channel attribution, tags, and live/short classification
//! are consumed from the platform; this is deliberately not a full API
//! client. Channel sponsorship state comes from the subscription store.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::duration::parse_iso8601_duration;
use crate::error::{IngestError, IngestResult};
use crate::record::{RecordPatch, Tag};
use crate::store::SubscriptionStore;

/// Videos under five minutes are shorts.
pub const SHORT_THRESHOLD_MS: u64 = 5 * 60 * 1000;

static VIDEO_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:https?://)?(?:www\.)?(?:youtube\.com/watch\?v=|youtu\.be/|youtube\.com/embed/|youtube\.com/shorts/)([a-zA-Z0-9_-]{11})",
    )
    .expect("static regex")
});

/// Pull the 11-character video id out of any recognized watch, shorts,
/// embed, or short-link URL form.
pub fn extract_video_id(url: &str) -> Option<&str> {
    VIDEO_ID_RE
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Classify by broadcast state first, then duration.
pub fn classify(live: bool, duration_ms: u64) -> Tag {
    if live {
        Tag::Live
    } else if duration_ms < SHORT_THRESHOLD_MS {
        Tag::Short
    } else {
        Tag::None
    }
}

#[derive(Debug, Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    snippet: Option<Snippet>,
    #[serde(rename = "contentDetails")]
    content_details: Option<ContentDetails>,
}

#[derive(Debug, Deserialize)]
struct Snippet {
    #[serde(rename = "channelId", default)]
    channel_id: String,
    #[serde(rename = "channelTitle", default)]
    channel_title: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(rename = "liveBroadcastContent", default)]
    live_broadcast_content: String,
}

#[derive(Debug, Deserialize)]
struct ContentDetails {
    #[serde(default)]
    duration: String,
}

/// Enrichment derived from one video lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoEnrichment {
    /// Channel id; doubles as the subscription topic for sponsorship checks.
    pub channel_id: String,
    pub patch: RecordPatch,
}

#[derive(Clone)]
pub struct VideoEnricher {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl VideoEnricher {
    pub fn new(api_key: String, timeout: std::time::Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            api_key,
            endpoint: "https://www.googleapis.com/youtube/v3/videos".to_string(),
        }
    }

    /// Point lookups at a stand-in server; used by tests.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Look up snippet and content details for the video behind `url`.
    /// Returns `Ok(None)` when the URL is not a recognized video link;
    /// upstream failures are `UpstreamApi` errors so batch callers skip
    /// the item.
    pub async fn enrich(
        &self,
        url: &str,
        subscriptions: &dyn SubscriptionStore,
        now_ms: i64,
    ) -> IngestResult<Option<VideoEnrichment>> {
        let Some(video_id) = extract_video_id(url) else {
            return Ok(None);
        };

        let response: VideoListResponse = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("part", "snippet,contentDetails"),
                ("id", video_id),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| IngestError::UpstreamApi(e.to_string()))?
            .error_for_status()
            .map_err(|e| IngestError::UpstreamApi(e.to_string()))?
            .json()
            .await
            .map_err(|e| IngestError::UpstreamApi(e.to_string()))?;

        let Some(item) = response.items.into_iter().next() else {
            return Ok(None);
        };
        let (Some(snippet), Some(details)) = (item.snippet, item.content_details) else {
            return Ok(None);
        };

        let duration_ms = parse_iso8601_duration(&details.duration);
        let mut tag = classify(snippet.live_broadcast_content == "live", duration_ms);
        let mut email = None;

        // An unexpired sponsor subscription on the channel overrides the tag.
        if let Some(sub) = subscriptions.find_subscription(&snippet.channel_id).await? {
            if sub.email.is_some() && !sub.is_expired(now_ms) {
                tag = Tag::Ad;
                email = sub.email;
            }
        }

        debug!(video_id, channel = %snippet.channel_id, duration_ms, tag = tag.as_str(), "video enriched");

        let byline = if snippet.channel_title.is_empty() {
            "YouTube".to_string()
        } else {
            snippet.channel_title
        };

        Ok(Some(VideoEnrichment {
            channel_id: snippet.channel_id,
            patch: RecordPatch {
                byline: Some(byline),
                duration_ms: Some(duration_ms),
                keywords: Some(snippet.tags),
                tag: Some(tag),
                email,
            },
        }))
    }
}
