// src/social.rs
//! Social-platform ingestion: webhook tweet events and timeline pulls.
//!
//! Tweets skip page extraction entirely. They carry a fixed placeholder
//! and full-image rendition, and their keywords derive from the tweet text
//! alone.

use chrono::DateTime;
use metrics::counter;
use serde::Deserialize;
use tracing::warn;

use crate::error::{IngestError, IngestResult};
use crate::metadata::derive_keywords;
use crate::record::{truncate_with_ellipsis, CanonicalRecord, Tag, DESCRIPTION_MAX_CHARS};
use crate::store::ArticleStore;

/// Blurred-preview data URI shared by every tweet record.
pub const TWEET_PLACEHOLDER: &str = "data:image/webp;base64,UklGRqYAAABXRUJQVlA4IJoAAACQAwCdASoSAAoAPm0qkUWkIqGYBABABsSgAD4hG1FUWvyTKHAAAP79YPoLfDIpv9TX/ogTVmREI8Sv4zX8NsQPy1esqk/75c3H/xoXs4kC4kg0EkmTB1UXnuvQk/WQ4crqf6//0jTAE9E5fhSP/3YuV/WA7fBqNA//5cqf/D/Y/+fW+RBPLoCuSW2oymbMX71TAjsDFWF5TgAA";

/// Inbound notification body for tweet creation events.
#[derive(Debug, Deserialize)]
pub struct TweetNotification {
    #[serde(default)]
    pub tweet_create_events: Vec<TweetEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TweetEvent {
    pub id: u64,
    pub text: String,
    pub created_at: String,
    pub user: TweetUser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TweetUser {
    pub id: u64,
    pub screen_name: String,
}

/// Parse Twitter's `Wed Oct 10 20:19:24 +0000 2018` timestamp form.
fn parse_tweet_timestamp_ms(s: &str) -> Option<i64> {
    DateTime::parse_from_str(s, "%a %b %d %H:%M:%S %z %Y")
        .ok()
        .map(|dt| dt.timestamp_millis())
}

/// Build the canonical record for one tweet.
pub fn tweet_record(event: &TweetEvent, public_base_url: &str, is_ad: bool) -> CanonicalRecord {
    let url = format!("https://twitter.com/{}", event.user.screen_name);
    CanonicalRecord {
        source: format!("{url}/status/{}", event.id),
        title: format!("{} on X:", event.user.screen_name),
        description: truncate_with_ellipsis(&event.text, DESCRIPTION_MAX_CHARS),
        byline: "Twitter".to_string(),
        published_at: parse_tweet_timestamp_ms(&event.created_at)
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
        keywords: derive_keywords(&event.text, "", ""),
        duration_ms: 0,
        tag: if is_ad { Tag::Ad } else { Tag::None },
        placeholder_image: TWEET_PLACEHOLDER.to_string(),
        full_image_ref: format!("{public_base_url}/twitter-x.webp"),
        email: None,
        active: true,
    }
}

/// Persist a batch of tweet events, isolating failures per tweet. Returns
/// the inserted source keys in order.
pub async fn ingest_tweets(
    articles: &dyn ArticleStore,
    events: &[TweetEvent],
    public_base_url: &str,
    is_ad: bool,
) -> Vec<String> {
    let mut inserted = Vec::new();
    for event in events {
        let record = tweet_record(event, public_base_url, is_ad);
        if let Err(e) = record.validate() {
            warn!(source = %record.source, error = %e, "tweet record invalid");
            counter!("ingest_item_errors_total").increment(1);
            continue;
        }
        match articles.insert_article(&record).await {
            Ok(source) => {
                counter!("ingest_inserted_total").increment(1);
                inserted.push(source);
            }
            Err(e) => {
                warn!(source = %record.source, error = %e, "tweet insert failed");
                counter!("ingest_item_errors_total").increment(1);
            }
        }
    }
    inserted
}

#[derive(Debug, Deserialize)]
struct TimelineResponse {
    #[serde(default)]
    data: Vec<TimelineTweet>,
    includes: Option<TimelineIncludes>,
}

#[derive(Debug, Deserialize)]
struct TimelineTweet {
    id: String,
    text: String,
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TimelineIncludes {
    #[serde(default)]
    users: Vec<TimelineUser>,
}

#[derive(Debug, Deserialize)]
struct TimelineUser {
    username: String,
}

/// Pulls a user's recent tweets through the v2 timeline API.
#[derive(Clone)]
pub struct TwitterTimeline {
    client: reqwest::Client,
    bearer_token: String,
    base_url: String,
}

impl TwitterTimeline {
    pub fn new(bearer_token: String, timeout: std::time::Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            bearer_token,
            base_url: "https://api.twitter.com".to_string(),
        }
    }

    /// Point lookups at a stand-in server; used by tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Fetch tweets from `user_id`'s timeline published in the last 24
    /// hours, as webhook-shaped events.
    pub async fn fetch_recent(&self, user_id: &str) -> IngestResult<Vec<TweetEvent>> {
        let start_time = (chrono::Utc::now() - chrono::Duration::hours(24))
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let url = format!("{}/2/users/{user_id}/tweets", self.base_url);
        let response: TimelineResponse = self
            .client
            .get(&url)
            .bearer_auth(&self.bearer_token)
            .query(&[
                ("tweet.fields", "author_id,created_at,id,text"),
                ("expansions", "author_id"),
                ("start_time", start_time.as_str()),
            ])
            .send()
            .await
            .map_err(|e| IngestError::UpstreamApi(e.to_string()))?
            .error_for_status()
            .map_err(|e| IngestError::UpstreamApi(e.to_string()))?
            .json()
            .await
            .map_err(|e| IngestError::UpstreamApi(e.to_string()))?;

        let username = response
            .includes
            .and_then(|i| i.users.into_iter().next())
            .map(|u| u.username)
            .ok_or_else(|| IngestError::UpstreamApi("timeline response missing user".into()))?;

        let user_id_num: u64 = user_id.parse().unwrap_or_default();
        let events = response
            .data
            .into_iter()
            .filter_map(|t| {
                Some(TweetEvent {
                    id: t.id.parse().ok()?,
                    text: t.text,
                    created_at: t.created_at.unwrap_or_default(),
                    user: TweetUser {
                        id: user_id_num,
                        screen_name: username.clone(),
                    },
                })
            })
            .collect();
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(text: &str) -> TweetEvent {
        TweetEvent {
            id: 1234567890,
            text: text.to_string(),
            created_at: "Wed Oct 10 20:19:24 +0000 2018".to_string(),
            user: TweetUser {
                id: 42,
                screen_name: "rustlang".to_string(),
            },
        }
    }

    #[test]
    fn builds_complete_record_from_event() {
        let r = tweet_record(&event("Rust 1.80 is out!"), "https://news.example.com", false);
        assert_eq!(r.source, "https://twitter.com/rustlang/status/1234567890");
        assert_eq!(r.title, "rustlang on X:");
        assert_eq!(r.byline, "Twitter");
        assert_eq!(r.full_image_ref, "https://news.example.com/twitter-x.webp");
        assert_eq!(r.published_at, 1_539_202_764_000);
        assert_eq!(r.tag, Tag::None);
        assert!(r.validate().is_ok());
        assert!(r.keywords.contains(&"rust".to_string()));
    }

    #[test]
    fn ad_flag_tags_record() {
        let r = tweet_record(&event("sponsored content"), "https://news.example.com", true);
        assert_eq!(r.tag, Tag::Ad);
    }

    #[test]
    fn long_text_is_truncated_with_ellipsis() {
        let long = "word ".repeat(100);
        let r = tweet_record(&event(&long), "https://news.example.com", false);
        assert!(r.description.len() <= DESCRIPTION_MAX_CHARS + 3);
        assert!(r.description.ends_with("..."));
    }

    #[test]
    fn unparsable_timestamp_defaults_to_now() {
        let mut e = event("hello");
        e.created_at = "not a date".to_string();
        let r = tweet_record(&e, "https://news.example.com", false);
        assert!((chrono::Utc::now().timestamp_millis() - r.published_at).abs() < 5_000);
    }

    #[test]
    fn notification_body_deserializes() {
        let body = r#"{
            "tweet_create_events": [{
                "id": 99,
                "text": "hi",
                "created_at": "Wed Oct 10 20:19:24 +0000 2018",
                "user": { "id": 7, "screen_name": "someone" }
            }]
        }"#;
        let n: TweetNotification = serde_json::from_str(body).unwrap();
        assert_eq!(n.tweet_create_events.len(), 1);
        assert_eq!(n.tweet_create_events[0].user.screen_name, "someone");
    }
}
