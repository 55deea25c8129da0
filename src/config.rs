// src/config.rs
//! Immutable service configuration.
//!
//! Secrets, base URLs, and API keys are read once at startup and injected
//! into each component at construction; nothing reaches into the
//! environment at call sites.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::error::{IngestError, IngestResult};

const ENV_FEEDS_PATH: &str = "DEVNEWS_FEEDS_PATH";

pub const DEFAULT_HUB_URL: &str = "https://pubsubhubbub.appspot.com/";

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Key gating the mutating ingest/subscription endpoints.
    pub api_key: String,
    /// Bearer secret for the scheduled sweep endpoint.
    pub cron_secret: String,
    /// Shared secret registered with the video-platform hub; signs inbound
    /// Atom notifications (sha1 hex).
    pub youtube_hub_secret: String,
    /// YouTube Data API key for snippet/contentDetails lookups.
    pub youtube_api_key: String,
    /// Secret for the social-platform webhook (sha256 base64).
    pub twitter_api_secret: String,
    /// Bearer token for timeline pulls; optional, the pull endpoint is
    /// disabled without it.
    pub twitter_bearer_token: Option<String>,
    /// PubSubHubbub-style hub endpoint.
    pub hub_url: String,
    /// Public base URL of this service; callback URLs derive from it.
    pub public_base_url: String,
    /// Per-item timeout applied to outbound fetches and API calls.
    pub fetch_timeout: Duration,
}

impl AppConfig {
    /// Build from environment variables. Every missing secret is a
    /// `Configuration` error since no safe partial behavior exists.
    pub fn from_env() -> IngestResult<Self> {
        fn required(name: &str) -> IngestResult<String> {
            std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| IngestError::Configuration(format!("{name} is not set")))
        }

        let timeout_secs = std::env::var("DEVNEWS_FETCH_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(15);

        Ok(Self {
            api_key: required("DEVNEWS_API_KEY")?,
            cron_secret: required("DEVNEWS_CRON_SECRET")?,
            youtube_hub_secret: required("YOUTUBE_HUB_SECRET")?,
            youtube_api_key: required("YOUTUBE_API_KEY")?,
            twitter_api_secret: required("TWITTER_API_SECRET")?,
            twitter_bearer_token: std::env::var("TWITTER_BEARER_TOKEN")
                .ok()
                .filter(|v| !v.is_empty()),
            hub_url: std::env::var("DEVNEWS_HUB_URL").unwrap_or_else(|_| DEFAULT_HUB_URL.into()),
            public_base_url: std::env::var("DEVNEWS_PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "https://www.getdevnews.com".into()),
            fetch_timeout: Duration::from_secs(timeout_secs),
        })
    }

    pub fn youtube_callback_url(&self) -> String {
        format!("{}/api/webhook/youtube", self.public_base_url)
    }
}

/// Load the seed feed list from an explicit path (TOML with a `feeds`
/// array, or a bare JSON array).
pub fn load_seed_feeds_from(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading seed feeds from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_seed_feeds(&content, ext.as_str())
}

/// Load seed feeds using env var + fallbacks:
/// 1) $DEVNEWS_FEEDS_PATH
/// 2) config/feeds.toml
/// 3) config/feeds.json
pub fn load_seed_feeds_default() -> Result<Vec<String>> {
    if let Ok(p) = std::env::var(ENV_FEEDS_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_seed_feeds_from(&pb);
        }
        return Err(anyhow!("DEVNEWS_FEEDS_PATH points to non-existent path"));
    }
    let toml_p = PathBuf::from("config/feeds.toml");
    if toml_p.exists() {
        return load_seed_feeds_from(&toml_p);
    }
    let json_p = PathBuf::from("config/feeds.json");
    if json_p.exists() {
        return load_seed_feeds_from(&json_p);
    }
    Ok(Vec::new())
}

fn parse_seed_feeds(s: &str, hint_ext: &str) -> Result<Vec<String>> {
    let try_toml = hint_ext == "toml" || s.contains("feeds");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = parse_json(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported seed feed format"))
}

fn parse_toml(s: &str) -> Result<Vec<String>> {
    #[derive(serde::Deserialize)]
    struct FeedsFile {
        feeds: Vec<String>,
    }
    let v: FeedsFile = toml::from_str(s)?;
    Ok(clean_list(v.feeds))
}

fn parse_json(s: &str) -> Result<Vec<String>> {
    let v: Vec<String> = serde_json::from_str(s)?;
    Ok(clean_list(v))
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    use std::collections::BTreeSet;
    let mut set = BTreeSet::new();
    for it in items {
        let t = it.trim();
        if !t.is_empty() {
            set.insert(t.to_string());
        }
    }
    set.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_trim_and_formats_work() {
        let toml = r#"feeds = [" https://a.example/feed ", "", "https://b.example/rss", "https://b.example/rss"]"#;
        let json = r#"["https://c.example/feed", "  https://b.example/rss  ", ""]"#;
        let toml_out = parse_toml(toml).unwrap();
        assert_eq!(
            toml_out,
            vec![
                "https://a.example/feed".to_string(),
                "https://b.example/rss".to_string()
            ]
        );
        let json_out = parse_json(json).unwrap();
        assert_eq!(
            json_out,
            vec![
                "https://b.example/rss".to_string(),
                "https://c.example/feed".to_string()
            ]
        );
    }

    #[test]
    fn unsupported_format_errors() {
        assert!(parse_seed_feeds("not a list", "txt").is_err());
    }

    #[test]
    fn loads_feeds_from_a_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feeds.toml");
        fs::write(&path, r#"feeds = ["https://a.example/feed"]"#).unwrap();
        let feeds = load_seed_feeds_from(&path).unwrap();
        assert_eq!(feeds, vec!["https://a.example/feed".to_string()]);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_seed_feeds_from(Path::new("/nonexistent/feeds.toml")).is_err());
    }
}
