// src/metadata.rs
//! Page metadata extraction.
//!
//! Fetches a document fresh on every call (news pages change quickly, so
//! no caching) and pulls canonical fields through a fixed fallback chain:
//! OpenGraph tag, then the twitter-card tag, then whatever the plain HTML
//! offers. Only specific tag/attribute lookups happen here; this is not a
//! general DOM walk.

use once_cell::sync::OnceCell;
use scraper::{Html, Selector};
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;
use tracing::debug;

use crate::error::{IngestError, IngestResult};
use crate::imaging::ImagePipeline;
use crate::record::{
    truncate_with_ellipsis, CanonicalRecord, Tag, DESCRIPTION_MAX_CHARS, TITLE_MAX_CHARS,
};
use crate::store::BlobStore;

/// Articles, conjunctions, and common prepositions excluded from derived
/// keyword sets.
const FILLER_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "nor", "so", "yet", "for", "of", "in", "on", "at", "to",
    "by", "with", "from", "as", "into", "onto", "over", "under", "is", "are", "was", "were", "be",
    "been", "it", "its", "this", "that", "these", "those",
];

/// Raw fields pulled out of one HTML document, before image work.
#[derive(Debug, Clone, PartialEq)]
pub struct PageMeta {
    pub title: String,
    pub source: String,
    pub image: String,
    pub description: String,
    pub byline: String,
    /// Epoch milliseconds.
    pub published_at: i64,
    pub keywords: Vec<String>,
}

fn selector(cell: &'static OnceCell<Selector>, css: &'static str) -> &'static Selector {
    cell.get_or_init(|| Selector::parse(css).expect("static selector"))
}

fn meta_content(doc: &Html, cell: &'static OnceCell<Selector>, css: &'static str) -> String {
    doc.select(selector(cell, css))
        .next()
        .and_then(|el| el.value().attr("content"))
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Parse an RFC 3339 or RFC 2822 timestamp into epoch milliseconds.
pub fn parse_timestamp_ms(s: &str) -> Option<i64> {
    let dt = OffsetDateTime::parse(s, &Rfc3339)
        .or_else(|_| OffsetDateTime::parse(s, &Rfc2822))
        .ok()?;
    Some((dt.unix_timestamp_nanos() / 1_000_000) as i64)
}

fn now_ms() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// Tokenize on non-alphanumeric boundaries.
fn tokenize(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
}

/// Derive the keyword set from a description, a title, and the explicit
/// comma-separated keywords field, in that precedence order. Tokens are
/// lowercased, trimmed, stripped of punctuation, filtered against the
/// filler-word list, and deduplicated preserving first-seen order.
pub fn derive_keywords(description: &str, title: &str, meta_keywords: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    let candidates = tokenize(description)
        .chain(tokenize(title))
        .chain(meta_keywords.split(',').flat_map(tokenize));

    for token in candidates {
        let cleaned: String = token
            .trim()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        if cleaned.is_empty() || FILLER_WORDS.contains(&cleaned.as_str()) {
            continue;
        }
        if seen.insert(cleaned.clone()) {
            out.push(cleaned);
        }
    }
    out
}

/// Extract the canonical fields from an HTML document. Pure and synchronous
/// so the non-`Send` parsed DOM never crosses an await point.
pub fn parse_page(html: &str, request_url: &str) -> PageMeta {
    static TITLE: OnceCell<Selector> = OnceCell::new();
    static OG_TITLE: OnceCell<Selector> = OnceCell::new();
    static TW_TITLE: OnceCell<Selector> = OnceCell::new();
    static TW_TEXT_TITLE: OnceCell<Selector> = OnceCell::new();
    static OG_URL: OnceCell<Selector> = OnceCell::new();
    static TW_URL: OnceCell<Selector> = OnceCell::new();
    static OG_IMAGE: OnceCell<Selector> = OnceCell::new();
    static TW_IMAGE: OnceCell<Selector> = OnceCell::new();
    static DESCRIPTION: OnceCell<Selector> = OnceCell::new();
    static DATE_PUBLISHED: OnceCell<Selector> = OnceCell::new();
    static UPLOAD_DATE: OnceCell<Selector> = OnceCell::new();
    static TIME_EL: OnceCell<Selector> = OnceCell::new();
    static SITE_NAME: OnceCell<Selector> = OnceCell::new();
    static KEYWORDS: OnceCell<Selector> = OnceCell::new();

    let doc = Html::parse_document(html);

    let inner_title = doc
        .select(selector(&TITLE, "title"))
        .next()
        .map(|el| el.text().collect::<String>())
        .unwrap_or_default()
        .trim()
        .to_string();
    let og_title = meta_content(&doc, &OG_TITLE, r#"meta[property="og:title"]"#);
    let tw_title = {
        let t = meta_content(&doc, &TW_TITLE, r#"meta[name="twitter:title"]"#);
        if t.is_empty() {
            meta_content(&doc, &TW_TEXT_TITLE, r#"meta[name="twitter:text:title"]"#)
        } else {
            t
        }
    };
    let title = [og_title, tw_title, inner_title]
        .into_iter()
        .find(|t| !t.is_empty())
        .unwrap_or_default();

    let og_url = meta_content(&doc, &OG_URL, r#"meta[property="og:url"]"#);
    let tw_url = meta_content(&doc, &TW_URL, r#"meta[name="twitter:url"]"#);
    let source = [og_url, tw_url, request_url.to_string()]
        .into_iter()
        .find(|t| !t.is_empty())
        .unwrap_or_default();

    let og_image = meta_content(&doc, &OG_IMAGE, r#"meta[property="og:image"]"#);
    let tw_image = meta_content(&doc, &TW_IMAGE, r#"meta[name="twitter:image"]"#);
    let image = [og_image, tw_image]
        .into_iter()
        .find(|t| !t.is_empty())
        .unwrap_or_default()
        .split('?')
        .next()
        .unwrap_or_default()
        .to_string();

    let description = html_escape::decode_html_entities(&meta_content(
        &doc,
        &DESCRIPTION,
        r#"meta[name="description"]"#,
    ))
    .trim()
    .to_string();

    let date_str = {
        let d = meta_content(&doc, &DATE_PUBLISHED, r#"meta[itemprop="datePublished"]"#);
        if !d.is_empty() {
            d
        } else {
            let u = meta_content(&doc, &UPLOAD_DATE, r#"meta[itemprop="uploadDate"]"#);
            if !u.is_empty() {
                u
            } else {
                doc.select(selector(&TIME_EL, "time"))
                    .next()
                    .and_then(|el| el.value().attr("datetime"))
                    .unwrap_or_default()
                    .to_string()
            }
        }
    };
    let published_at = parse_timestamp_ms(&date_str).unwrap_or_else(now_ms);

    let byline = meta_content(&doc, &SITE_NAME, r#"meta[property="og:site_name"]"#);
    let meta_keywords = meta_content(&doc, &KEYWORDS, r#"meta[name="keywords"]"#);
    let keywords = derive_keywords(&description, &title, &meta_keywords);

    PageMeta {
        title,
        source,
        image,
        description,
        byline,
        published_at,
        keywords,
    }
}

/// Fetches pages and assembles validated canonical records.
#[derive(Clone)]
pub struct MetaExtractor {
    client: reqwest::Client,
    imaging: ImagePipeline,
}

impl MetaExtractor {
    pub fn new(timeout: std::time::Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            imaging: ImagePipeline::new(timeout),
        }
    }

    /// Fetch `url`, extract metadata through the fallback chain, transcode
    /// its lead image, and return a record that already passed the
    /// validity gate. Incomplete pages come back as `Validation` errors so
    /// batch callers can skip them without crashing siblings.
    pub async fn extract(&self, url: &str, blobs: &dyn BlobStore) -> IngestResult<CanonicalRecord> {
        let html = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| IngestError::fetch(url, e))?
            .text()
            .await
            .map_err(|e| IngestError::fetch(url, e))?;

        let meta = parse_page(&html, url);
        debug!(url, title = %meta.title, "extracted page metadata");

        let placeholder_image = self.imaging.placeholder_data_uri(&meta.image).await;
        let full_image_ref = self.imaging.store_full_image(blobs, &meta.image, url).await;

        let record = CanonicalRecord {
            source: meta.source,
            title: truncate_with_ellipsis(&meta.title, TITLE_MAX_CHARS),
            description: truncate_with_ellipsis(&meta.description, DESCRIPTION_MAX_CHARS),
            byline: meta.byline,
            published_at: meta.published_at,
            keywords: meta.keywords,
            duration_ms: 0,
            tag: Tag::None,
            placeholder_image,
            full_image_ref,
            email: None,
            active: true,
        };
        record.validate()?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!doctype html><html><head>
        <title>Fallback Title | Site</title>
        <meta property="og:title" content="A Great Rust Release" />
        <meta property="og:url" content="https://blog.example.com/release" />
        <meta property="og:image" content="https://img.example.com/hero.png?w=2048" />
        <meta property="og:site_name" content="Example Blog" />
        <meta name="description" content="The release ships a faster parser and a new CLI." />
        <meta name="keywords" content="rust, release,parser" />
        <meta itemprop="datePublished" content="2024-03-01T12:00:00Z" />
        </head><body><time datetime="2020-01-01T00:00:00Z"></time></body></html>"#;

    #[test]
    fn og_tags_win_the_fallback_chain() {
        let meta = parse_page(PAGE, "https://requested.example.com/x");
        assert_eq!(meta.title, "A Great Rust Release");
        assert_eq!(meta.source, "https://blog.example.com/release");
        assert_eq!(meta.byline, "Example Blog");
        // query string stripped from the image
        assert_eq!(meta.image, "https://img.example.com/hero.png");
        assert_eq!(meta.published_at, 1_709_294_400_000);
    }

    #[test]
    fn falls_back_to_plain_title_and_request_url() {
        let html = "<html><head><title> Just a Title </title></head></html>";
        let meta = parse_page(html, "https://requested.example.com/x");
        assert_eq!(meta.title, "Just a Title");
        assert_eq!(meta.source, "https://requested.example.com/x");
        assert!(meta.byline.is_empty());
    }

    #[test]
    fn twitter_tags_beat_plain_title() {
        let html = r#"<html><head><title>Plain</title>
            <meta name="twitter:title" content="Card Title" />
            <meta name="twitter:url" content="https://t.example.com/y" />
            </head></html>"#;
        let meta = parse_page(html, "https://requested.example.com/x");
        assert_eq!(meta.title, "Card Title");
        assert_eq!(meta.source, "https://t.example.com/y");
    }

    #[test]
    fn visible_time_element_is_date_fallback() {
        let html = r#"<html><body><time datetime="2024-06-01T00:00:00Z">June</time></body></html>"#;
        let meta = parse_page(html, "https://x.example");
        assert_eq!(meta.published_at, 1_717_200_000_000);
    }

    #[test]
    fn missing_date_defaults_to_roughly_now() {
        let meta = parse_page("<html></html>", "https://x.example");
        let now = now_ms();
        assert!((now - meta.published_at).abs() < 5_000);
    }

    #[test]
    fn keywords_are_lowercased_deduped_and_filtered() {
        let kw = derive_keywords(
            "The Parser and the CLI",
            "Parser News",
            "Rust, CLI , parser",
        );
        assert_eq!(kw, vec!["parser", "cli", "news", "rust"]);
    }

    #[test]
    fn keyword_derivation_is_stable_across_runs() {
        let a = derive_keywords("Async runtimes in Rust", "Tokio 1.0", "tokio,async");
        let b = derive_keywords("Async runtimes in Rust", "Tokio 1.0", "tokio,async");
        assert_eq!(a, b);
    }

    #[test]
    fn punctuation_is_stripped_from_tokens() {
        let kw = derive_keywords("hello, world!", "", "");
        assert_eq!(kw, vec!["hello", "world"]);
    }

    #[test]
    fn page_keywords_follow_description_title_order() {
        let meta = parse_page(PAGE, "https://x.example");
        assert_eq!(meta.keywords[0], "release");
        assert!(meta.keywords.contains(&"parser".to_string()));
        assert!(meta.keywords.contains(&"rust".to_string()));
        // filler words never survive
        assert!(!meta.keywords.iter().any(|k| k == "the" || k == "and"));
    }
}
