// src/pipeline.rs
//! Batch ingestion orchestrator.
//!
//! Drives extraction and enrichment over URL lists, RSS feeds, and stored
//! subscription rows. Every per-item failure is caught at the item
//! boundary, logged with its source context, and recorded as an explicit
//! outcome value; one bad item never aborts its siblings. The aggregate
//! result is always produced, even when the outer operation failed.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use once_cell::sync::OnceCell;
use quick_xml::de::from_str;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{IngestError, IngestResult};
use crate::metadata::{parse_timestamp_ms, MetaExtractor};
use crate::record::{CanonicalRecord, RecordPatch};
use crate::store::{ArticleStore, BlobStore, CacheInvalidator, SubscriptionStore};
use crate::video::VideoEnricher;

/// Items published more than this far in the past are skipped.
pub const FRESHNESS_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_items_total", "Items considered across all batches.");
        describe_counter!("ingest_inserted_total", "Records accepted by the article store.");
        describe_counter!(
            "ingest_skipped_total",
            "Items skipped by the freshness filter."
        );
        describe_counter!(
            "ingest_item_errors_total",
            "Per-item fetch/parse/validation/persistence failures."
        );
        describe_counter!("hub_calls_total", "Outbound hub subscribe/unsubscribe calls.");
        describe_counter!(
            "webhook_rejected_total",
            "Inbound webhook notifications rejected at signature verification."
        );
        describe_gauge!(
            "ingest_batch_last_run_ts",
            "Unix ts when an ingest batch last ran."
        );
    });
}

// --- RSS feed decoding (quick-xml serde) ---

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    published: Option<String>,
}

/// A feed entry reduced to what the orchestrator needs.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub link: String,
    /// Epoch ms; item publication time, or `now` when the feed omits it.
    pub published_at: i64,
}

/// Decode an RSS document into feed items. Entries without a link are
/// dropped; missing publication dates default to `now_ms` so they pass the
/// freshness filter.
pub fn parse_rss(xml: &str, now_ms: i64) -> IngestResult<Vec<FeedItem>> {
    let rss: Rss = from_str(xml).map_err(|e| IngestError::Parse(format!("rss: {e}")))?;
    let items = rss
        .channel
        .item
        .into_iter()
        .filter_map(|it| {
            let link = it.link?.trim().to_string();
            if link.is_empty() {
                return None;
            }
            let published_at = it
                .pub_date
                .or(it.published)
                .as_deref()
                .and_then(parse_timestamp_ms)
                .unwrap_or(now_ms);
            Some(FeedItem { link, published_at })
        })
        .collect();
    Ok(items)
}

/// Builds one finished canonical record for a URL. A trait seam so batch
/// behavior is testable without live pages.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn build_record(&self, url: &str) -> IngestResult<CanonicalRecord>;
}

/// Production record source: page extraction merged with video enrichment.
pub struct LiveRecordSource {
    extractor: MetaExtractor,
    video: VideoEnricher,
    blobs: Arc<dyn BlobStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
}

impl LiveRecordSource {
    pub fn new(
        extractor: MetaExtractor,
        video: VideoEnricher,
        blobs: Arc<dyn BlobStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
    ) -> Self {
        Self {
            extractor,
            video,
            blobs,
            subscriptions,
        }
    }
}

#[async_trait]
impl RecordSource for LiveRecordSource {
    async fn build_record(&self, url: &str) -> IngestResult<CanonicalRecord> {
        let base = self.extractor.extract(url, self.blobs.as_ref()).await?;
        let now_ms = chrono::Utc::now().timestamp_millis();
        let record = match self
            .video
            .enrich(url, self.subscriptions.as_ref(), now_ms)
            .await?
        {
            Some(enrichment) => base.merged(&enrichment.patch),
            None => base,
        };
        Ok(record)
    }
}

/// Outcome of one item, kept in batch order.
#[derive(Debug)]
pub struct ItemOutcome {
    pub url: String,
    pub result: IngestResult<String>,
}

/// Aggregate returned by every batch entry point.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Source keys of successfully inserted records, in processing order.
    pub inserted: Vec<String>,
    pub outcomes: Vec<ItemOutcome>,
}

impl BatchOutcome {
    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_err()).count()
    }

    fn absorb(&mut self, mut other: BatchOutcome) {
        self.inserted.append(&mut other.inserted);
        self.outcomes.append(&mut other.outcomes);
    }
}

pub struct IngestPipeline {
    source: Arc<dyn RecordSource>,
    articles: Arc<dyn ArticleStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    cache: Arc<dyn CacheInvalidator>,
    client: reqwest::Client,
}

impl IngestPipeline {
    pub fn new(
        source: Arc<dyn RecordSource>,
        articles: Arc<dyn ArticleStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        cache: Arc<dyn CacheInvalidator>,
        fetch_timeout: std::time::Duration,
    ) -> Self {
        ensure_metrics_described();
        Self {
            source,
            articles,
            subscriptions,
            cache,
            client: reqwest::Client::builder()
                .timeout(fetch_timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Run one item end to end: build, override, validate, persist.
    async fn ingest_one(
        &self,
        url: &str,
        override_patch: Option<&RecordPatch>,
    ) -> IngestResult<String> {
        counter!("ingest_items_total").increment(1);
        let record = self.source.build_record(url).await?;
        let record = match override_patch {
            Some(patch) => record.merged(patch),
            None => record,
        };
        record.validate()?;
        let inserted = self.articles.insert_article(&record).await?;
        counter!("ingest_inserted_total").increment(1);
        Ok(inserted)
    }

    /// Ingest an explicit ordered URL list. Failures stay per-item.
    pub async fn ingest_urls(
        &self,
        urls: &[String],
        override_patch: Option<&RecordPatch>,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for url in urls {
            let result = self.ingest_one(url, override_patch).await;
            let abort = matches!(&result, Err(e) if e.aborts_operation());
            match &result {
                Ok(source) => outcome.inserted.push(source.clone()),
                Err(e) => {
                    warn!(source = %url, error = %e, "item failed during ingest");
                    counter!("ingest_item_errors_total").increment(1);
                }
            }
            outcome.outcomes.push(ItemOutcome {
                url: url.clone(),
                result,
            });
            if abort {
                // Misconfiguration affects every remaining item equally.
                warn!("aborting batch after unrecoverable item error");
                break;
            }
        }
        gauge!("ingest_batch_last_run_ts").set(chrono::Utc::now().timestamp() as f64);
        outcome
    }

    /// Fetch and ingest one RSS feed, applying the freshness filter per
    /// item. A feed that cannot be fetched or parsed contributes a single
    /// failed outcome for the feed URL itself.
    pub async fn ingest_feed(
        &self,
        feed_url: &str,
        override_patch: Option<&RecordPatch>,
        now_ms: i64,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        let items = match self.fetch_feed(feed_url, now_ms).await {
            Ok(items) => items,
            Err(e) => {
                warn!(source = %feed_url, error = %e, "feed fetch/parse failed");
                counter!("ingest_item_errors_total").increment(1);
                outcome.outcomes.push(ItemOutcome {
                    url: feed_url.to_string(),
                    result: Err(e),
                });
                return outcome;
            }
        };

        let fresh: Vec<String> = items
            .into_iter()
            .filter(|it| {
                let fresh = it.published_at >= now_ms - FRESHNESS_WINDOW_MS;
                if !fresh {
                    counter!("ingest_skipped_total").increment(1);
                }
                fresh
            })
            .map(|it| it.link)
            .collect();

        outcome.absorb(self.ingest_urls(&fresh, override_patch).await);
        info!(
            feed = %feed_url,
            inserted = outcome.inserted.len(),
            failed = outcome.failed(),
            "feed ingested"
        );
        outcome
    }

    /// Ingest a list of feeds, isolating failures per feed and per item.
    pub async fn ingest_feeds(
        &self,
        feed_urls: &[String],
        override_patch: Option<&RecordPatch>,
        now_ms: i64,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for feed_url in feed_urls {
            outcome.absorb(self.ingest_feed(feed_url, override_patch, now_ms).await);
        }
        self.invalidate_home(&outcome).await;
        outcome
    }

    /// Scheduled sweep: ingest every feed with an unexpired subscription
    /// row, tagging sponsored feeds as ads with the sponsor contact.
    pub async fn cron_sweep(&self, now_ms: i64) -> IngestResult<BatchOutcome> {
        let rows = self.subscriptions.query_subscriptions(now_ms).await?;
        let mut outcome = BatchOutcome::default();
        for row in rows {
            let override_patch = row
                .email
                .as_ref()
                .map(|email| RecordPatch::ad_override(Some(email.clone())));
            outcome.absorb(
                self.ingest_feed(&row.topic, override_patch.as_ref(), now_ms)
                    .await,
            );
        }
        self.invalidate_home(&outcome).await;
        info!(
            inserted = outcome.inserted.len(),
            failed = outcome.failed(),
            "cron sweep finished"
        );
        Ok(outcome)
    }

    /// Signal the page-cache invalidator after a batch that inserted
    /// anything. Completion is awaited and logged; a failed invalidation
    /// never fails the batch.
    async fn invalidate_home(&self, outcome: &BatchOutcome) {
        if outcome.inserted.is_empty() {
            return;
        }
        if let Err(e) = self.cache.invalidate("/").await {
            warn!(error = %e, "cache invalidation failed");
        }
    }

    async fn fetch_feed(&self, feed_url: &str, now_ms: i64) -> IngestResult<Vec<FeedItem>> {
        let xml = self
            .client
            .get(feed_url)
            .send()
            .await
            .map_err(|e| IngestError::fetch(feed_url, e))?
            .text()
            .await
            .map_err(|e| IngestError::fetch(feed_url, e))?;
        parse_rss(&xml, now_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0"?>
        <rss version="2.0"><channel>
          <title>Example Feed</title>
          <item>
            <title>Fresh item</title>
            <link>https://blog.example.com/fresh</link>
            <pubDate>Mon, 01 Jan 2024 12:00:00 +0000</pubDate>
          </item>
          <item>
            <title>No date</title>
            <link>https://blog.example.com/undated</link>
          </item>
          <item>
            <title>No link</title>
            <pubDate>Mon, 01 Jan 2024 12:00:00 +0000</pubDate>
          </item>
        </channel></rss>"#;

    #[test]
    fn parses_items_and_defaults_missing_dates() {
        let now = 1_704_110_400_000; // 2024-01-01T12:00:00Z
        let items = parse_rss(FEED, now).unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].link, "https://blog.example.com/fresh");
        assert_eq!(items[0].published_at, now);
        assert_eq!(items[1].published_at, now);
    }

    #[test]
    fn malformed_xml_is_a_parse_error() {
        let err = parse_rss("<rss><channel>", 0).unwrap_err();
        assert!(matches!(err, IngestError::Parse(_)));
    }

    #[test]
    fn empty_channel_yields_no_items() {
        let xml = r#"<rss version="2.0"><channel><title>t</title></channel></rss>"#;
        assert!(parse_rss(xml, 0).unwrap().is_empty());
    }
}
