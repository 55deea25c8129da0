// tests/batch_ingest.rs
//
// Batch orchestration properties, driven through the pipeline on
// in-memory stores with a scripted record source:
// - per-item failure isolation and ordered outcomes
// - ad override merging
// - duplicate-source rejection surfaces as a per-item error

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use devnews_ingest::error::{IngestError, IngestResult};
use devnews_ingest::pipeline::{IngestPipeline, RecordSource};
use devnews_ingest::record::{CanonicalRecord, RecordPatch, Tag};
use devnews_ingest::store::{
    LoggingCacheInvalidator, MemoryArticleStore, MemorySubscriptionStore,
};

/// Scripted source: URLs containing "broken" fail, everything else yields
/// a valid record.
struct ScriptedSource;

#[async_trait]
impl RecordSource for ScriptedSource {
    async fn build_record(&self, url: &str) -> IngestResult<CanonicalRecord> {
        if url.contains("broken") {
            return Err(IngestError::fetch(url, "connection refused"));
        }
        if url.contains("misconfigured") {
            return Err(IngestError::Configuration("api key missing".into()));
        }
        Ok(CanonicalRecord {
            source: url.to_string(),
            title: "Scripted".into(),
            description: "scripted description".into(),
            byline: "Scripted Site".into(),
            published_at: 1_700_000_000_000,
            keywords: vec!["rust".into()],
            duration_ms: 0,
            tag: Tag::None,
            placeholder_image: "data:image/webp;base64,AA==".into(),
            full_image_ref: "https://blobs.example.com/s.webp".into(),
            email: None,
            active: true,
        })
    }
}

fn pipeline() -> (IngestPipeline, Arc<MemoryArticleStore>) {
    let articles = Arc::new(MemoryArticleStore::new());
    let pipeline = IngestPipeline::new(
        Arc::new(ScriptedSource),
        articles.clone(),
        Arc::new(MemorySubscriptionStore::new()),
        Arc::new(LoggingCacheInvalidator),
        Duration::from_secs(5),
    );
    (pipeline, articles)
}

#[tokio::test]
async fn failing_item_does_not_abort_siblings() {
    let (pipeline, articles) = pipeline();
    let urls = vec![
        "https://a.example/one".to_string(),
        "https://a.example/broken".to_string(),
        "https://a.example/three".to_string(),
    ];

    let outcome = pipeline.ingest_urls(&urls, None).await;

    assert_eq!(
        outcome.inserted,
        vec![
            "https://a.example/one".to_string(),
            "https://a.example/three".to_string()
        ]
    );
    assert_eq!(outcome.failed(), 1);
    // outcomes keep batch order, including the failure in the middle
    assert_eq!(outcome.outcomes.len(), 3);
    assert!(outcome.outcomes[0].result.is_ok());
    assert!(outcome.outcomes[1].result.is_err());
    assert!(outcome.outcomes[2].result.is_ok());
    assert_eq!(articles.len(), 2);
}

#[tokio::test]
async fn all_failures_still_produce_an_aggregate() {
    let (pipeline, articles) = pipeline();
    let urls = vec![
        "https://a.example/broken-1".to_string(),
        "https://a.example/broken-2".to_string(),
    ];
    let outcome = pipeline.ingest_urls(&urls, None).await;
    assert!(outcome.inserted.is_empty());
    assert_eq!(outcome.failed(), 2);
    assert_eq!(outcome.outcomes.len(), 2);
    assert!(articles.is_empty());
}

#[tokio::test]
async fn override_patch_is_merged_before_persisting() {
    let (pipeline, articles) = pipeline();
    let urls = vec!["https://a.example/sponsored".to_string()];
    let patch = RecordPatch::ad_override(Some("sponsor@example.com".into()));

    let outcome = pipeline.ingest_urls(&urls, Some(&patch)).await;
    assert_eq!(outcome.failed(), 0);

    let record = articles.get("https://a.example/sponsored").unwrap();
    assert_eq!(record.tag, Tag::Ad);
    assert_eq!(record.email.as_deref(), Some("sponsor@example.com"));
    // untouched fields come from the page, not the patch
    assert_eq!(record.byline, "Scripted Site");
}

#[tokio::test]
async fn duplicate_source_is_a_per_item_error() {
    let (pipeline, articles) = pipeline();
    let urls = vec![
        "https://a.example/dup".to_string(),
        "https://a.example/dup".to_string(),
    ];
    let outcome = pipeline.ingest_urls(&urls, None).await;
    assert_eq!(outcome.inserted.len(), 1);
    assert_eq!(outcome.failed(), 1);
    assert!(matches!(
        outcome.outcomes[1].result,
        Err(IngestError::Persistence(_))
    ));
    assert_eq!(articles.len(), 1);
}

#[tokio::test]
async fn configuration_errors_abort_the_rest_of_the_batch() {
    let (pipeline, articles) = pipeline();
    let urls = vec![
        "https://a.example/one".to_string(),
        "https://a.example/misconfigured".to_string(),
        "https://a.example/never-reached".to_string(),
    ];
    let outcome = pipeline.ingest_urls(&urls, None).await;
    assert_eq!(outcome.inserted, vec!["https://a.example/one".to_string()]);
    // the batch stops at the unrecoverable error; the third URL has no outcome
    assert_eq!(outcome.outcomes.len(), 2);
    assert_eq!(articles.len(), 1);
}

#[tokio::test]
async fn empty_batch_is_a_no_op() {
    let (pipeline, articles) = pipeline();
    let outcome = pipeline.ingest_urls(&[], None).await;
    assert!(outcome.inserted.is_empty());
    assert!(outcome.outcomes.is_empty());
    assert!(articles.is_empty());
}
