// src/store.rs
//! Narrow interfaces to the external collaborators. The relational store,
//! blob store, and page-cache invalidator all live outside this service;
//! the pipeline only ever talks to these traits.
//!
//! In-memory implementations ship alongside the traits. They back the
//! binary until real collaborators are wired in, and integration tests
//! use them directly.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use crate::error::{IngestError, IngestResult};
use crate::record::{CanonicalRecord, SubscriptionRecord};

/// Relational persistence for canonical article records.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Insert a validated record; returns the inserted source key.
    /// Duplicate sources surface as `IngestError::Persistence`.
    async fn insert_article(&self, record: &CanonicalRecord) -> IngestResult<String>;
}

/// Relational persistence for hub subscription rows. Each topic row update
/// is independently atomic; no further locking is modeled here.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn upsert_subscription(
        &self,
        topic: &str,
        email: Option<&str>,
        expires_at: i64,
    ) -> IngestResult<String>;

    /// All rows with `expires_at >= min_expiry` (epoch ms). Pass a negative
    /// lookback to include recently expired topics a sweep must unsubscribe.
    async fn query_subscriptions(&self, min_expiry: i64) -> IngestResult<Vec<SubscriptionRecord>>;

    async fn find_subscription(&self, topic: &str) -> IngestResult<Option<SubscriptionRecord>>;
}

/// Blob storage for transcoded article images.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` at `path` and return the public URL.
    async fn put(&self, path: &str, bytes: Vec<u8>) -> IngestResult<String>;
}

/// Page-cache invalidation trigger, signaled after successful batches.
#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    async fn invalidate(&self, path: &str) -> IngestResult<()>;
}

/// Article rows keyed by source URL. Duplicate inserts are rejected like
/// a primary-key violation would be.
#[derive(Default)]
pub struct MemoryArticleStore {
    rows: Mutex<HashMap<String, CanonicalRecord>>,
}

impl MemoryArticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, source: &str) -> Option<CanonicalRecord> {
        self.rows.lock().ok().and_then(|r| r.get(source).cloned())
    }
}

#[async_trait]
impl ArticleStore for MemoryArticleStore {
    async fn insert_article(&self, record: &CanonicalRecord) -> IngestResult<String> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| IngestError::Persistence("article store lock poisoned".into()))?;
        if rows.contains_key(&record.source) {
            return Err(IngestError::Persistence(format!(
                "duplicate source: {}",
                record.source
            )));
        }
        rows.insert(record.source.clone(), record.clone());
        Ok(record.source.clone())
    }
}

/// Subscription rows keyed by topic.
#[derive(Default)]
pub struct MemorySubscriptionStore {
    rows: Mutex<HashMap<String, SubscriptionRecord>>,
}

impl MemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn upsert_subscription(
        &self,
        topic: &str,
        email: Option<&str>,
        expires_at: i64,
    ) -> IngestResult<String> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| IngestError::Persistence("subscription store lock poisoned".into()))?;
        rows.insert(
            topic.to_string(),
            SubscriptionRecord {
                topic: topic.to_string(),
                email: email.map(str::to_string),
                expires_at,
            },
        );
        Ok(topic.to_string())
    }

    async fn query_subscriptions(&self, min_expiry: i64) -> IngestResult<Vec<SubscriptionRecord>> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| IngestError::Persistence("subscription store lock poisoned".into()))?;
        let mut out: Vec<SubscriptionRecord> = rows
            .values()
            .filter(|r| r.expires_at >= min_expiry)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.topic.cmp(&b.topic));
        Ok(out)
    }

    async fn find_subscription(&self, topic: &str) -> IngestResult<Option<SubscriptionRecord>> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| IngestError::Persistence("subscription store lock poisoned".into()))?;
        Ok(rows.get(topic).cloned())
    }
}

/// Blob stand-in that keeps bytes in memory and hands back a synthetic
/// public URL under `base_url`.
pub struct MemoryBlobStore {
    base_url: String,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            blobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.blobs.lock().ok().and_then(|b| b.get(path).cloned())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> IngestResult<String> {
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| IngestError::Persistence("blob store lock poisoned".into()))?;
        blobs.insert(path.to_string(), bytes);
        Ok(format!("{}/{path}", self.base_url.trim_end_matches('/')))
    }
}

/// Invalidator that only records the request in the log. Real deployments
/// swap in a client for the front-end cache.
#[derive(Default)]
pub struct LoggingCacheInvalidator;

#[async_trait]
impl CacheInvalidator for LoggingCacheInvalidator {
    async fn invalidate(&self, path: &str) -> IngestResult<()> {
        info!(path, "cache invalidation requested");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Tag;

    fn record(source: &str) -> CanonicalRecord {
        CanonicalRecord {
            source: source.to_string(),
            title: "t".into(),
            description: "d".into(),
            byline: "b".into(),
            published_at: 1,
            keywords: vec![],
            duration_ms: 0,
            tag: Tag::None,
            placeholder_image: "p".into(),
            full_image_ref: "f".into(),
            email: None,
            active: true,
        }
    }

    #[tokio::test]
    async fn duplicate_article_insert_is_rejected() {
        let store = MemoryArticleStore::new();
        store.insert_article(&record("https://a.example")).await.unwrap();
        let err = store.insert_article(&record("https://a.example")).await;
        assert!(matches!(err, Err(IngestError::Persistence(_))));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn subscription_query_filters_by_expiry() {
        let store = MemorySubscriptionStore::new();
        store.upsert_subscription("old", None, 100).await.unwrap();
        store.upsert_subscription("new", None, 900).await.unwrap();
        let rows = store.query_subscriptions(500).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].topic, "new");
    }

    #[tokio::test]
    async fn upsert_replaces_existing_row() {
        let store = MemorySubscriptionStore::new();
        store.upsert_subscription("t", None, 100).await.unwrap();
        store
            .upsert_subscription("t", Some("x@example.com"), 200)
            .await
            .unwrap();
        let row = store.find_subscription("t").await.unwrap().unwrap();
        assert_eq!(row.expires_at, 200);
        assert_eq!(row.email.as_deref(), Some("x@example.com"));
    }

    #[tokio::test]
    async fn blob_put_returns_public_url() {
        let store = MemoryBlobStore::new("https://blobs.example.com/");
        let url = store.put("articles/x.webp", vec![1, 2, 3]).await.unwrap();
        assert_eq!(url, "https://blobs.example.com/articles/x.webp");
        assert_eq!(store.get("articles/x.webp"), Some(vec![1, 2, 3]));
    }
}
