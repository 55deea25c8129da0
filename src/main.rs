//! Content Ingestion Service — Binary Entrypoint
//! Boots the Axum HTTP server, wiring configuration, collaborators, and
//! the webhook/ingest routes.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use devnews_ingest::api::{create_router, AppState};
use devnews_ingest::config::{load_seed_feeds_default, AppConfig};
use devnews_ingest::metadata::MetaExtractor;
use devnews_ingest::pipeline::{IngestPipeline, LiveRecordSource};
use devnews_ingest::social::TwitterTimeline;
use devnews_ingest::store::{
    ArticleStore, BlobStore, CacheInvalidator, LoggingCacheInvalidator, MemoryArticleStore,
    MemoryBlobStore, MemorySubscriptionStore, SubscriptionStore,
};
use devnews_ingest::subscription::{HubClient, SubscriptionManager};
use devnews_ingest::video::VideoEnricher;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("devnews_ingest=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = Arc::new(AppConfig::from_env()?);

    let metrics_handle = PrometheusBuilder::new().install_recorder().ok();
    if metrics_handle.is_none() {
        tracing::warn!("metrics recorder install failed; /metrics disabled");
    }

    // In-memory collaborators back the service until the external stores
    // are wired in.
    let articles: Arc<dyn ArticleStore> = Arc::new(MemoryArticleStore::new());
    let sub_store: Arc<dyn SubscriptionStore> = Arc::new(MemorySubscriptionStore::new());
    let blobs: Arc<dyn BlobStore> = Arc::new(MemoryBlobStore::new(config.public_base_url.clone()));
    let cache: Arc<dyn CacheInvalidator> = Arc::new(LoggingCacheInvalidator);

    let extractor = MetaExtractor::new(config.fetch_timeout);
    let video = VideoEnricher::new(config.youtube_api_key.clone(), config.fetch_timeout);
    let source = Arc::new(LiveRecordSource::new(
        extractor,
        video,
        blobs.clone(),
        sub_store.clone(),
    ));

    let pipeline = Arc::new(IngestPipeline::new(
        source,
        articles.clone(),
        sub_store.clone(),
        cache,
        config.fetch_timeout,
    ));

    let hub = Arc::new(HubClient::new(
        config.hub_url.clone(),
        config.youtube_callback_url(),
        config.youtube_hub_secret.clone(),
        config.fetch_timeout,
    ));
    let subscriptions = Arc::new(SubscriptionManager::new(hub, sub_store.clone()));

    let timeline = config
        .twitter_bearer_token
        .clone()
        .map(|token| Arc::new(TwitterTimeline::new(token, config.fetch_timeout)));

    match load_seed_feeds_default() {
        Ok(feeds) if !feeds.is_empty() => {
            tracing::info!(count = feeds.len(), "seed feeds loaded");
            let now_ms = chrono::Utc::now().timestamp_millis();
            for feed in feeds {
                // Persist without a hub call; the sweep picks these up.
                if let Err(e) = sub_store
                    .upsert_subscription(&feed, None, now_ms + 30 * 24 * 60 * 60 * 1000)
                    .await
                {
                    tracing::warn!(feed = %feed, error = %e, "seed feed not persisted");
                }
            }
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "seed feed load failed"),
    }

    let state = AppState {
        config: config.clone(),
        pipeline,
        subscriptions,
        articles,
        timeline,
        metrics: metrics_handle,
    };
    let router = create_router(state);

    let addr = std::env::var("DEVNEWS_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, router).await?;
    Ok(())
}
