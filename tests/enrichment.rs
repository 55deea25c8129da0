// tests/enrichment.rs
//
// Video enrichment and timeline pulls against a local stub HTTP server,
// using the injectable endpoints on both clients:
// - sponsorship override: unexpired subscription with email forces `ad`
// - expired sponsorship leaves the duration-based classification alone
// - timeline responses map into webhook-shaped events

use std::time::Duration;

use axum::{routing::any, Json, Router};
use serde_json::json;

use devnews_ingest::error::IngestError;
use devnews_ingest::record::Tag;
use devnews_ingest::social::TwitterTimeline;
use devnews_ingest::store::{MemorySubscriptionStore, SubscriptionStore};
use devnews_ingest::video::VideoEnricher;

const VIDEO_URL: &str = "https://www.youtube.com/watch?v=xulXmZrC9uI";

/// Serve a fixed JSON body on every path of an ephemeral local port.
async fn serve_json(body: serde_json::Value) -> String {
    let app = Router::new().fallback(any(move || {
        let body = body.clone();
        async move { Json(body) }
    }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind stub server");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve stub");
    });
    format!("http://{addr}")
}

fn video_list_response() -> serde_json::Value {
    json!({
        "items": [{
            "snippet": {
                "channelId": "UCsponsor",
                "channelTitle": "Sponsor Channel",
                "tags": ["rust", "news"],
                "liveBroadcastContent": "none"
            },
            "contentDetails": { "duration": "PT2H10M" }
        }]
    })
}

fn enricher(base: &str) -> VideoEnricher {
    VideoEnricher::new("yt-key".into(), Duration::from_secs(5))
        .with_endpoint(format!("{base}/youtube/v3/videos"))
}

#[tokio::test]
async fn unexpired_sponsorship_forces_ad_tag() {
    let base = serve_json(video_list_response()).await;
    let now = 1_700_000_000_000i64;
    let store = MemorySubscriptionStore::new();
    store
        .upsert_subscription("UCsponsor", Some("ads@example.com"), now + 86_400_000)
        .await
        .unwrap();

    let enrichment = enricher(&base)
        .enrich(VIDEO_URL, &store, now)
        .await
        .unwrap()
        .expect("video link resolves");

    assert_eq!(enrichment.channel_id, "UCsponsor");
    assert_eq!(enrichment.patch.tag, Some(Tag::Ad));
    assert_eq!(enrichment.patch.email.as_deref(), Some("ads@example.com"));
    assert_eq!(enrichment.patch.duration_ms, Some(7_800_000));
    assert_eq!(enrichment.patch.byline.as_deref(), Some("Sponsor Channel"));
}

#[tokio::test]
async fn expired_sponsorship_does_not_override() {
    let base = serve_json(video_list_response()).await;
    let now = 1_700_000_000_000i64;
    let store = MemorySubscriptionStore::new();
    store
        .upsert_subscription("UCsponsor", Some("ads@example.com"), now - 1)
        .await
        .unwrap();

    let enrichment = enricher(&base)
        .enrich(VIDEO_URL, &store, now)
        .await
        .unwrap()
        .expect("video link resolves");

    // 2h10m is no short and no ad; classification stays untouched
    assert_eq!(enrichment.patch.tag, Some(Tag::None));
    assert_eq!(enrichment.patch.email, None);
}

#[tokio::test]
async fn subscription_without_email_does_not_override() {
    let base = serve_json(video_list_response()).await;
    let now = 1_700_000_000_000i64;
    let store = MemorySubscriptionStore::new();
    store
        .upsert_subscription("UCsponsor", None, now + 86_400_000)
        .await
        .unwrap();

    let enrichment = enricher(&base)
        .enrich(VIDEO_URL, &store, now)
        .await
        .unwrap()
        .expect("video link resolves");
    assert_eq!(enrichment.patch.tag, Some(Tag::None));
}

#[tokio::test]
async fn non_video_url_skips_enrichment() {
    let base = serve_json(json!({})).await;
    let store = MemorySubscriptionStore::new();
    let enrichment = enricher(&base)
        .enrich("https://blog.example.com/post", &store, 0)
        .await
        .unwrap();
    assert!(enrichment.is_none());
}

#[tokio::test]
async fn missing_item_yields_none() {
    let base = serve_json(json!({ "items": [] })).await;
    let store = MemorySubscriptionStore::new();
    let enrichment = enricher(&base)
        .enrich(VIDEO_URL, &store, 0)
        .await
        .unwrap();
    assert!(enrichment.is_none());
}

#[tokio::test]
async fn timeline_response_maps_into_events() {
    let base = serve_json(json!({
        "data": [
            { "id": "101", "text": "hello rust", "created_at": "2024-01-01T12:00:00Z" },
            { "id": "102", "text": "second post" }
        ],
        "includes": { "users": [{ "username": "rustlang" }] }
    }))
    .await;

    let timeline =
        TwitterTimeline::new("bearer".into(), Duration::from_secs(5)).with_base_url(base);
    let events = timeline.fetch_recent("42").await.unwrap();

    assert_eq!(events.len(), 2);
    assert_eq!(events[0].id, 101);
    assert_eq!(events[0].text, "hello rust");
    assert_eq!(events[0].user.screen_name, "rustlang");
    assert_eq!(events[1].user.screen_name, "rustlang");
}

#[tokio::test]
async fn timeline_without_user_is_an_upstream_error() {
    let base = serve_json(json!({ "data": [] })).await;
    let timeline =
        TwitterTimeline::new("bearer".into(), Duration::from_secs(5)).with_base_url(base);
    let err = timeline.fetch_recent("42").await.unwrap_err();
    assert!(matches!(err, IngestError::UpstreamApi(_)));
}
