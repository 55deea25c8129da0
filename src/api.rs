// src/api.rs
//! HTTP surface: webhook callbacks, batch ingest, subscription management,
//! the scheduled sweep, health, and metrics.
//!
//! Webhook POST handlers buffer the raw body, verify the provider's HMAC
//! signature, and acknowledge immediately; the actual ingest runs as a
//! background task so the hub never waits on page fetches.

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use quick_xml::de::from_str;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::error::IngestError;
use crate::pipeline::{BatchOutcome, IngestPipeline};
use crate::record::RecordPatch;
use crate::signature::{challenge_proof, SignatureContext, SignatureScheme};
use crate::social::{ingest_tweets, TweetNotification, TwitterTimeline};
use crate::store::ArticleStore;
use crate::subscription::SubscriptionManager;

/// Sweep window the cron endpoint passes to the renewal sweep: recently
/// expired topics are still unsubscribed, topics due within a day renew.
const CRON_SWEEP_LOOKBACK_MS: i64 = 48 * 60 * 60 * 1000;
const CRON_SWEEP_LOOKAHEAD_MS: i64 = 24 * 60 * 60 * 1000;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<IngestPipeline>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub articles: Arc<dyn ArticleStore>,
    pub timeline: Option<Arc<TwitterTimeline>>,
    pub metrics: Option<PrometheusHandle>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/metrics", get(render_metrics))
        .route(
            "/api/webhook/youtube",
            get(youtube_challenge).post(youtube_notification),
        )
        .route(
            "/api/webhook/twitter",
            get(twitter_challenge).post(twitter_notification),
        )
        .route("/api/ingest/urls", get(ingest_urls))
        .route("/api/ingest/rss", get(ingest_rss))
        .route("/api/ingest/twitter", get(ingest_twitter))
        .route("/api/subscriptions/subscribe", get(subscribe))
        .route("/api/subscriptions/unsubscribe", get(unsubscribe))
        .route("/api/cron", get(cron))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, String::new()),
    }
}

// --- webhook verification ---

/// Log who sent a rejected notification before dropping it.
fn log_webhook_rejection(provider: &'static str, headers: &HeaderMap) {
    let remote = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    let ua_lower = user_agent.to_ascii_lowercase();
    let looks_automated = ["bot", "crawler", "spider", "curl"]
        .iter()
        .any(|m| ua_lower.contains(m));
    warn!(
        provider,
        remote,
        user_agent,
        looks_automated,
        "webhook signature rejected"
    );
    counter!("webhook_rejected_total", "provider" => provider).increment(1);
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

// --- Atom notification decoding (quick-xml serde) ---

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@rel")]
    rel: Option<String>,
    #[serde(rename = "@href")]
    href: Option<String>,
}

/// Pull the video links out of an Atom push notification. Each entry
/// contributes its `rel="alternate"` link, or its first link as fallback.
fn atom_entry_links(xml: &str) -> Vec<String> {
    let Ok(feed) = from_str::<AtomFeed>(xml) else {
        return Vec::new();
    };
    feed.entries
        .into_iter()
        .filter_map(|entry| {
            entry
                .links
                .iter()
                .find(|l| l.rel.as_deref() == Some("alternate"))
                .or_else(|| entry.links.first())
                .and_then(|l| l.href.clone())
        })
        .filter(|href| !href.is_empty())
        .collect()
}

async fn youtube_challenge(Query(params): Query<HashMap<String, String>>) -> impl IntoResponse {
    match params.get("hub.challenge") {
        Some(challenge) => (StatusCode::OK, challenge.clone()),
        None => (StatusCode::BAD_REQUEST, "missing hub.challenge".into()),
    }
}

async fn youtube_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let verified = SignatureContext {
        scheme: SignatureScheme::Sha1Hex,
        secret: &state.config.youtube_hub_secret,
        payload: &body,
        provided: header_str(&headers, "x-hub-signature"),
    }
    .verify();

    if verified.is_err() {
        log_webhook_rejection("youtube", &headers);
        return (StatusCode::BAD_REQUEST, "Invalid Signature");
    }

    let xml = String::from_utf8_lossy(&body).into_owned();
    let links = atom_entry_links(&xml);
    if links.is_empty() {
        info!("notification carried no entry links");
        return (StatusCode::OK, "Update Received");
    }

    // Ack the hub now; the fetch-heavy ingest continues in the background.
    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        let outcome = pipeline.ingest_urls(&links, None).await;
        info!(
            inserted = outcome.inserted.len(),
            failed = outcome.failed(),
            "webhook ingest finished"
        );
    });

    (StatusCode::OK, "Update Received")
}

async fn twitter_challenge(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    match params.get("crc_token") {
        Some(token) => {
            let proof = challenge_proof(&state.config.twitter_api_secret, token);
            (StatusCode::OK, Json(json!({ "response_token": proof }))).into_response()
        }
        None => (StatusCode::BAD_REQUEST, "missing crc_token").into_response(),
    }
}

async fn twitter_notification(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let verified = SignatureContext {
        scheme: SignatureScheme::Sha256Base64,
        secret: &state.config.twitter_api_secret,
        payload: &body,
        provided: header_str(&headers, "x-twitter-webhooks-signature"),
    }
    .verify();

    if verified.is_err() {
        log_webhook_rejection("twitter", &headers);
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid signature" })),
        );
    }

    let notification: TweetNotification = match serde_json::from_slice(&body) {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "unparsable tweet notification");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid payload" })),
            );
        }
    };

    let inserted = ingest_tweets(
        state.articles.as_ref(),
        &notification.tweet_create_events,
        &state.config.public_base_url,
        false,
    )
    .await;

    (
        StatusCode::OK,
        Json(json!({ "inserted": inserted, "count": inserted.len() })),
    )
}

// --- batch ingest ---

#[derive(Debug, Deserialize)]
struct IngestParams {
    key: String,
    /// Comma-separated URL list.
    #[serde(default)]
    url: String,
    #[serde(default)]
    ad: bool,
    email: Option<String>,
}

fn split_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn batch_json(outcome: &BatchOutcome) -> serde_json::Value {
    let failed: Vec<serde_json::Value> = outcome
        .outcomes
        .iter()
        .filter_map(|o| {
            o.result
                .as_ref()
                .err()
                .map(|e| json!({ "url": o.url, "error": e.to_string() }))
        })
        .collect();
    json!({
        "articles": outcome.inserted,
        "count": outcome.inserted.len(),
        "failed": failed,
    })
}

fn unauthorized() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "unauthorized" })),
    )
}

fn error_json(e: &IngestError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match e {
        IngestError::SignatureMismatch => StatusCode::BAD_REQUEST,
        IngestError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        IngestError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_GATEWAY,
    };
    (status, Json(json!({ "error": e.to_string() })))
}

async fn ingest_urls(
    State(state): State<AppState>,
    Query(params): Query<IngestParams>,
) -> impl IntoResponse {
    if params.key != state.config.api_key {
        return unauthorized();
    }
    let urls = split_urls(&params.url);
    let patch = params.ad.then(|| RecordPatch::ad_override(params.email));
    let outcome = state.pipeline.ingest_urls(&urls, patch.as_ref()).await;
    (StatusCode::OK, Json(batch_json(&outcome)))
}

async fn ingest_rss(
    State(state): State<AppState>,
    Query(params): Query<IngestParams>,
) -> impl IntoResponse {
    if params.key != state.config.api_key {
        return unauthorized();
    }
    let feeds = split_urls(&params.url);
    let patch = params.ad.then(|| RecordPatch::ad_override(params.email));
    let now_ms = chrono::Utc::now().timestamp_millis();
    let outcome = state
        .pipeline
        .ingest_feeds(&feeds, patch.as_ref(), now_ms)
        .await;
    (StatusCode::OK, Json(batch_json(&outcome)))
}

#[derive(Debug, Deserialize)]
struct TimelineParams {
    key: String,
    /// Numeric user id on the social platform.
    id: String,
    #[serde(default)]
    ad: bool,
}

async fn ingest_twitter(
    State(state): State<AppState>,
    Query(params): Query<TimelineParams>,
) -> impl IntoResponse {
    if params.key != state.config.api_key {
        return unauthorized();
    }
    let Some(timeline) = &state.timeline else {
        return error_json(&IngestError::Configuration(
            "TWITTER_BEARER_TOKEN is not set".into(),
        ));
    };
    let events = match timeline.fetch_recent(&params.id).await {
        Ok(events) => events,
        Err(e) => return error_json(&e),
    };
    let inserted = ingest_tweets(
        state.articles.as_ref(),
        &events,
        &state.config.public_base_url,
        params.ad,
    )
    .await;
    (
        StatusCode::OK,
        Json(json!({ "inserted": inserted, "count": inserted.len() })),
    )
}

// --- subscription management ---

#[derive(Debug, Deserialize)]
struct SubscribeParams {
    key: String,
    /// Comma-separated topics: feed URLs or bare channel ids.
    topic: String,
    email: Option<String>,
    /// Lease duration in days.
    #[serde(default = "default_lease_days")]
    expires: i64,
}

fn default_lease_days() -> i64 {
    30
}

async fn subscribe(
    State(state): State<AppState>,
    Query(params): Query<SubscribeParams>,
) -> impl IntoResponse {
    if params.key != state.config.api_key {
        return unauthorized();
    }
    let now_ms = chrono::Utc::now().timestamp_millis();
    let lease_ms = params.expires.max(0) * 24 * 60 * 60 * 1000;
    let mut subscribed = Vec::new();
    let mut failed = Vec::new();
    for topic in split_urls(&params.topic) {
        match state
            .subscriptions
            .subscribe(&topic, params.email.as_deref(), lease_ms, now_ms)
            .await
        {
            Ok(t) => subscribed.push(t),
            Err(e) => {
                warn!(topic = %topic, error = %e, "subscribe failed");
                failed.push(json!({ "topic": topic, "error": e.to_string() }));
            }
        }
    }
    (
        StatusCode::OK,
        Json(json!({ "subscribed": subscribed, "failed": failed })),
    )
}

#[derive(Debug, Deserialize)]
struct UnsubscribeParams {
    key: String,
    topic: String,
}

async fn unsubscribe(
    State(state): State<AppState>,
    Query(params): Query<UnsubscribeParams>,
) -> impl IntoResponse {
    if params.key != state.config.api_key {
        return unauthorized();
    }
    let now_ms = chrono::Utc::now().timestamp_millis();
    match state.subscriptions.unsubscribe(&params.topic, now_ms).await {
        Ok(topic) => (StatusCode::OK, Json(json!({ "unsubscribed": topic }))),
        Err(e) => error_json(&e),
    }
}

// --- scheduled sweep ---

async fn cron(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let expected = format!("Bearer {}", state.config.cron_secret);
    if header_str(&headers, "authorization") != expected {
        return unauthorized();
    }

    let now_ms = chrono::Utc::now().timestamp_millis();
    let batch = match state.pipeline.cron_sweep(now_ms).await {
        Ok(batch) => batch,
        Err(e) => return error_json(&e),
    };
    let sweep = match state
        .subscriptions
        .renewal_sweep(now_ms, CRON_SWEEP_LOOKBACK_MS, CRON_SWEEP_LOOKAHEAD_MS)
        .await
    {
        Ok(sweep) => sweep,
        Err(e) => return error_json(&e),
    };

    (
        StatusCode::OK,
        Json(json!({
            "articles": batch.inserted,
            "count": batch.inserted.len(),
            "failed_items": batch.failed(),
            "renewed": sweep.renewed,
            "unsubscribed": sweep.unsubscribed,
            "failed_hub_calls": sweep.failed,
        })),
    )
}
