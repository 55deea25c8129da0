// src/subscription.rs
//! Hub subscription lifecycle: subscribe, renew, expire, unsubscribe.
//!
//! Talks PubSubHubbub-style to the external hub with form-encoded POSTs.
//! Removal is hub-driven and graceful: an explicit unsubscribe only moves
//! `expires_at` to now, and the next sweep issues the actual
//! `hub.mode=unsubscribe` call. Re-running a sweep before its next
//! scheduled slot produces the same hub calls.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use tracing::{info, warn};

use crate::error::{IngestError, IngestResult};
use crate::store::SubscriptionStore;

/// Maximum lease the protocol accepts, in seconds. Requested durations
/// above this are clamped.
pub const MAX_LEASE_SECONDS: u64 = 172_800;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubMode {
    Subscribe,
    Unsubscribe,
}

impl HubMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            HubMode::Subscribe => "subscribe",
            HubMode::Unsubscribe => "unsubscribe",
        }
    }
}

/// The topic URL the video platform publishes channel updates on.
pub fn channel_topic_url(channel_id: &str) -> String {
    format!(
        "https://www.youtube.com/xml/feeds/videos.xml?channel_id={}",
        urlencoding::encode(channel_id)
    )
}

pub fn clamp_lease_seconds(requested: u64) -> u64 {
    requested.min(MAX_LEASE_SECONDS)
}

/// Subscription rows store either a full feed URL or a bare channel id.
/// The hub always needs a topic URL, so bare channel ids are wrapped.
pub fn hub_topic_for(topic: &str) -> String {
    if topic.starts_with("http://") || topic.starts_with("https://") {
        topic.to_string()
    } else {
        channel_topic_url(topic)
    }
}

/// Build the form body for one hub request.
pub fn hub_form(
    callback: &str,
    mode: HubMode,
    topic: &str,
    secret: &str,
    lease_seconds: Option<u64>,
) -> Vec<(&'static str, String)> {
    let mut form = vec![
        ("hub.callback", callback.to_string()),
        ("hub.mode", mode.as_str().to_string()),
        ("hub.topic", topic.to_string()),
        ("hub.secret", secret.to_string()),
    ];
    if let Some(lease) = lease_seconds {
        form.push(("hub.expires", clamp_lease_seconds(lease).to_string()));
    }
    form
}

/// Outbound hub transport. A trait seam so sweeps are testable without a
/// live hub.
#[async_trait]
pub trait HubTransport: Send + Sync {
    async fn send(
        &self,
        mode: HubMode,
        topic: &str,
        lease_seconds: Option<u64>,
    ) -> IngestResult<()>;
}

/// Real hub client issuing form-encoded POSTs.
#[derive(Clone)]
pub struct HubClient {
    client: reqwest::Client,
    hub_url: String,
    callback_url: String,
    secret: String,
}

impl HubClient {
    pub fn new(
        hub_url: String,
        callback_url: String,
        secret: String,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            hub_url,
            callback_url,
            secret,
        }
    }
}

#[async_trait]
impl HubTransport for HubClient {
    async fn send(
        &self,
        mode: HubMode,
        topic: &str,
        lease_seconds: Option<u64>,
    ) -> IngestResult<()> {
        let topic_url = hub_topic_for(topic);
        let form = hub_form(
            &self.callback_url,
            mode,
            &topic_url,
            &self.secret,
            lease_seconds,
        );
        let response = self
            .client
            .post(&self.hub_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| IngestError::fetch(&self.hub_url, e))?;

        counter!("hub_calls_total").increment(1);

        if response.status().is_success() {
            Ok(())
        } else {
            Err(IngestError::fetch(
                &self.hub_url,
                format!("hub rejected {} for {topic}: {}", mode.as_str(), response.status()),
            ))
        }
    }
}

/// Aggregate result of one renewal sweep.
#[derive(Debug, Default, PartialEq)]
pub struct SweepOutcome {
    pub renewed: Vec<String>,
    pub unsubscribed: Vec<String>,
    pub failed: usize,
}

/// Per-topic subscription state tracking plus hub calls.
pub struct SubscriptionManager {
    hub: Arc<dyn HubTransport>,
    store: Arc<dyn SubscriptionStore>,
}

impl SubscriptionManager {
    pub fn new(hub: Arc<dyn HubTransport>, store: Arc<dyn SubscriptionStore>) -> Self {
        Self { hub, store }
    }

    /// Register `topic` with the hub and persist its lease. The hub sees a
    /// capped lease; the stored `expires_at` keeps the caller's requested
    /// duration so long-lived sponsorships outlast individual hub leases.
    pub async fn subscribe(
        &self,
        topic: &str,
        email: Option<&str>,
        lease_duration_ms: i64,
        now_ms: i64,
    ) -> IngestResult<String> {
        let lease_seconds = (lease_duration_ms / 1000).max(0) as u64;
        self.hub
            .send(HubMode::Subscribe, topic, Some(lease_seconds))
            .await?;
        let expires_at = now_ms + lease_duration_ms;
        self.store
            .upsert_subscription(topic, email, expires_at)
            .await?;
        info!(topic, expires_at, "subscribed topic");
        Ok(topic.to_string())
    }

    /// Graceful removal: mark the topic expired now and let the next sweep
    /// issue the hub unsubscribe.
    pub async fn unsubscribe(&self, topic: &str, now_ms: i64) -> IngestResult<String> {
        let existing = self.store.find_subscription(topic).await?;
        let email = existing.as_ref().and_then(|s| s.email.clone());
        self.store
            .upsert_subscription(topic, email.as_deref(), now_ms)
            .await?;
        info!(topic, "marked topic for unsubscription");
        Ok(topic.to_string())
    }

    /// Enumerate topics whose expiry falls inside `[now - lookback_ms,
    /// now + lookahead_ms]` and either renew or unsubscribe each one. A
    /// failed hub call for one topic never blocks the others, and
    /// re-running the sweep issues the same calls again.
    pub async fn renewal_sweep(
        &self,
        now_ms: i64,
        lookback_ms: i64,
        lookahead_ms: i64,
    ) -> IngestResult<SweepOutcome> {
        let rows = self.store.query_subscriptions(now_ms - lookback_ms).await?;
        let mut outcome = SweepOutcome::default();

        for row in rows {
            if row.expires_at > now_ms + lookahead_ms {
                continue; // not due yet
            }
            let remaining_ms = row.expires_at - now_ms;
            let result = if remaining_ms > 0 {
                self.hub
                    .send(
                        HubMode::Subscribe,
                        &row.topic,
                        Some((remaining_ms / 1000) as u64),
                    )
                    .await
                    .map(|_| outcome.renewed.push(row.topic.clone()))
            } else {
                self.hub
                    .send(HubMode::Unsubscribe, &row.topic, None)
                    .await
                    .map(|_| outcome.unsubscribed.push(row.topic.clone()))
            };

            if let Err(e) = result {
                warn!(topic = %row.topic, error = %e, "hub call failed during sweep");
                outcome.failed += 1;
            }
        }

        info!(
            renewed = outcome.renewed.len(),
            unsubscribed = outcome.unsubscribed.len(),
            failed = outcome.failed,
            "renewal sweep finished"
        );
        Ok(outcome)
    }
}
