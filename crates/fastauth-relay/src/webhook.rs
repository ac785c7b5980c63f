//! Webhook notification service
//!
//! Pushes terminal signature request transitions to external services.
//! Deliveries are retried with exponential backoff; the signature requests
//! themselves are never retried.

use crate::error::{RelayError, Result};
use chrono::{DateTime, Utc};
use fastauth_core::relay::RequestEvent;
use fastauth_core::{AccountPath, RequestId, RequestStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[cfg(feature = "client")]
use crate::types::WEBHOOK_SIGNATURE_HEADER;
#[cfg(feature = "client")]
use tracing::error;

#[cfg(not(feature = "client"))]
use tracing::info;

/// Webhook configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Webhook URL
    pub url: String,
    /// Optional secret for HMAC signature
    #[serde(default, skip_serializing)]
    pub secret: Option<String>,
    /// Events to subscribe to
    #[serde(default = "WebhookEvent::all")]
    pub events: Vec<WebhookEvent>,
    /// Headers to include
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Retry configuration
    #[serde(default)]
    pub retry_config: RetryConfig,
    /// Whether the webhook is enabled
    #[serde(default = "enabled")]
    pub enabled: bool,
}

fn enabled() -> bool {
    true
}

impl WebhookConfig {
    /// Create a new webhook config subscribed to every event
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            secret: None,
            events: WebhookEvent::all(),
            headers: HashMap::new(),
            retry_config: RetryConfig::default(),
            enabled: true,
        }
    }

    /// Set webhook secret for HMAC signing
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Set events to subscribe to
    pub fn with_events(mut self, events: Vec<WebhookEvent>) -> Self {
        self.events = events;
        self
    }

    /// Add a header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set retry configuration
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Check if subscribed to event
    pub fn is_subscribed(&self, event: &WebhookEvent) -> bool {
        self.enabled && self.events.contains(event)
    }
}

/// Webhook events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEvent {
    /// The MPC network returned a signature
    RequestResolved,
    /// The MPC network declined, was unreachable, or the request was cancelled
    RequestRejected,
    /// No MPC response within the timeout window
    RequestExpired,
}

impl WebhookEvent {
    pub fn all() -> Vec<WebhookEvent> {
        vec![
            WebhookEvent::RequestResolved,
            WebhookEvent::RequestRejected,
            WebhookEvent::RequestExpired,
        ]
    }

    /// Event for a terminal status; `None` while pending
    pub fn for_status(status: &RequestStatus) -> Option<WebhookEvent> {
        match status {
            RequestStatus::Pending => None,
            RequestStatus::Resolved { .. } => Some(WebhookEvent::RequestResolved),
            RequestStatus::Rejected { .. } => Some(WebhookEvent::RequestRejected),
            RequestStatus::Expired => Some(WebhookEvent::RequestExpired),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEvent::RequestResolved => "request_resolved",
            WebhookEvent::RequestRejected => "request_rejected",
            WebhookEvent::RequestExpired => "request_expired",
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum retry attempts
    pub max_attempts: u32,
    /// Initial delay in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before the attempt following one that waited `delay_ms`
    pub fn next_delay(&self, delay_ms: u64) -> u64 {
        ((delay_ms as f64 * self.backoff_multiplier) as u64).min(self.max_delay_ms)
    }
}

/// Webhook payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Event type
    pub event: WebhookEvent,
    /// Event timestamp
    pub timestamp: DateTime<Utc>,
    pub request_id: RequestId,
    pub account_path: AccountPath,
    /// Event-specific data
    pub data: WebhookData,
}

/// Terminal state carried by a webhook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookData {
    pub status: String,
    /// Base64 signature for resolved requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WebhookPayload {
    /// Payload for a coordinator event, `None` if the request is not terminal
    pub fn from_event(event: &RequestEvent) -> Option<Self> {
        let request = &event.request;
        let kind = WebhookEvent::for_status(request.status())?;
        let reason = match request.status() {
            RequestStatus::Rejected { reason } => Some(reason.to_string()),
            _ => None,
        };

        Some(Self {
            event: kind,
            timestamp: Utc::now(),
            request_id: request.id().to_string(),
            account_path: request.account_path().to_string(),
            data: WebhookData {
                status: request.status().name().to_string(),
                signature: request.status().signature().map(|s| s.to_base64()),
                reason,
                completed_at: request.completed_at(),
            },
        })
    }
}

/// Delivery status for a webhook
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryStatus {
    /// Webhook URL
    pub url: String,
    /// Whether delivery succeeded
    pub success: bool,
    /// HTTP status code (if available)
    pub status_code: Option<u16>,
    /// Number of attempts
    pub attempts: u32,
    /// Error message (if failed)
    pub error: Option<String>,
    /// Delivery timestamp
    pub delivered_at: DateTime<Utc>,
}

/// Webhook service for sending notifications
#[derive(Clone)]
pub struct WebhookService {
    /// Configured webhooks
    webhooks: Arc<RwLock<Vec<WebhookConfig>>>,
    /// HTTP client
    #[cfg(feature = "client")]
    client: reqwest::Client,
    /// Delivery history (for debugging)
    delivery_history: Arc<RwLock<Vec<DeliveryStatus>>>,
    /// Maximum history entries
    max_history: usize,
}

impl WebhookService {
    /// Create a new webhook service
    pub fn new() -> Self {
        Self {
            webhooks: Arc::new(RwLock::new(Vec::new())),
            #[cfg(feature = "client")]
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            delivery_history: Arc::new(RwLock::new(Vec::new())),
            max_history: 1000,
        }
    }

    /// Add a webhook configuration, replacing one with the same URL
    pub async fn add_webhook(&self, config: WebhookConfig) {
        let mut webhooks = self.webhooks.write().await;
        webhooks.retain(|w| w.url != config.url);
        webhooks.push(config);
    }

    /// Remove a webhook by URL; returns whether one was removed
    pub async fn remove_webhook(&self, url: &str) -> bool {
        let mut webhooks = self.webhooks.write().await;
        let before = webhooks.len();
        webhooks.retain(|w| w.url != url);
        webhooks.len() != before
    }

    /// Get all configured webhooks
    pub async fn list_webhooks(&self) -> Vec<WebhookConfig> {
        self.webhooks.read().await.clone()
    }

    /// Forward coordinator events to webhooks until the channel closes
    pub fn spawn_dispatcher(&self, mut events: broadcast::Receiver<RequestEvent>) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => service.notify(&event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Webhook dispatcher lagged behind coordinator events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("Webhook dispatcher stopped");
        })
    }

    /// Notify subscribers of a terminal transition
    pub async fn notify(&self, event: &RequestEvent) {
        if let Some(payload) = WebhookPayload::from_event(event) {
            self.send_event(payload).await;
        }
    }

    /// Send event to all subscribed webhooks
    async fn send_event(&self, payload: WebhookPayload) {
        let webhooks = self.webhooks.read().await;
        let subscribed: Vec<_> = webhooks
            .iter()
            .filter(|w| w.is_subscribed(&payload.event))
            .cloned()
            .collect();
        drop(webhooks);

        for webhook in subscribed {
            let payload_clone = payload.clone();
            let service = self.clone();

            tokio::spawn(async move {
                service.deliver(&webhook, payload_clone).await;
            });
        }
    }

    /// Deliver payload to a webhook with retries
    #[cfg(feature = "client")]
    async fn deliver(&self, webhook: &WebhookConfig, payload: WebhookPayload) {
        let payload_json = match serde_json::to_string(&payload) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize webhook payload: {}", e);
                return;
            }
        };

        let signature = match &webhook.secret {
            Some(secret) => match compute_hmac_signature(secret.as_bytes(), payload_json.as_bytes()) {
                Ok(signature) => Some(signature),
                Err(e) => {
                    error!(url = %webhook.url, error = %e, "Failed to sign webhook payload");
                    return;
                }
            },
            None => None,
        };

        let mut attempt = 0;
        let mut delay_ms = webhook.retry_config.initial_delay_ms;

        loop {
            attempt += 1;

            let mut request = self
                .client
                .post(&webhook.url)
                .header("Content-Type", "application/json")
                .header("X-Webhook-Event", payload.event.as_str())
                .header("X-Delivery-Attempt", attempt.to_string());

            for (key, value) in &webhook.headers {
                request = request.header(key, value);
            }

            if let Some(signature) = &signature {
                request = request.header(WEBHOOK_SIGNATURE_HEADER, signature);
            }

            let result = request.body(payload_json.clone()).send().await;

            match result {
                Ok(response) => {
                    let status_code = response.status().as_u16();
                    let success = response.status().is_success();

                    if success {
                        self.record_delivery(DeliveryStatus {
                            url: webhook.url.clone(),
                            success,
                            status_code: Some(status_code),
                            attempts: attempt,
                            error: None,
                            delivered_at: Utc::now(),
                        })
                        .await;

                        debug!(
                            url = %webhook.url,
                            event = payload.event.as_str(),
                            request_id = %payload.request_id,
                            "Webhook delivered successfully"
                        );
                        return;
                    }

                    warn!(
                        url = %webhook.url,
                        status = status_code,
                        attempt,
                        "Webhook delivery failed"
                    );
                }
                Err(e) => {
                    warn!(
                        url = %webhook.url,
                        error = %e,
                        attempt,
                        "Webhook request failed"
                    );
                }
            }

            if attempt >= webhook.retry_config.max_attempts {
                error!(
                    url = %webhook.url,
                    event = payload.event.as_str(),
                    request_id = %payload.request_id,
                    attempts = attempt,
                    "Webhook delivery failed after max retries"
                );

                self.record_delivery(DeliveryStatus {
                    url: webhook.url.clone(),
                    success: false,
                    status_code: None,
                    attempts: attempt,
                    error: Some("Max retries exceeded".to_string()),
                    delivered_at: Utc::now(),
                })
                .await;

                return;
            }

            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            delay_ms = webhook.retry_config.next_delay(delay_ms);
        }
    }

    /// Deliver (stub for non-client builds)
    #[cfg(not(feature = "client"))]
    async fn deliver(&self, webhook: &WebhookConfig, payload: WebhookPayload) {
        info!(
            url = %webhook.url,
            event = payload.event.as_str(),
            "Webhook delivery (client feature disabled)"
        );
    }

    /// Record delivery status
    #[cfg(feature = "client")]
    async fn record_delivery(&self, status: DeliveryStatus) {
        let mut history = self.delivery_history.write().await;
        history.push(status);

        if history.len() > self.max_history {
            let excess = history.len() - self.max_history;
            history.drain(0..excess);
        }
    }

    /// Get recent delivery history, newest first
    pub async fn get_delivery_history(&self, limit: usize) -> Vec<DeliveryStatus> {
        let history = self.delivery_history.read().await;
        history.iter().rev().take(limit).cloned().collect()
    }

    /// Get delivery statistics
    pub async fn get_stats(&self) -> WebhookStats {
        let webhooks_configured = self.webhooks.read().await.len();
        let history = self.delivery_history.read().await;
        let total = history.len() as u64;
        let successful = history.iter().filter(|d| d.success).count() as u64;

        WebhookStats {
            total_deliveries: total,
            successful_deliveries: successful,
            failed_deliveries: total - successful,
            success_rate: if total > 0 {
                successful as f64 / total as f64
            } else {
                0.0
            },
            webhooks_configured,
        }
    }
}

impl Default for WebhookService {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WebhookService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookService")
            .field("max_history", &self.max_history)
            .finish_non_exhaustive()
    }
}

/// Webhook statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookStats {
    /// Total deliveries attempted
    pub total_deliveries: u64,
    /// Successful deliveries
    pub successful_deliveries: u64,
    /// Failed deliveries
    pub failed_deliveries: u64,
    /// Success rate (0.0 - 1.0)
    pub success_rate: f64,
    /// Number of webhooks configured
    pub webhooks_configured: usize,
}

/// HMAC-SHA256 of `payload` as `sha256=<hex>`
pub fn compute_hmac_signature(secret: &[u8], payload: &[u8]) -> Result<String> {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret)
        .map_err(|e| RelayError::Internal(format!("HMAC key: {}", e)))?;
    mac.update(payload);

    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Check a `sha256=<hex>` header value in constant time
pub fn verify_hmac_signature(secret: &[u8], payload: &[u8], header: &str) -> bool {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let Some(expected) = header.trim().strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(expected) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}
