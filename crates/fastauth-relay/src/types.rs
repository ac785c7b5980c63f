//! Wire types shared by the relay server and client

use fastauth_core::relay::CoordinatorStats;
use fastauth_core::{AccountPath, PayloadKind, RequestId};
use serde::{Deserialize, Serialize};

/// Name of the header carrying the MPC callback HMAC
pub const MPC_SIGNATURE_HEADER: &str = "x-mpc-signature";

/// Name of the header carrying the webhook HMAC
pub const WEBHOOK_SIGNATURE_HEADER: &str = "x-webhook-signature";

/// API response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Body of `POST /v1/signatures`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSignatureBody {
    /// Must match the bearer's account path when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_path: Option<AccountPath>,
    pub payload_base64: String,
    pub algorithm: String,
    /// Ignored by the kind-specific routes
    #[serde(default)]
    pub kind: PayloadKind,
}

/// Reply to a successful submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureCreated {
    pub request_id: RequestId,
    pub status: String,
}

/// Reply to an MPC callback
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackAck {
    /// Whether the response settled a pending request
    pub applied: bool,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service name
    pub service: String,
    /// Version
    pub version: String,
    /// Uptime in seconds
    pub uptime_secs: u64,
    /// Requests awaiting an MPC response
    pub pending_requests: usize,
    /// Issuers whose tokens are accepted
    pub trusted_issuers: usize,
}

/// Statistics response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub total_submitted: u64,
    pub total_resolved: u64,
    pub total_rejected: u64,
    pub total_expired: u64,
    pub total_cancelled: u64,
    pub pending: usize,
    /// Resolved / settled, 0 when nothing settled yet
    pub resolution_rate: f64,
    /// Active webhooks count
    pub active_webhooks: usize,
    pub webhook_deliveries: u64,
    pub failed_webhook_deliveries: u64,
}

impl StatsResponse {
    pub fn new(stats: &CoordinatorStats, active_webhooks: usize) -> Self {
        let settled = stats.total_resolved
            + stats.total_rejected
            + stats.total_expired
            + stats.total_cancelled;
        let resolution_rate = if settled > 0 {
            stats.total_resolved as f64 / settled as f64
        } else {
            0.0
        };

        Self {
            total_submitted: stats.total_submitted,
            total_resolved: stats.total_resolved,
            total_rejected: stats.total_rejected,
            total_expired: stats.total_expired,
            total_cancelled: stats.total_cancelled,
            pending: stats.pending,
            resolution_rate,
            active_webhooks,
            webhook_deliveries: 0,
            failed_webhook_deliveries: 0,
        }
    }
}
