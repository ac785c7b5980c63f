//! HTTP clients
//!
//! [`HttpMpcNetwork`] forwards signature requests to the MPC signing network;
//! [`RelayClient`] talks to a running relay service on behalf of a caller
//! holding an identity token.

use crate::error::{RelayError, Result};
use crate::types::{ApiResponse, CreateSignatureBody, SignatureCreated};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use fastauth_core::relay::{MpcNetwork, MpcResponse, MpcSignRequest, ResponseSink};
use fastauth_core::{PayloadKind, Signature, SignatureRequest};
use reqwest::{Client, StatusCode};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Path appended to the MPC base URL
pub const MPC_SIGN_PATH: &str = "/sign";

fn http_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

// ============================================================================
// MPC network
// ============================================================================

/// Forwards requests with `POST {base_url}/sign`
///
/// The MPC network may answer in the response body (`{ requestId, signature }`
/// or `{ requestId, error }`), which is handed to the connected sink, or later
/// through the relay's callback endpoint.
#[derive(Clone)]
pub struct HttpMpcNetwork {
    client: Client,
    sign_url: String,
    sink: Arc<RwLock<Option<Arc<dyn ResponseSink>>>>,
}

impl HttpMpcNetwork {
    pub fn new(base_url: impl AsRef<str>) -> Self {
        Self {
            client: http_client(Duration::from_secs(10)),
            sign_url: format!("{}{}", base_url.as_ref().trim_end_matches('/'), MPC_SIGN_PATH),
            sink: Arc::new(RwLock::new(None)),
        }
    }

    /// Use a preconfigured HTTP client
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Where inline responses are delivered
    pub fn connect(&self, sink: Arc<dyn ResponseSink>) {
        *self.sink.write() = Some(sink);
    }

    pub fn sign_url(&self) -> &str {
        &self.sign_url
    }

    fn deliver_inline(&self, body: &[u8]) {
        if body.iter().all(u8::is_ascii_whitespace) {
            return;
        }
        let response: MpcResponse = match serde_json::from_slice(body) {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "MPC acknowledgement carries no response");
                return;
            }
        };
        let sink = self.sink.read().clone();
        match sink {
            Some(sink) => {
                sink.on_mpc_response(response);
            }
            None => warn!(
                request_id = %response.request_id,
                "Inline MPC response dropped: no sink connected"
            ),
        }
    }
}

#[async_trait]
impl MpcNetwork for HttpMpcNetwork {
    async fn forward(&self, request: MpcSignRequest) -> fastauth_core::Result<()> {
        let response = self
            .client
            .post(&self.sign_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| fastauth_core::Error::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(fastauth_core::Error::Network(format!(
                "MPC network returned {}: {}",
                status,
                body.trim()
            )));
        }

        if status != StatusCode::NO_CONTENT {
            let body = response
                .bytes()
                .await
                .map_err(|e| fastauth_core::Error::Network(e.to_string()))?;
            self.deliver_inline(&body);
        }
        Ok(())
    }
}

impl std::fmt::Debug for HttpMpcNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpMpcNetwork")
            .field("sign_url", &self.sign_url)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Relay client
// ============================================================================

/// Relay client configuration
#[derive(Debug, Clone)]
pub struct RelayClientConfig {
    /// Relay service URL
    pub url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Poll interval used by `wait_for_signature`
    pub poll_interval_ms: u64,
}

impl RelayClientConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
            timeout_secs: 30,
            poll_interval_ms: 250,
        }
    }

    pub fn with_poll_interval(mut self, millis: u64) -> Self {
        self.poll_interval_ms = millis;
        self
    }
}

/// Relay client for HTTP communication
#[derive(Debug, Clone)]
pub struct RelayClient {
    config: RelayClientConfig,
    client: Client,
}

impl RelayClient {
    pub fn new(config: RelayClientConfig) -> Self {
        Self {
            client: http_client(Duration::from_secs(config.timeout_secs)),
            config,
        }
    }

    /// Create with default configuration
    pub fn with_url(url: impl Into<String>) -> Self {
        Self::new(RelayClientConfig::new(url))
    }

    /// Submit a signature request authenticated by `token`
    pub async fn request_signature(
        &self,
        token: &str,
        payload: &[u8],
        algorithm: &str,
        kind: PayloadKind,
    ) -> Result<SignatureCreated> {
        let body = CreateSignatureBody {
            account_path: None,
            payload_base64: STANDARD.encode(payload),
            algorithm: algorithm.to_string(),
            kind,
        };
        let url = format!("{}/v1/signatures", self.config.url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::Network(e.to_string()))?;
        into_result(response).await
    }

    /// Current state of a request owned by `token`'s account
    pub async fn get_signature_request(
        &self,
        token: &str,
        request_id: &str,
    ) -> Result<SignatureRequest> {
        let url = format!("{}/v1/signatures/{}", self.config.url, request_id);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| RelayError::Network(e.to_string()))?;
        into_result(response).await
    }

    /// Cancel a pending request owned by `token`'s account
    pub async fn cancel_signature_request(&self, token: &str, request_id: &str) -> Result<bool> {
        let url = format!("{}/v1/signatures/{}", self.config.url, request_id);
        let response = self
            .client
            .delete(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| RelayError::Network(e.to_string()))?;
        let value: serde_json::Value = into_result(response).await?;
        Ok(value
            .get("cancelled")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false))
    }

    /// Poll until the request settles or `timeout` passes
    pub async fn wait_for_signature(
        &self,
        token: &str,
        request_id: &str,
        timeout: Duration,
    ) -> Result<Signature> {
        let deadline = tokio::time::Instant::now() + timeout;
        let interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            let request = self.get_signature_request(token, request_id).await?;
            if let Some(outcome) = request.status().outcome(request_id) {
                return outcome.map_err(RelayError::from);
            }
            if tokio::time::Instant::now() + interval > deadline {
                return Err(RelayError::Network(format!(
                    "timed out waiting for signature request {}",
                    request_id
                )));
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// Relay liveness
    pub async fn health(&self) -> Result<bool> {
        let url = format!("{}/health", self.config.url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RelayError::Network(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

/// Decode an `ApiResponse`, mapping failures back onto core errors where the
/// status code identifies one
async fn into_result<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let body: ApiResponse<T> = response
        .json()
        .await
        .map_err(|e| RelayError::Network(e.to_string()))?;

    if body.success {
        return body
            .data
            .ok_or_else(|| RelayError::Internal("No data in response".to_string()));
    }

    let message = body.error.unwrap_or_else(|| "Unknown error".to_string());
    Err(match status {
        StatusCode::UNAUTHORIZED => RelayError::Unauthorized(message),
        StatusCode::NOT_FOUND => RelayError::Core(fastauth_core::Error::NotFound(message)),
        StatusCode::BAD_REQUEST => RelayError::Core(fastauth_core::Error::InvalidRequest(message)),
        s if s.is_server_error() => RelayError::Network(message),
        _ => RelayError::Internal(message),
    })
}
