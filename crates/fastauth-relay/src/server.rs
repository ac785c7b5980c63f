//! HTTP/WebSocket server for the signature relay
//!
//! Exposes the signing gateway over REST, accepts MPC network answers on a
//! push callback, and streams request status over WebSocket.
//!
//! ## Production Features
//!
//! - Graceful shutdown on SIGTERM/SIGINT
//! - Request timeout middleware
//! - CORS configuration
//! - Health checks and statistics
//! - Webhook delivery of terminal transitions

use crate::error::RelayError;
use crate::types::{
    ApiResponse, CallbackAck, CreateSignatureBody, HealthResponse, MPC_SIGNATURE_HEADER,
    SignatureCreated, StatsResponse,
};
use crate::webhook::{self, WebhookConfig, WebhookEvent, WebhookService};
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State, WebSocketUpgrade, ws::Message, ws::WebSocket},
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine, engine::general_purpose::STANDARD};
use fastauth_core::relay::{MpcResponse, SignatureHandle};
use fastauth_core::{PayloadKind, SigningGateway};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// Relay server configuration
#[derive(Clone)]
pub struct RelayServerConfig {
    /// Base URL for the service
    pub base_url: String,
    /// Cleanup interval in seconds
    pub cleanup_interval_secs: u64,
    /// Enable CORS
    pub cors_enabled: bool,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
    /// Shutdown grace period in seconds
    pub shutdown_timeout_secs: u64,
    /// Shared secret authenticating MPC callbacks
    pub mpc_callback_secret: Option<String>,
    /// Accept MPC callbacks without a signature when no secret is set
    pub insecure_mpc_callback: bool,
    /// Operator bearer token for webhook management; routes are disabled without it
    pub admin_token: Option<String>,
}

impl Default for RelayServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            cleanup_interval_secs: 60,
            cors_enabled: true,
            request_timeout_secs: 30,
            shutdown_timeout_secs: 5,
            mpc_callback_secret: None,
            insecure_mpc_callback: false,
            admin_token: None,
        }
    }
}

impl RelayServerConfig {
    /// Create with custom base URL
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set request timeout
    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Set shutdown grace period
    pub fn with_shutdown_timeout(mut self, secs: u64) -> Self {
        self.shutdown_timeout_secs = secs;
        self
    }

    /// Set how often terminal requests past retention are dropped
    pub fn with_cleanup_interval(mut self, secs: u64) -> Self {
        self.cleanup_interval_secs = secs;
        self
    }

    /// Require `X-Mpc-Signature` on MPC callbacks
    pub fn with_mpc_callback_secret(mut self, secret: impl Into<String>) -> Self {
        self.mpc_callback_secret = Some(secret.into());
        self
    }

    /// Accept unsigned MPC callbacks
    ///
    /// Anyone who learns a request id can then settle it.
    pub fn with_insecure_mpc_callback(mut self) -> Self {
        self.insecure_mpc_callback = true;
        self
    }

    /// Enable `/v1/webhooks`, authenticated by `token`
    pub fn with_admin_token(mut self, token: impl Into<String>) -> Self {
        self.admin_token = Some(token.into());
        self
    }

    /// Disable CORS
    pub fn without_cors(mut self) -> Self {
        self.cors_enabled = false;
        self
    }
}

impl std::fmt::Debug for RelayServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServerConfig")
            .field("base_url", &self.base_url)
            .field("cleanup_interval_secs", &self.cleanup_interval_secs)
            .field("cors_enabled", &self.cors_enabled)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("shutdown_timeout_secs", &self.shutdown_timeout_secs)
            .field(
                "mpc_callback_secret",
                &self.mpc_callback_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("insecure_mpc_callback", &self.insecure_mpc_callback)
            .field("admin_token", &self.admin_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Application state shared across handlers
pub struct AppState {
    /// Token validation and request submission
    pub gateway: SigningGateway,
    /// Webhook service
    pub webhooks: WebhookService,
    /// Service start time
    pub started_at: Instant,
    /// Configuration
    pub config: RelayServerConfig,
}

/// Signature relay service
pub struct FastAuthRelayService {
    state: Arc<AppState>,
}

impl FastAuthRelayService {
    /// Create a new relay service over `gateway`
    pub fn new(gateway: SigningGateway, config: RelayServerConfig) -> Self {
        let state = Arc::new(AppState {
            gateway,
            webhooks: WebhookService::new(),
            started_at: Instant::now(),
            config,
        });

        Self { state }
    }

    pub fn gateway(&self) -> &SigningGateway {
        &self.state.gateway
    }

    /// Get a reference to the webhook service
    pub fn webhooks(&self) -> &WebhookService {
        &self.state.webhooks
    }

    /// Add a webhook
    pub async fn add_webhook(&self, config: WebhookConfig) {
        self.state.webhooks.add_webhook(config).await;
    }

    /// Build the router
    pub fn router(&self) -> Router {
        let state = Arc::clone(&self.state);
        let timeout = Duration::from_secs(self.state.config.request_timeout_secs);

        let mut router = Router::new()
            // Health and stats
            .route("/health", get(health))
            .route("/ready", get(ready))
            .route("/stats", get(stats))
            // Signature requests
            .route("/v1/signatures", post(create_signature))
            .route("/v1/signatures/transaction", post(create_transaction_signature))
            .route(
                "/v1/signatures/delegate-action",
                post(create_delegate_action_signature),
            )
            .route(
                "/v1/signatures/{request_id}",
                get(get_signature).delete(cancel_signature),
            )
            .route("/v1/signatures/{request_id}/stream", get(signature_stream))
            // MPC network callback
            .route("/v1/mpc/responses", post(mpc_callback))
            // Webhook management
            .route(
                "/v1/webhooks",
                get(list_webhooks).post(add_webhook).delete(remove_webhook),
            )
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(timeout_layer(timeout)),
            )
            .with_state(state);

        if self.state.config.cors_enabled {
            router = router.layer(CorsLayer::permissive());
        }

        router
    }

    /// Start the relay service with graceful shutdown on SIGINT/SIGTERM
    pub async fn serve(self, addr: impl Into<SocketAddr>) -> anyhow::Result<()> {
        let addr = addr.into();
        let listener = TcpListener::bind(addr).await?;
        self.serve_with_shutdown(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `signal` completes
    ///
    /// Pending requests are cancelled once the listener stops, so webhooks
    /// see a terminal event for every request.
    pub async fn serve_with_shutdown<F>(self, listener: TcpListener, signal: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let state = Arc::clone(&self.state);
        let shutdown_timeout = Duration::from_secs(state.config.shutdown_timeout_secs);

        let cleanup_state = Arc::clone(&state);
        let cleanup_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(
                cleanup_state.config.cleanup_interval_secs.max(1),
            ));
            loop {
                interval.tick().await;
                let removed = cleanup_state.gateway.coordinator().cleanup();
                if removed > 0 {
                    debug!(removed, "Dropped settled signature requests");
                }
            }
        });

        let dispatcher = state
            .webhooks
            .spawn_dispatcher(state.gateway.coordinator().subscribe());

        info!(
            address = %listener.local_addr()?,
            issuer = %state.gateway.issuer(),
            "Starting signature relay service"
        );
        if state.config.mpc_callback_secret.is_none() {
            if state.config.insecure_mpc_callback {
                warn!("MPC callbacks are accepted without a signature");
            } else {
                info!("MPC callbacks disabled without a callback secret; only inline replies apply");
            }
        }
        if state.config.admin_token.is_none() {
            debug!("Webhook management routes disabled without an admin token");
        }

        let router = self.router();
        axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await?;

        info!("Shutdown signal received, cleaning up...");

        cleanup_handle.abort();
        let cancelled = state.gateway.coordinator().shutdown();
        if cancelled > 0 {
            info!(cancelled, "Cancelled pending signature requests");
        }

        // Webhook deliveries for the final events
        let webhooks_configured = state.webhooks.get_stats().await.webhooks_configured;
        if cancelled > 0 && webhooks_configured > 0 {
            tokio::time::sleep(shutdown_timeout).await;
        }
        dispatcher.abort();

        info!("Relay service stopped");
        Ok(())
    }
}

/// Request timeout answering `408 Request Timeout`
fn timeout_layer(timeout: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, timeout)
}

/// Graceful shutdown signal handler
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// API error response that implements IntoResponse
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn from_relay_error(e: RelayError) -> Self {
        Self {
            status: StatusCode::from_u16(e.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            message: e.to_string(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ApiResponse::<()>::error(&self.message));
        (self.status, body).into_response()
    }
}

impl From<RelayError> for ApiError {
    fn from(e: RelayError) -> Self {
        Self::from_relay_error(e)
    }
}

impl From<fastauth_core::Error> for ApiError {
    fn from(e: fastauth_core::Error) -> Self {
        Self::from_relay_error(RelayError::Core(e))
    }
}

// ============================================================================
// Request Types
// ============================================================================

/// Add webhook request
#[derive(Debug, Deserialize)]
pub struct AddWebhookRequest {
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub events: Option<Vec<WebhookEvent>>,
}

/// Remove webhook request
#[derive(Debug, Deserialize)]
pub struct RemoveWebhookRequest {
    pub url: String,
}

/// Query accepted by the WebSocket stream, for clients that cannot set headers
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub access_token: Option<String>,
}

/// Bearer token from the `Authorization` header
fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| ApiError::unauthorized("Missing bearer token"))?
        .to_str()
        .map_err(|_| ApiError::unauthorized("Malformed authorization header"))?;

    let (scheme, token) = value
        .split_once(' ')
        .ok_or_else(|| ApiError::unauthorized("Malformed authorization header"))?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.trim().is_empty() {
        return Err(ApiError::unauthorized("Expected a bearer token"));
    }
    Ok(token.trim())
}

/// Check the operator token guarding webhook management
fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &state.config.admin_token else {
        return Err(ApiError::new(
            StatusCode::FORBIDDEN,
            "Webhook management is disabled",
        ));
    };
    let presented = bearer_token(headers)?;
    // Digests compared so the comparison time does not depend on a shared prefix
    if Sha256::digest(presented.as_bytes()) != Sha256::digest(expected.as_bytes()) {
        warn!("Rejected webhook management call with a bad admin token");
        return Err(ApiError::unauthorized("Invalid admin token"));
    }
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "fastauth-relay",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Readiness check; fails once the coordinator has shut down
async fn ready(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let coordinator = state.gateway.coordinator();
    if coordinator.is_shut_down() {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "Relay coordinator is shut down",
        ));
    }

    let response = HealthResponse {
        status: "ready".to_string(),
        service: "fastauth-relay".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        pending_requests: coordinator.stats().pending,
        trusted_issuers: state.gateway.validator().registry().issuers().len(),
    };

    Ok(Json(ApiResponse::success(response)))
}

/// Get statistics
async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let webhook_stats = state.webhooks.get_stats().await;

    let mut response = StatsResponse::new(
        &state.gateway.coordinator().stats(),
        webhook_stats.webhooks_configured,
    );
    response.webhook_deliveries = webhook_stats.total_deliveries;
    response.failed_webhook_deliveries = webhook_stats.failed_deliveries;

    Json(ApiResponse::success(response))
}

async fn submit(
    state: &AppState,
    headers: &HeaderMap,
    body: CreateSignatureBody,
    kind: PayloadKind,
) -> Result<Response, ApiError> {
    let token = bearer_token(headers)?;
    let payload = STANDARD
        .decode(body.payload_base64.trim())
        .map_err(|e| ApiError::bad_request(format!("Invalid base64 payload: {}", e)))?;

    let handle = state
        .gateway
        .request_signature(
            token,
            body.account_path.as_deref(),
            payload,
            &body.algorithm,
            kind,
        )
        .await?;

    let created = SignatureCreated {
        request_id: handle.id().to_string(),
        status: handle.status().name().to_string(),
    };
    Ok((StatusCode::CREATED, Json(ApiResponse::success(created))).into_response())
}

/// Submit a signature request of the kind named in the body
async fn create_signature(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateSignatureBody>,
) -> Result<Response, ApiError> {
    let kind = body.kind;
    submit(&state, &headers, body, kind).await
}

async fn create_transaction_signature(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateSignatureBody>,
) -> Result<Response, ApiError> {
    submit(&state, &headers, body, PayloadKind::Transaction).await
}

async fn create_delegate_action_signature(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<CreateSignatureBody>,
) -> Result<Response, ApiError> {
    submit(&state, &headers, body, PayloadKind::DelegateAction).await
}

/// Get a signature request owned by the bearer
async fn get_signature(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers)?;
    let request = state
        .gateway
        .get_signature_request(token, &request_id)
        .await?;
    Ok(Json(ApiResponse::success(request)))
}

/// Cancel a signature request owned by the bearer
async fn cancel_signature(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let token = bearer_token(&headers)?;
    let cancelled = state
        .gateway
        .cancel_signature_request(token, &request_id)
        .await?;

    Ok(Json(ApiResponse::success(serde_json::json!({
        "requestId": request_id,
        "cancelled": cancelled
    }))))
}

/// Apply an MPC network answer
async fn mpc_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    match &state.config.mpc_callback_secret {
        Some(secret) => {
            let signature = headers
                .get(MPC_SIGNATURE_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            if !webhook::verify_hmac_signature(secret.as_bytes(), &body, signature) {
                warn!("Rejected MPC callback with a bad signature");
                return Err(RelayError::InvalidCallbackSignature.into());
            }
        }
        None if state.config.insecure_mpc_callback => {}
        None => {
            warn!("Rejected MPC callback: no callback secret configured");
            return Err(ApiError::new(
                StatusCode::FORBIDDEN,
                "MPC callbacks are disabled",
            ));
        }
    }

    let response: MpcResponse = serde_json::from_slice(&body)
        .map_err(|e| RelayError::InvalidBody(e.to_string()))?;
    let applied = state.gateway.coordinator().on_mpc_response(response);

    Ok(Json(ApiResponse::success(CallbackAck { applied })))
}

/// List webhooks
async fn list_webhooks(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers)?;
    let webhooks = state.webhooks.list_webhooks().await;
    Ok(Json(ApiResponse::success(webhooks)))
}

/// Add webhook
async fn add_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<AddWebhookRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers)?;
    let mut config = WebhookConfig::new(&req.url);

    if let Some(secret) = req.secret {
        config = config.with_secret(secret);
    }
    if let Some(events) = req.events {
        config = config.with_events(events);
    }

    state.webhooks.add_webhook(config).await;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(serde_json::json!({
            "url": req.url,
            "status": "added"
        }))),
    ))
}

/// Remove webhook
async fn remove_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RemoveWebhookRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_admin(&state, &headers)?;
    if !state.webhooks.remove_webhook(&req.url).await {
        return Err(ApiError::new(StatusCode::NOT_FOUND, "Webhook not found"));
    }

    Ok(Json(ApiResponse::success(serde_json::json!({
        "url": req.url,
        "status": "removed"
    }))))
}

/// WebSocket stream of one request's status
///
/// Authentication and ownership are checked before the upgrade.
async fn signature_stream(
    ws: WebSocketUpgrade,
    Path(request_id): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let token = match query.access_token {
        Some(token) => token,
        None => bearer_token(&headers)?.to_string(),
    };
    let handle = state.gateway.signature_handle(&token, &request_id).await?;

    Ok(ws.on_upgrade(move |socket| handle_signature_stream(socket, state, handle)))
}

async fn handle_signature_stream(socket: WebSocket, state: Arc<AppState>, mut handle: SignatureHandle) {
    let (mut sender, mut receiver) = socket.split();
    let request_id = handle.id().to_string();

    let current = || {
        state
            .gateway
            .coordinator()
            .get_signature_request(&request_id)
            .ok()
            .and_then(|request| serde_json::to_string(&request).ok())
    };

    if let Some(json) = current()
        && sender.send(Message::Text(json.into())).await.is_err()
    {
        return;
    }

    if !handle.status().is_terminal() {
        loop {
            tokio::select! {
                status = handle.changed() => {
                    let Some(status) = status else { break };
                    if let Some(json) = current()
                        && sender.send(Message::Text(json.into())).await.is_err()
                    {
                        return;
                    }
                    if status.is_terminal() {
                        break;
                    }
                }
                msg = receiver.next() => match msg {
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Err(e)) => {
                        warn!(request_id = %request_id, error = %e, "Signature stream error");
                        return;
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}
