//! Shared fixtures: token minting and in-process mock servers

#![allow(dead_code)]

use axum::extract::{Form, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use fastauth_core::relay::{CoordinatorConfig, MemoryMpcNetwork, RelayCoordinator};
use fastauth_core::token::{IssuerRegistry, KeySet, TokenValidator};
use fastauth_core::{FastAuthProvider, SigningGateway};
use fastauth_core::identity::StaticTokenProvider;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const ISSUER: &str = "https://issuer.example";
pub const AUDIENCE: &str = "https://api.example";
pub const SECRET: &[u8] = b"issuer-example-test-secret";
pub const SUBJECT: &str = "user-1";

// JWK secrets: lengths divisible by 3 so the base64 form carries no padding
pub const REMOTE_SECRET: &[u8] = b"remote-issuer-hmac-secret-0001";
pub const ROTATED_SECRET: &[u8] = b"rotated-issuer-hmac-secret-003";

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Claims for a token from `ISSUER` to `AUDIENCE` expiring in `ttl` seconds
pub fn claims(ttl: i64) -> serde_json::Value {
    serde_json::json!({
        "iss": ISSUER,
        "sub": SUBJECT,
        "aud": AUDIENCE,
        "iat": now(),
        "exp": now() + ttl,
    })
}

/// HS256 token, optionally with a `kid`
pub fn mint_with(claims: &serde_json::Value, secret: &[u8], kid: Option<&str>) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = kid.map(str::to_string);
    jsonwebtoken::encode(&header, claims, &EncodingKey::from_secret(secret)).unwrap()
}

pub fn mint(claims: &serde_json::Value) -> String {
    mint_with(claims, SECRET, None)
}

/// A token valid for ten minutes
pub fn valid_token() -> String {
    mint(&claims(600))
}

pub fn account_path() -> String {
    format!("jwt#{}#{}", ISSUER, SUBJECT)
}

pub fn registry() -> Arc<IssuerRegistry> {
    let registry = IssuerRegistry::new();
    registry.register_static(ISSUER, KeySet::from_secret(None, SECRET));
    Arc::new(registry)
}

/// Gateway over a memory network with the given pending timeout
pub fn gateway(timeout: Duration) -> (SigningGateway, MemoryMpcNetwork) {
    let network = MemoryMpcNetwork::new();
    let coordinator = RelayCoordinator::start(
        CoordinatorConfig::default().with_request_timeout(timeout),
        Arc::new(network.clone()),
    );
    network.connect(coordinator.response_sink());
    let gateway = SigningGateway::new(
        TokenValidator::new(registry()),
        coordinator,
        ISSUER,
        AUDIENCE,
    );
    (gateway, network)
}

/// Facade logging in with a fixed token
pub fn provider_with_token(token: String, timeout: Duration) -> (FastAuthProvider, MemoryMpcNetwork) {
    let (gateway, network) = gateway(timeout);
    let provider = FastAuthProvider::new(Arc::new(StaticTokenProvider::new(token)), gateway);
    (provider, network)
}

// ============================================================================
// Mock OIDC issuer
// ============================================================================

#[derive(Clone)]
struct IssuerState {
    issuer: String,
    jwks: Arc<RwLock<serde_json::Value>>,
    jwks_hits: Arc<AtomicUsize>,
}

/// Issuer serving a discovery document and an HS256 JWKS over HTTP
pub struct MockIssuer {
    pub url: String,
    state: IssuerState,
}

pub fn oct_jwk(kid: &str, secret: &[u8]) -> serde_json::Value {
    serde_json::json!({
        "kty": "oct",
        "kid": kid,
        "alg": "HS256",
        "k": URL_SAFE_NO_PAD.encode(secret),
    })
}

impl MockIssuer {
    pub async fn start(keys: &[(&str, &[u8])]) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let state = IssuerState {
            issuer: url.clone(),
            jwks: Arc::new(RwLock::new(serde_json::Value::Null)),
            jwks_hits: Arc::new(AtomicUsize::new(0)),
        };
        let issuer = Self { url, state };
        issuer.set_keys(keys);

        let app = Router::new()
            .route("/.well-known/openid-configuration", get(discovery))
            .route("/jwks", get(jwks))
            .with_state(issuer.state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        issuer
    }

    /// Replace the published key set
    pub fn set_keys(&self, keys: &[(&str, &[u8])]) {
        let keys: Vec<_> = keys.iter().map(|(kid, secret)| oct_jwk(kid, secret)).collect();
        *self.state.jwks.write() = serde_json::json!({ "keys": keys });
    }

    /// Number of JWKS fetches served
    pub fn jwks_hits(&self) -> usize {
        self.state.jwks_hits.load(Ordering::SeqCst)
    }

    /// Claims for a token from this issuer
    pub fn claims(&self, ttl: i64) -> serde_json::Value {
        serde_json::json!({
            "iss": self.url,
            "sub": SUBJECT,
            "aud": AUDIENCE,
            "exp": now() + ttl,
        })
    }
}

async fn discovery(State(state): State<IssuerState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "issuer": state.issuer,
        "jwks_uri": format!("{}/jwks", state.issuer),
        "id_token_signing_alg_values_supported": ["HS256"],
        "token_endpoint": format!("{}/oauth/token", state.issuer),
    }))
}

async fn jwks(State(state): State<IssuerState>) -> Json<serde_json::Value> {
    state.jwks_hits.fetch_add(1, Ordering::SeqCst);
    Json(state.jwks.read().clone())
}

// ============================================================================
// Mock token endpoint
// ============================================================================

#[derive(Clone)]
struct TokenEndpointState {
    id_token: String,
    rotate_to: Option<String>,
    forms: Arc<RwLock<Vec<HashMap<String, String>>>>,
}

/// OAuth token endpoint answering every grant with a fixed id_token
pub struct MockTokenEndpoint {
    pub url: String,
    forms: Arc<RwLock<Vec<HashMap<String, String>>>>,
}

impl MockTokenEndpoint {
    /// Serve `id_token`; when `rotate_to` is set, also return it as a new refresh token
    pub async fn start(id_token: String, rotate_to: Option<String>) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let forms = Arc::new(RwLock::new(Vec::new()));

        let state = TokenEndpointState {
            id_token,
            rotate_to,
            forms: Arc::clone(&forms),
        };
        let app = Router::new()
            .route("/oauth/token", post(token))
            .route("/v1/token", post(token))
            .route("/fail", post(fail))
            .with_state(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { url, forms }
    }

    /// Forms received so far
    pub fn forms(&self) -> Vec<HashMap<String, String>> {
        self.forms.read().clone()
    }
}

async fn token(
    State(state): State<TokenEndpointState>,
    Form(form): Form<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    state.forms.write().push(form);
    let mut body = serde_json::json!({
        "id_token": state.id_token,
        "token_type": "Bearer",
        "expires_in": 3600,
    });
    if let Some(rotated) = &state.rotate_to {
        body["refresh_token"] = rotated.clone().into();
    }
    Json(body)
}

async fn fail() -> (axum::http::StatusCode, Json<serde_json::Value>) {
    (
        axum::http::StatusCode::BAD_REQUEST,
        Json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "refresh token revoked",
        })),
    )
}
