//! Relay, MPC network and webhook receiver wired over real sockets

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use fastauth_core::relay::{CoordinatorConfig, MpcResponse, MpcSignRequest, RelayCoordinator};
use fastauth_core::token::{IssuerRegistry, KeySet, TokenValidator};
use fastauth_core::{Error, PayloadKind, RejectionReason, RequestStatus, Signature, SigningGateway};
use fastauth_relay::webhook::{compute_hmac_signature, verify_hmac_signature};
use fastauth_relay::{
    FastAuthRelayService, HttpMpcNetwork, MPC_SIGNATURE_HEADER, RelayClient, RelayClientConfig,
    RelayError, RelayServerConfig, WEBHOOK_SIGNATURE_HEADER, WebhookConfig,
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const ISSUER: &str = "https://issuer.example";
const AUDIENCE: &str = "https://relay.example";
const TOKEN_SECRET: &[u8] = b"relay-flow-token-secret";
const CALLBACK_SECRET: &str = "mpc-callback-secret";
const WEBHOOK_SECRET: &str = "webhook-secret";

/// Payload first byte the mock MPC network declines
const DECLINE: u8 = 0xFF;
/// Payload first byte the mock MPC network never answers
const SILENT: u8 = 0x00;

// ============================================================================
// Fixtures
// ============================================================================

fn token(sub: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = serde_json::json!({
        "iss": ISSUER, "sub": sub, "aud": AUDIENCE, "exp": now + 600,
    });
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(TOKEN_SECRET),
    )
    .unwrap()
}

fn expected_signature(payload: &[u8]) -> Signature {
    Signature::new(payload.iter().rev().copied().collect::<Vec<u8>>())
}

async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// MPC network that acknowledges with 202 and answers on the relay callback
async fn mock_mpc(relay_url: String) -> String {
    async fn sign(State(relay_url): State<String>, Json(request): Json<MpcSignRequest>) -> StatusCode {
        let first = request.payload.first().copied();
        if first == Some(SILENT) {
            return StatusCode::ACCEPTED;
        }

        let response = if first == Some(DECLINE) {
            MpcResponse::error(request.request_id, "policy declined")
        } else {
            MpcResponse::signature(request.request_id, expected_signature(&request.payload))
        };
        tokio::spawn(async move {
            let body = serde_json::to_vec(&response).unwrap();
            let signature =
                compute_hmac_signature(CALLBACK_SECRET.as_bytes(), &body).unwrap();
            reqwest::Client::new()
                .post(format!("{}/v1/mpc/responses", relay_url))
                .header("content-type", "application/json")
                .header(MPC_SIGNATURE_HEADER, signature)
                .body(body)
                .send()
                .await
                .unwrap();
        });
        StatusCode::ACCEPTED
    }

    serve(Router::new().route("/sign", post(sign)).with_state(relay_url)).await
}

type Deliveries = Arc<Mutex<Vec<(String, Bytes)>>>;

async fn webhook_receiver() -> (String, Deliveries) {
    async fn hook(State(deliveries): State<Deliveries>, headers: HeaderMap, body: Bytes) -> StatusCode {
        let signature = headers
            .get(WEBHOOK_SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        deliveries.lock().unwrap().push((signature, body));
        StatusCode::OK
    }

    let deliveries: Deliveries = Arc::default();
    let url = serve(Router::new().route("/hook", post(hook)).with_state(deliveries.clone())).await;
    (format!("{}/hook", url), deliveries)
}

struct Harness {
    client: RelayClient,
    gateway: SigningGateway,
    deliveries: Deliveries,
    shutdown: oneshot::Sender<()>,
    server: JoinHandle<anyhow::Result<()>>,
}

async fn start(request_timeout: Duration) -> Harness {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let relay_url = format!("http://{}", listener.local_addr().unwrap());
    let mpc_url = mock_mpc(relay_url.clone()).await;

    let registry = IssuerRegistry::new();
    registry.register_static(ISSUER, KeySet::from_secret(None, TOKEN_SECRET));

    let network = HttpMpcNetwork::new(&mpc_url);
    let coordinator = RelayCoordinator::start(
        CoordinatorConfig::default().with_request_timeout(request_timeout),
        Arc::new(network.clone()),
    );
    network.connect(coordinator.response_sink());
    let gateway = SigningGateway::new(
        TokenValidator::new(Arc::new(registry)),
        coordinator,
        ISSUER,
        AUDIENCE,
    );

    let config = RelayServerConfig::default()
        .with_base_url(&relay_url)
        .with_mpc_callback_secret(CALLBACK_SECRET)
        .with_shutdown_timeout(0);
    let service = FastAuthRelayService::new(gateway.clone(), config);

    let (hook_url, deliveries) = webhook_receiver().await;
    service
        .add_webhook(WebhookConfig::new(hook_url).with_secret(WEBHOOK_SECRET))
        .await;

    let (shutdown, signal) = oneshot::channel::<()>();
    let server = tokio::spawn(service.serve_with_shutdown(listener, async {
        let _ = signal.await;
    }));

    Harness {
        client: RelayClient::new(RelayClientConfig::new(relay_url).with_poll_interval(20)),
        gateway,
        deliveries,
        shutdown,
        server,
    }
}

async fn wait_for_deliveries(deliveries: &Deliveries, count: usize) -> Vec<(String, Bytes)> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let current = deliveries.lock().unwrap().clone();
        if current.len() >= count || tokio::time::Instant::now() > deadline {
            return current;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ============================================================================
// Flows
// ============================================================================

#[tokio::test]
async fn test_signature_resolved_through_callback() {
    let harness = start(Duration::from_secs(30)).await;
    let bearer = token("alice");
    let payload = vec![0x42u8, 0x01, 0x02, 0x03];

    assert!(harness.client.health().await.unwrap());

    let created = harness
        .client
        .request_signature(&bearer, &payload, "secp256k1", PayloadKind::Transaction)
        .await
        .unwrap();
    assert_eq!(created.status, "pending");

    let signature = harness
        .client
        .wait_for_signature(&bearer, &created.request_id, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(signature, expected_signature(&payload));

    let deliveries = wait_for_deliveries(&harness.deliveries, 1).await;
    assert_eq!(deliveries.len(), 1);
    let (header, body) = &deliveries[0];
    assert!(verify_hmac_signature(WEBHOOK_SECRET.as_bytes(), body, header));

    let event: serde_json::Value = serde_json::from_slice(body).unwrap();
    assert_eq!(event["event"], "request_resolved");
    assert_eq!(event["request_id"], created.request_id.as_str());
    assert_eq!(event["data"]["signature"], signature.to_base64());
}

#[tokio::test]
async fn test_declined_request_reported_as_rejected() {
    let harness = start(Duration::from_secs(30)).await;
    let bearer = token("bob");

    let created = harness
        .client
        .request_signature(&bearer, &[DECLINE, 1, 2], "ed25519", PayloadKind::DelegateAction)
        .await
        .unwrap();

    let result = harness
        .client
        .wait_for_signature(&bearer, &created.request_id, Duration::from_secs(5))
        .await;
    match result {
        Err(RelayError::Core(Error::Rejected { reason, .. })) => {
            assert!(reason.contains("policy declined"))
        }
        other => panic!("unexpected result {:?}", other),
    }

    let deliveries = wait_for_deliveries(&harness.deliveries, 1).await;
    let event: serde_json::Value = serde_json::from_slice(&deliveries[0].1).unwrap();
    assert_eq!(event["event"], "request_rejected");
}

#[tokio::test]
async fn test_unanswered_request_expires() {
    let harness = start(Duration::from_millis(200)).await;
    let bearer = token("carol");

    let created = harness
        .client
        .request_signature(&bearer, &[SILENT, 9], "secp256k1", PayloadKind::Transaction)
        .await
        .unwrap();

    let result = harness
        .client
        .wait_for_signature(&bearer, &created.request_id, Duration::from_secs(5))
        .await;
    assert!(matches!(result, Err(RelayError::Core(Error::Expired(_)))));
}

#[tokio::test]
async fn test_foreign_and_invalid_tokens() {
    let harness = start(Duration::from_secs(30)).await;
    let owner = token("dave");

    let created = harness
        .client
        .request_signature(&owner, &[SILENT], "secp256k1", PayloadKind::Transaction)
        .await
        .unwrap();

    let foreign = harness
        .client
        .get_signature_request(&token("eve"), &created.request_id)
        .await;
    assert!(matches!(foreign, Err(RelayError::Core(Error::NotFound(_)))));

    let invalid = harness
        .client
        .request_signature("not-a-token", &[1], "secp256k1", PayloadKind::Transaction)
        .await;
    assert!(matches!(invalid, Err(RelayError::Unauthorized(_))));

    assert!(
        harness
            .client
            .cancel_signature_request(&owner, &created.request_id)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_shutdown_cancels_pending_requests() {
    let harness = start(Duration::from_secs(30)).await;
    let bearer = token("frank");

    let created = harness
        .client
        .request_signature(&bearer, &[SILENT, 7], "secp256k1", PayloadKind::Transaction)
        .await
        .unwrap();

    harness.shutdown.send(()).unwrap();
    harness.server.await.unwrap().unwrap();

    let request = harness
        .gateway
        .coordinator()
        .get_signature_request(&created.request_id)
        .unwrap();
    assert_eq!(
        request.status(),
        &RequestStatus::Rejected {
            reason: RejectionReason::Cancelled
        }
    );
    assert!(harness.gateway.coordinator().is_shut_down());
}
