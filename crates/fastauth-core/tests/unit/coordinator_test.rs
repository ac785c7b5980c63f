//! Relay coordinator tests through the signing gateway

use crate::support::{self, account_path, valid_token};
use fastauth_core::relay::MpcOutcome;
use fastauth_core::{
    Error, KeyType, MpcResponse, PayloadKind, RejectionReason, RequestStatus, Signature,
};
use std::time::Duration;

#[tokio::test]
async fn test_forwarded_request_carries_wire_fields() {
    let (gateway, network) = support::gateway(Duration::from_secs(30));
    let handle = gateway
        .request_signature(&valid_token(), None, vec![0xAB; 32], "ed25519", PayloadKind::DelegateAction)
        .await
        .unwrap();

    let forwarded = network
        .wait_for_forwarded(1, Duration::from_secs(2))
        .await
        .unwrap();
    let wire = &forwarded[0];
    assert_eq!(wire.request_id, handle.id());
    assert_eq!(wire.account_path, account_path());
    assert_eq!(wire.payload, vec![0xAB; 32]);
    assert_eq!(wire.key_type, KeyType::Ed25519);
    assert_eq!(wire.payload_kind, PayloadKind::DelegateAction);
}

#[tokio::test]
async fn test_unreachable_network_rejects() {
    let (gateway, network) = support::gateway(Duration::from_secs(30));
    network.set_unreachable(Some("connection refused".into()));

    let handle = gateway
        .request_signature(&valid_token(), None, vec![1u8; 8], "secp256k1", PayloadKind::Transaction)
        .await
        .unwrap();
    let id = handle.id().to_string();

    match handle.wait().await {
        Err(Error::Rejected { request_id, reason }) => {
            assert_eq!(request_id, id);
            assert!(reason.contains("unreachable"));
        }
        other => panic!("expected rejection, got {:?}", other),
    }

    let stored = gateway.coordinator().get_signature_request(&id).unwrap();
    assert!(matches!(
        stored.status(),
        RequestStatus::Rejected {
            reason: RejectionReason::Unreachable(_)
        }
    ));
}

#[tokio::test]
async fn test_auto_reply_resolves() {
    let (gateway, network) = support::gateway(Duration::from_secs(30));
    network.auto_sign(Signature::new(vec![7; 64]));

    let handle = gateway
        .request_signature(&valid_token(), None, vec![1u8; 8], "secp256k1", PayloadKind::Transaction)
        .await
        .unwrap();
    assert_eq!(handle.wait().await.unwrap().as_bytes(), &[7; 64][..]);
}

#[tokio::test]
async fn test_responder_can_decline_per_request() {
    let (gateway, network) = support::gateway(Duration::from_secs(30));
    network.respond_with(|request| {
        Some(match request.key_type {
            KeyType::Secp256k1 => MpcOutcome::Signature {
                signature: Signature::new(vec![1]),
            },
            KeyType::Ed25519 => MpcOutcome::Error {
                error: "no ed25519 key for account".into(),
            },
        })
    });

    let token = valid_token();
    let ok = gateway
        .request_signature(&token, None, vec![1u8], "ecdsa", PayloadKind::Transaction)
        .await
        .unwrap();
    let declined = gateway
        .request_signature(&token, None, vec![1u8], "eddsa", PayloadKind::Transaction)
        .await
        .unwrap();

    assert!(ok.wait().await.is_ok());
    assert!(matches!(declined.wait().await, Err(Error::Rejected { .. })));
}

#[tokio::test]
async fn test_status_stream_observes_transition() {
    let (gateway, _network) = support::gateway(Duration::from_secs(30));
    let handle = gateway
        .request_signature(&valid_token(), None, vec![1u8], "secp256k1", PayloadKind::Transaction)
        .await
        .unwrap();

    let mut watcher = gateway.coordinator().handle(handle.id()).unwrap();
    assert_eq!(watcher.status(), RequestStatus::Pending);

    gateway
        .coordinator()
        .on_mpc_response(MpcResponse::signature(handle.id(), Signature::new(vec![3])));

    let status = watcher.changed().await.unwrap();
    assert_eq!(status.name(), "resolved");
}

#[tokio::test]
async fn test_stats_track_outcomes() {
    let (gateway, _network) = support::gateway(Duration::from_millis(300));
    let token = valid_token();
    let coordinator = gateway.coordinator();

    let resolved = gateway
        .request_signature(&token, None, vec![1u8], "secp256k1", PayloadKind::Transaction)
        .await
        .unwrap();
    let rejected = gateway
        .request_signature(&token, None, vec![1u8], "secp256k1", PayloadKind::Transaction)
        .await
        .unwrap();
    let expired = gateway
        .request_signature(&token, None, vec![1u8], "secp256k1", PayloadKind::Transaction)
        .await
        .unwrap();

    coordinator.on_mpc_response(MpcResponse::signature(resolved.id(), Signature::new(vec![1])));
    coordinator.on_mpc_response(MpcResponse::error(rejected.id(), "declined"));
    assert!(matches!(expired.wait().await, Err(Error::Expired(_))));

    let stats = coordinator.stats();
    assert_eq!(stats.total_submitted, 3);
    assert_eq!(stats.total_resolved, 1);
    assert_eq!(stats.total_rejected, 1);
    assert_eq!(stats.total_expired, 1);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn test_owner_only_lookup() {
    let (gateway, _network) = support::gateway(Duration::from_secs(30));
    let handle = gateway
        .request_signature(&valid_token(), None, vec![1u8], "secp256k1", PayloadKind::Transaction)
        .await
        .unwrap();

    let mut other = support::claims(600);
    other["sub"] = "user-2".into();
    let other_token = support::mint(&other);

    assert!(
        gateway
            .get_signature_request(&valid_token(), handle.id())
            .await
            .is_ok()
    );
    assert!(matches!(
        gateway.get_signature_request(&other_token, handle.id()).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        gateway.cancel_signature_request(&other_token, handle.id()).await,
        Err(Error::NotFound(_))
    ));
    assert!(
        gateway
            .cancel_signature_request(&valid_token(), handle.id())
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_supplied_path_must_match_token() {
    let (gateway, _network) = support::gateway(Duration::from_secs(30));

    let result = gateway
        .request_signature(
            &valid_token(),
            Some("jwt#https://issuer.example#someone-else"),
            vec![1u8],
            "secp256k1",
            PayloadKind::Transaction,
        )
        .await;
    assert!(matches!(result, Err(Error::InvalidRequest(_))));

    let path = account_path();
    let result = gateway
        .request_signature(&valid_token(), Some(&path), vec![1u8], "secp256k1", PayloadKind::Transaction)
        .await;
    assert!(result.is_ok());
    assert_eq!(gateway.coordinator().len(), 1);
}
