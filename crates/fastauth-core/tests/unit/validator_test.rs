//! Token validator tests against static and discovered issuers

use crate::support::{
    self, AUDIENCE, ISSUER, MockIssuer, REMOTE_SECRET, ROTATED_SECRET, claims, mint, mint_with,
};
use fastauth_core::token::{IssuerRegistry, KeySet, TokenValidator};
use fastauth_core::{Error, TokenRejection};
use jsonwebtoken::Algorithm;
use std::sync::Arc;
use std::time::Duration;

async fn rejection(validator: &TokenValidator, token: &str, issuer: &str) -> TokenRejection {
    validator
        .validate(token, issuer, AUDIENCE)
        .await
        .unwrap_err()
        .token_rejection()
        .unwrap()
}

// ============================================================================
// Static issuers
// ============================================================================

#[tokio::test]
async fn test_accepts_valid_token() {
    let validator = TokenValidator::new(support::registry());
    let valid = validator
        .validate(&support::valid_token(), ISSUER, AUDIENCE)
        .await
        .unwrap();

    assert_eq!(valid.account_path(), support::account_path());
    assert!(!valid.is_expired());
}

#[tokio::test]
async fn test_each_rejection_reason() {
    let validator = TokenValidator::new(support::registry());

    let expired = mint(&claims(-10));
    assert_eq!(rejection(&validator, &expired, ISSUER).await, TokenRejection::Expired);

    let forged = mint_with(&claims(600), b"forged", None);
    assert_eq!(rejection(&validator, &forged, ISSUER).await, TokenRejection::Signature);

    let mut c = claims(600);
    c["aud"] = "https://elsewhere.example".into();
    assert_eq!(rejection(&validator, &mint(&c), ISSUER).await, TokenRejection::Audience);

    let mut c = claims(600);
    c["iss"] = "https://elsewhere.example".into();
    assert_eq!(rejection(&validator, &mint(&c), ISSUER).await, TokenRejection::Issuer);

    assert_eq!(rejection(&validator, "a.b.c", ISSUER).await, TokenRejection::Malformed);
}

#[tokio::test]
async fn test_untrusted_expected_issuer() {
    let validator = TokenValidator::new(Arc::new(IssuerRegistry::new()));
    let token = support::valid_token();
    assert_eq!(rejection(&validator, &token, ISSUER).await, TokenRejection::Issuer);
}

#[tokio::test]
async fn test_kid_selects_key() {
    let registry = IssuerRegistry::new();
    registry.register_static(
        ISSUER,
        KeySet::from_secret(Some("old"), b"old-secret").with_key(
            fastauth_core::token::VerificationKey::new(
                Some("new".to_string()),
                Algorithm::HS256,
                jsonwebtoken::DecodingKey::from_secret(b"new-secret"),
            ),
        ),
    );
    let validator = TokenValidator::new(Arc::new(registry));

    let token = mint_with(&claims(600), b"new-secret", Some("new"));
    assert!(validator.validate(&token, ISSUER, AUDIENCE).await.is_ok());

    // Right secret, wrong kid
    let token = mint_with(&claims(600), b"new-secret", Some("old"));
    assert_eq!(rejection(&validator, &token, ISSUER).await, TokenRejection::Signature);

    // No kid and two candidate keys
    let token = mint_with(&claims(600), b"new-secret", None);
    assert_eq!(rejection(&validator, &token, ISSUER).await, TokenRejection::Signature);
}

#[tokio::test]
async fn test_validation_errors_are_not_retryable() {
    let validator = TokenValidator::new(support::registry());
    let err = validator
        .validate(&mint(&claims(-1)), ISSUER, AUDIENCE)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidToken { .. }));
    assert!(!err.is_retryable());
    assert_eq!(err.status_code(), 401);
}

// ============================================================================
// Discovered issuers
// ============================================================================

#[tokio::test]
async fn test_discovery_registers_issuer() {
    let issuer = MockIssuer::start(&[("k1", REMOTE_SECRET)]).await;
    let registry = Arc::new(IssuerRegistry::new());

    let config = registry.discover(&issuer.url).await.unwrap();
    assert_eq!(config.jwks_uri, format!("{}/jwks", issuer.url));
    assert_eq!(issuer.jwks_hits(), 1);

    let validator = TokenValidator::new(registry);
    let token = mint_with(&issuer.claims(600), REMOTE_SECRET, Some("k1"));
    let valid = validator.validate(&token, &issuer.url, AUDIENCE).await.unwrap();
    assert_eq!(valid.issuer(), issuer.url);
}

#[tokio::test]
async fn test_unknown_kid_triggers_refresh() {
    let issuer = MockIssuer::start(&[("k1", REMOTE_SECRET)]).await;
    let registry = IssuerRegistry::new().with_refresh_cooldown(Duration::ZERO);
    registry.discover(&issuer.url).await.unwrap();
    let validator = TokenValidator::new(Arc::new(registry));

    issuer.set_keys(&[("k1", REMOTE_SECRET), ("k2", ROTATED_SECRET)]);
    let token = mint_with(&issuer.claims(600), ROTATED_SECRET, Some("k2"));

    assert!(validator.validate(&token, &issuer.url, AUDIENCE).await.is_ok());
    assert_eq!(issuer.jwks_hits(), 2);
}

#[tokio::test]
async fn test_refresh_cooldown_limits_fetches() {
    let issuer = MockIssuer::start(&[("k1", REMOTE_SECRET)]).await;
    let registry = IssuerRegistry::new().with_refresh_cooldown(Duration::from_secs(3600));
    registry.discover(&issuer.url).await.unwrap();
    let validator = TokenValidator::new(Arc::new(registry));

    let token = mint_with(&issuer.claims(600), ROTATED_SECRET, Some("unknown"));
    for _ in 0..3 {
        assert_eq!(
            rejection(&validator, &token, &issuer.url).await,
            TokenRejection::Signature
        );
    }
    assert_eq!(issuer.jwks_hits(), 1);
}

#[tokio::test]
async fn test_discovery_of_unreachable_issuer() {
    let registry = IssuerRegistry::new();
    let result = registry.discover("http://127.0.0.1:9").await;
    assert!(matches!(result, Err(Error::Discovery(_))));
    assert!(result.unwrap_err().is_retryable());
}
