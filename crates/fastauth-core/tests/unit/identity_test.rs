//! Identity provider tests against in-process token endpoints

use crate::support::MockTokenEndpoint;
use fastauth_core::Error;
use fastauth_core::identity::{
    Auth0Provider, FirebaseProvider, GoogleGrant, GoogleProvider, IdentityProvider,
};

#[tokio::test]
async fn test_auth0_refresh_grant() {
    let endpoint = MockTokenEndpoint::start("auth0.id.token".into(), None).await;
    let provider = Auth0Provider::new(&endpoint.url, "client-1", Some("s3cret".into()), "rt-1");

    assert_eq!(provider.obtain_token().await.unwrap(), "auth0.id.token");

    let forms = endpoint.forms();
    assert_eq!(forms.len(), 1);
    assert_eq!(forms[0]["grant_type"], "refresh_token");
    assert_eq!(forms[0]["client_id"], "client-1");
    assert_eq!(forms[0]["client_secret"], "s3cret");
    assert_eq!(forms[0]["refresh_token"], "rt-1");
}

#[tokio::test]
async fn test_firebase_keeps_rotated_refresh_token() {
    let endpoint = MockTokenEndpoint::start("firebase.id.token".into(), Some("rt-2".into())).await;
    let provider = FirebaseProvider::new("api-key", "project", "rt-1")
        .with_token_url(format!("{}/v1/token", endpoint.url));

    assert_eq!(provider.obtain_token().await.unwrap(), "firebase.id.token");
    provider.obtain_token().await.unwrap();

    let forms = endpoint.forms();
    assert_eq!(forms[0]["refresh_token"], "rt-1");
    assert_eq!(forms[1]["refresh_token"], "rt-2");
}

#[tokio::test]
async fn test_google_code_then_refresh() {
    let endpoint = MockTokenEndpoint::start("google.id.token".into(), Some("rt-g".into())).await;
    let provider = GoogleProvider::new(
        "client",
        "secret",
        "https://app.example/callback",
        GoogleGrant::AuthorizationCode("code-1".into()),
    )
    .with_token_url(format!("{}/oauth/token", endpoint.url));

    assert_eq!(provider.obtain_token().await.unwrap(), "google.id.token");
    assert_eq!(provider.grant(), GoogleGrant::RefreshToken("rt-g".into()));
    provider.obtain_token().await.unwrap();

    let forms = endpoint.forms();
    assert_eq!(forms[0]["grant_type"], "authorization_code");
    assert_eq!(forms[0]["code"], "code-1");
    assert_eq!(forms[0]["redirect_uri"], "https://app.example/callback");
    assert_eq!(forms[1]["grant_type"], "refresh_token");
    assert_eq!(forms[1]["refresh_token"], "rt-g");
}

#[tokio::test]
async fn test_error_response_is_provider_error() {
    let endpoint = MockTokenEndpoint::start("unused".into(), None).await;
    let provider = GoogleProvider::new(
        "client",
        "secret",
        "",
        GoogleGrant::RefreshToken("revoked".into()),
    )
    .with_token_url(format!("{}/fail", endpoint.url));

    match provider.obtain_token().await {
        Err(Error::Provider(msg)) => {
            assert!(msg.contains("invalid_grant"));
            assert!(msg.contains("refresh token revoked"));
        }
        other => panic!("expected provider error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_id_token_is_provider_error() {
    let endpoint = MockTokenEndpoint::start(String::new(), None).await;
    let provider = Auth0Provider::new(&endpoint.url, "client", None, "rt");
    assert!(matches!(provider.obtain_token().await, Err(Error::Provider(_))));
}
