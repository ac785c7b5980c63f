//! Identity providers
//!
//! One [`IdentityProvider`] implementation per supported issuer family,
//! selected from configuration by [`build_identity_provider`]. Every provider
//! ends in the same place: an OIDC identity token for the token validator.
//! Consent screens and redirects happen outside the relay; providers here
//! start from a credential the user already granted (a refresh token or an
//! authorization code).

use crate::config::ProviderConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

pub mod auth0;
pub mod firebase;
pub mod google;

pub use auth0::Auth0Provider;
pub use firebase::FirebaseProvider;
pub use google::{GoogleGrant, GoogleProvider};

/// Source of identity tokens
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Provider name, for logs
    fn name(&self) -> &'static str;

    /// Obtain a fresh identity token
    async fn obtain_token(&self) -> Result<String>;
}

/// Provider handing out a token obtained elsewhere
///
/// Used by service-side callers that already hold a bearer token.
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StaticTokenProvider { token: <redacted> }")
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenProvider {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn obtain_token(&self) -> Result<String> {
        if self.token.is_empty() {
            return Err(Error::Provider("no token configured".to_string()));
        }
        Ok(self.token.clone())
    }
}

/// Build the provider selected by `config`
pub fn build_identity_provider(config: &ProviderConfig) -> Arc<dyn IdentityProvider> {
    match config {
        ProviderConfig::Static { token } => Arc::new(StaticTokenProvider::new(token.clone())),
        ProviderConfig::Auth0 {
            domain,
            client_id,
            client_secret,
            refresh_token,
        } => Arc::new(Auth0Provider::new(
            domain,
            client_id,
            client_secret.clone(),
            refresh_token,
        )),
        ProviderConfig::Firebase {
            api_key,
            project_id,
            refresh_token,
        } => Arc::new(FirebaseProvider::new(api_key, project_id, refresh_token)),
        ProviderConfig::Google {
            client_id,
            client_secret,
            redirect_uri,
            refresh_token,
            authorization_code,
        } => {
            let grant = match (refresh_token, authorization_code) {
                (Some(token), _) => GoogleGrant::RefreshToken(token.clone()),
                (None, Some(code)) => GoogleGrant::AuthorizationCode(code.clone()),
                (None, None) => GoogleGrant::RefreshToken(String::new()),
            };
            Arc::new(GoogleProvider::new(
                client_id,
                client_secret,
                redirect_uri,
                grant,
            ))
        }
    }
}

/// Token endpoint response fields the providers read
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: serde_json::Value,
    #[serde(default)]
    error_description: Option<String>,
}

/// POST a form to a token endpoint and read the identity token out of the answer
pub(crate) async fn exchange(
    client: &reqwest::Client,
    provider: &str,
    url: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse> {
    debug!(provider, url = %url, "Requesting identity token");

    let response = client
        .post(url)
        .form(form)
        .send()
        .await
        .map_err(|e| Error::Provider(format!("{}: {}", provider, e)))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| Error::Provider(format!("{}: {}", provider, e)))?;

    if !status.is_success() {
        let detail = serde_json::from_str::<TokenErrorResponse>(&body)
            .map(|e| match e.error_description {
                Some(description) => format!("{}: {}", error_code(&e.error), description),
                None => error_code(&e.error),
            })
            .unwrap_or_else(|_| format!("HTTP {}", status));
        return Err(Error::Provider(format!("{}: {}", provider, detail)));
    }

    let token: TokenResponse = serde_json::from_str(&body)
        .map_err(|e| Error::Provider(format!("{}: invalid token response: {}", provider, e)))?;

    match token.id_token.as_deref() {
        Some(id_token) if !id_token.is_empty() => Ok(token),
        _ => Err(Error::Provider(format!(
            "{}: response carries no id_token",
            provider
        ))),
    }
}

// Firebase nests `{ "error": { "message": ... } }`, OAuth servers use a string
fn error_code(error: &serde_json::Value) -> String {
    match error {
        serde_json::Value::String(code) => code.clone(),
        other => other
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}
