//! Google identity provider

use super::{IdentityProvider, exchange};
use crate::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

/// Google OAuth 2.0 token endpoint
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Google ID token issuer
pub const GOOGLE_ISSUER: &str = "https://accounts.google.com";

/// Credential the provider exchanges for an ID token
#[derive(Clone, PartialEq, Eq)]
pub enum GoogleGrant {
    RefreshToken(String),
    /// One-time code from the consent redirect
    AuthorizationCode(String),
}

impl std::fmt::Debug for GoogleGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GoogleGrant::RefreshToken(_) => f.write_str("RefreshToken(<redacted>)"),
            GoogleGrant::AuthorizationCode(_) => f.write_str("AuthorizationCode(<redacted>)"),
        }
    }
}

/// Obtains Google ID tokens
///
/// An authorization code can be redeemed once. When redeeming it yields a
/// refresh token, later calls use that refresh token instead.
pub struct GoogleProvider {
    token_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    grant: Mutex<GoogleGrant>,
    client: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(client_id: &str, client_secret: &str, redirect_uri: &str, grant: GoogleGrant) -> Self {
        Self {
            token_url: GOOGLE_TOKEN_URL.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            redirect_uri: redirect_uri.to_string(),
            grant: Mutex::new(grant),
            client: reqwest::Client::new(),
        }
    }

    /// Use a different token endpoint
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Grant the next call will use
    pub fn grant(&self) -> GoogleGrant {
        self.grant.lock().clone()
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn name(&self) -> &'static str {
        "google"
    }

    async fn obtain_token(&self) -> Result<String> {
        let grant = self.grant();
        let mut form = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        match &grant {
            GoogleGrant::RefreshToken(token) => {
                form.push(("grant_type", "refresh_token"));
                form.push(("refresh_token", token.as_str()));
            }
            GoogleGrant::AuthorizationCode(code) => {
                form.push(("grant_type", "authorization_code"));
                form.push(("code", code.as_str()));
                form.push(("redirect_uri", self.redirect_uri.as_str()));
            }
        }

        let response = exchange(&self.client, self.name(), &self.token_url, &form).await?;

        if let (GoogleGrant::AuthorizationCode(_), Some(refresh_token)) =
            (&grant, response.refresh_token)
        {
            debug!("Authorization code redeemed, switching to refresh token");
            *self.grant.lock() = GoogleGrant::RefreshToken(refresh_token);
        }
        Ok(response.id_token.unwrap_or_default())
    }
}
