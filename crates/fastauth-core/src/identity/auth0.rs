//! Auth0 identity provider

use super::{IdentityProvider, exchange};
use crate::Result;
use async_trait::async_trait;

/// Obtains identity tokens from an Auth0 tenant with a refresh-token grant
pub struct Auth0Provider {
    token_url: String,
    client_id: String,
    client_secret: Option<String>,
    refresh_token: String,
    client: reqwest::Client,
}

impl Auth0Provider {
    /// `domain` is the tenant domain, with or without scheme
    pub fn new(
        domain: &str,
        client_id: &str,
        client_secret: Option<String>,
        refresh_token: &str,
    ) -> Self {
        let base = if domain.starts_with("http://") || domain.starts_with("https://") {
            domain.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", domain.trim_end_matches('/'))
        };

        Self {
            token_url: format!("{}/oauth/token", base),
            client_id: client_id.to_string(),
            client_secret,
            refresh_token: refresh_token.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Token endpoint in use
    pub fn token_url(&self) -> &str {
        &self.token_url
    }
}

#[async_trait]
impl IdentityProvider for Auth0Provider {
    fn name(&self) -> &'static str {
        "auth0"
    }

    async fn obtain_token(&self) -> Result<String> {
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("refresh_token", self.refresh_token.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let response = exchange(&self.client, self.name(), &self.token_url, &form).await?;
        Ok(response.id_token.unwrap_or_default())
    }
}
