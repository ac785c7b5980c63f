//! Firebase identity provider

use super::{IdentityProvider, exchange};
use crate::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

/// Google secure token service, which issues Firebase ID tokens
pub const SECURE_TOKEN_URL: &str = "https://securetoken.googleapis.com/v1/token";

/// Issuer prefix of Firebase ID tokens; the project id completes it
pub const FIREBASE_ISSUER_PREFIX: &str = "https://securetoken.google.com/";

/// Obtains Firebase ID tokens with a refresh-token grant
///
/// The secure token service may rotate the refresh token; the latest one is
/// kept for the next call.
pub struct FirebaseProvider {
    token_url: String,
    api_key: String,
    project_id: String,
    refresh_token: RwLock<String>,
    client: reqwest::Client,
}

impl FirebaseProvider {
    pub fn new(api_key: &str, project_id: &str, refresh_token: &str) -> Self {
        Self {
            token_url: SECURE_TOKEN_URL.to_string(),
            api_key: api_key.to_string(),
            project_id: project_id.to_string(),
            refresh_token: RwLock::new(refresh_token.to_string()),
            client: reqwest::Client::new(),
        }
    }

    /// Use a different secure token endpoint (emulators, tests)
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Issuer of the tokens this project receives
    pub fn issuer(&self) -> String {
        format!("{}{}", FIREBASE_ISSUER_PREFIX, self.project_id)
    }
}

#[async_trait]
impl IdentityProvider for FirebaseProvider {
    fn name(&self) -> &'static str {
        "firebase"
    }

    async fn obtain_token(&self) -> Result<String> {
        let url = format!("{}?key={}", self.token_url, self.api_key);
        let refresh_token = self.refresh_token.read().clone();
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
        ];

        let response = exchange(&self.client, self.name(), &url, &form).await?;
        if let Some(rotated) = response.refresh_token
            && rotated != refresh_token
        {
            debug!(project_id = %self.project_id, "Firebase refresh token rotated");
            *self.refresh_token.write() = rotated;
        }
        Ok(response.id_token.unwrap_or_default())
    }
}
