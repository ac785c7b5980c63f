//! Relay configuration

use crate::{Error, Result};
use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Identity provider selection
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Caller-supplied bearer token
    Static { token: String },
    Auth0 {
        domain: String,
        client_id: String,
        #[serde(default)]
        client_secret: Option<String>,
        refresh_token: String,
    },
    Firebase {
        api_key: String,
        project_id: String,
        refresh_token: String,
    },
    Google {
        client_id: String,
        client_secret: String,
        redirect_uri: String,
        #[serde(default)]
        refresh_token: Option<String>,
        #[serde(default)]
        authorization_code: Option<String>,
    },
}

impl ProviderConfig {
    /// Provider name
    pub fn name(&self) -> &'static str {
        match self {
            ProviderConfig::Static { .. } => "static",
            ProviderConfig::Auth0 { .. } => "auth0",
            ProviderConfig::Firebase { .. } => "firebase",
            ProviderConfig::Google { .. } => "google",
        }
    }

    fn validate(&self) -> Result<()> {
        let missing = |field: &str| -> Result<()> {
            Err(Error::Config(format!("{}: {} is required", self.name(), field)))
        };
        match self {
            ProviderConfig::Static { .. } => Ok(()),
            ProviderConfig::Auth0 {
                domain,
                client_id,
                refresh_token,
                ..
            } => {
                if domain.is_empty() {
                    return missing("domain");
                }
                if client_id.is_empty() {
                    return missing("client_id");
                }
                if refresh_token.is_empty() {
                    return missing("refresh_token");
                }
                Ok(())
            }
            ProviderConfig::Firebase {
                api_key,
                project_id,
                refresh_token,
            } => {
                if api_key.is_empty() {
                    return missing("api_key");
                }
                if project_id.is_empty() {
                    return missing("project_id");
                }
                if refresh_token.is_empty() {
                    return missing("refresh_token");
                }
                Ok(())
            }
            ProviderConfig::Google {
                client_id,
                client_secret,
                redirect_uri,
                refresh_token,
                authorization_code,
            } => {
                if client_id.is_empty() {
                    return missing("client_id");
                }
                if client_secret.is_empty() {
                    return missing("client_secret");
                }
                if refresh_token.is_none() && authorization_code.is_none() {
                    return missing("refresh_token or authorization_code");
                }
                if authorization_code.is_some() && redirect_uri.is_empty() {
                    return missing("redirect_uri");
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderConfig::Static { .. } => f.write_str("Static { .. }"),
            ProviderConfig::Auth0 {
                domain, client_id, ..
            } => f
                .debug_struct("Auth0")
                .field("domain", domain)
                .field("client_id", client_id)
                .finish_non_exhaustive(),
            ProviderConfig::Firebase { project_id, .. } => f
                .debug_struct("Firebase")
                .field("project_id", project_id)
                .finish_non_exhaustive(),
            ProviderConfig::Google {
                client_id,
                redirect_uri,
                ..
            } => f
                .debug_struct("Google")
                .field("client_id", client_id)
                .field("redirect_uri", redirect_uri)
                .finish_non_exhaustive(),
        }
    }
}

/// FastAuth relay configuration
#[derive(Debug, Clone)]
pub struct FastAuthConfig {
    /// Expected token issuer
    pub issuer: String,
    /// Expected token audience
    pub audience: String,
    /// Accepted token signing algorithms; empty accepts the issuer key's algorithm
    pub token_algorithms: Vec<Algorithm>,
    /// MPC network endpoint
    pub mpc_url: Option<String>,
    /// How long a signature request may stay pending
    pub request_timeout: Duration,
    /// How long settled requests stay queryable
    pub retention: Duration,
    /// Tolerance for the expiry and not-before checks, in seconds
    pub clock_skew_secs: u64,
    /// Minimum interval between JWKS refreshes for one issuer
    pub jwks_refresh_cooldown: Duration,
    /// Identity provider used by `login`
    pub provider: Option<ProviderConfig>,
}

impl Default for FastAuthConfig {
    fn default() -> Self {
        Self {
            issuer: String::new(),
            audience: String::new(),
            token_algorithms: Vec::new(),
            mpc_url: None,
            request_timeout: Duration::from_secs(30),
            retention: Duration::from_secs(600),
            clock_skew_secs: 0,
            jwks_refresh_cooldown: Duration::from_secs(60),
            provider: None,
        }
    }
}

impl FastAuthConfig {
    /// Create a configuration for an issuer and audience
    pub fn new(issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            ..Self::default()
        }
    }

    /// Accept only tokens signed with `algorithm`
    pub fn with_token_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.token_algorithms = vec![algorithm];
        self
    }

    /// Set the MPC network endpoint
    pub fn with_mpc_url(mut self, url: impl Into<String>) -> Self {
        self.mpc_url = Some(url.into());
        self
    }

    /// Set the pending-request timeout window
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the settled-request retention window
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Set the clock skew tolerance
    pub fn with_clock_skew(mut self, seconds: u64) -> Self {
        self.clock_skew_secs = seconds;
        self
    }

    /// Set the JWKS refresh cooldown
    pub fn with_jwks_refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.jwks_refresh_cooldown = cooldown;
        self
    }

    /// Select the identity provider
    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Check the configuration for missing or inconsistent values
    pub fn validate(&self) -> Result<()> {
        if self.issuer.trim().is_empty() {
            return Err(Error::Config("issuer is required".to_string()));
        }
        if self.audience.trim().is_empty() {
            return Err(Error::Config("audience is required".to_string()));
        }
        if self.request_timeout.is_zero() {
            return Err(Error::Config("request timeout must be positive".to_string()));
        }
        if let Some(url) = &self.mpc_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(Error::Config(format!("MPC url must be http(s): {}", url)));
        }
        if let Some(provider) = &self.provider {
            provider.validate()?;
        }
        Ok(())
    }
}

/// Parse a JWT signing algorithm name such as `RS256`
pub fn parse_token_algorithm(name: &str) -> Result<Algorithm> {
    name.trim()
        .to_ascii_uppercase()
        .replace("EDDSA", "EdDSA")
        .parse::<Algorithm>()
        .map_err(|_| Error::Config(format!("unknown token signing algorithm: {}", name)))
}
