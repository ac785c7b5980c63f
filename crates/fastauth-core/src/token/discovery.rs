//! OIDC discovery and JWKS retrieval

use crate::{Error, Result};
use jsonwebtoken::jwk::JwkSet;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Path of the discovery document relative to the issuer
pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// The subset of the OIDC provider metadata the relay consumes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidcConfiguration {
    /// Issuer identifier; must match the issuer the document was fetched for
    pub issuer: String,
    /// Location of the issuer's public key set
    pub jwks_uri: String,
    /// Token signing algorithms the issuer uses
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_endpoint: Option<String>,
}

/// Discovery document URL for an issuer
pub fn discovery_url(issuer: &str) -> String {
    format!("{}{}", issuer.trim_end_matches('/'), DISCOVERY_PATH)
}

/// Fetch and check an issuer's discovery document
pub async fn fetch_configuration(
    client: &reqwest::Client,
    issuer: &str,
) -> Result<OidcConfiguration> {
    let url = discovery_url(issuer);
    debug!(url = %url, "Fetching OIDC discovery document");

    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| Error::Discovery(format!("{}: {}", url, e)))?;

    if !response.status().is_success() {
        return Err(Error::Discovery(format!(
            "{}: HTTP {}",
            url,
            response.status()
        )));
    }

    let config: OidcConfiguration = response
        .json()
        .await
        .map_err(|e| Error::Discovery(format!("{}: invalid document: {}", url, e)))?;

    if config.issuer.trim_end_matches('/') != issuer.trim_end_matches('/') {
        return Err(Error::Discovery(format!(
            "issuer mismatch: expected {}, document declares {}",
            issuer, config.issuer
        )));
    }

    Ok(config)
}

/// Fetch a JWKS document
pub async fn fetch_jwks(client: &reqwest::Client, jwks_uri: &str) -> Result<JwkSet> {
    debug!(jwks_uri = %jwks_uri, "Fetching JWKS");

    let response = client
        .get(jwks_uri)
        .send()
        .await
        .map_err(|e| Error::Discovery(format!("{}: {}", jwks_uri, e)))?;

    if !response.status().is_success() {
        return Err(Error::Discovery(format!(
            "{}: HTTP {}",
            jwks_uri,
            response.status()
        )));
    }

    response
        .json()
        .await
        .map_err(|e| Error::Discovery(format!("{}: invalid JWKS: {}", jwks_uri, e)))
}
