//! Issuer key sets and the trusted issuer registry

use super::discovery;
use crate::{Error, Result};
use dashmap::DashMap;
use jsonwebtoken::jwk::{AlgorithmParameters, EllipticCurve, Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A single public (or shared) key an issuer signs tokens with
#[derive(Clone)]
pub struct VerificationKey {
    kid: Option<String>,
    algorithm: Algorithm,
    key: DecodingKey,
}

impl VerificationKey {
    /// Create a verification key
    pub fn new(kid: Option<String>, algorithm: Algorithm, key: DecodingKey) -> Self {
        Self {
            kid,
            algorithm,
            key,
        }
    }

    /// Build a key from a JWK, if its type and algorithm are usable
    pub fn from_jwk(jwk: &Jwk) -> Option<Self> {
        let algorithm = match jwk.common.key_algorithm {
            Some(key_algorithm) => algorithm_from_key_algorithm(key_algorithm)?,
            None => infer_algorithm(&jwk.algorithm)?,
        };
        let key = DecodingKey::from_jwk(jwk).ok()?;

        Some(Self {
            kid: jwk.common.key_id.clone(),
            algorithm,
            key,
        })
    }

    /// Key id (`kid`)
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    /// Algorithm this key verifies
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }
}

impl fmt::Debug for VerificationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

fn algorithm_from_key_algorithm(key_algorithm: KeyAlgorithm) -> Option<Algorithm> {
    match key_algorithm {
        KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        // Encryption algorithms
        _ => None,
    }
}

fn infer_algorithm(params: &AlgorithmParameters) -> Option<Algorithm> {
    match params {
        AlgorithmParameters::RSA(_) => Some(Algorithm::RS256),
        AlgorithmParameters::EllipticCurve(ec) => match ec.curve {
            EllipticCurve::P256 => Some(Algorithm::ES256),
            EllipticCurve::P384 => Some(Algorithm::ES384),
            _ => None,
        },
        AlgorithmParameters::OctetKeyPair(_) => Some(Algorithm::EdDSA),
        AlgorithmParameters::OctetKey(_) => Some(Algorithm::HS256),
    }
}

/// The set of keys an issuer currently signs with
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    keys: Vec<VerificationKey>,
}

impl KeySet {
    /// Create an empty key set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key
    pub fn with_key(mut self, key: VerificationKey) -> Self {
        self.keys.push(key);
        self
    }

    /// HS256 shared-secret key set
    pub fn from_secret(kid: Option<&str>, secret: &[u8]) -> Self {
        Self::new().with_key(VerificationKey::new(
            kid.map(str::to_string),
            Algorithm::HS256,
            DecodingKey::from_secret(secret),
        ))
    }

    /// RS256 key set from a PEM-encoded RSA public key
    pub fn from_rsa_pem(kid: Option<&str>, pem: &[u8]) -> Result<Self> {
        let key = DecodingKey::from_rsa_pem(pem)
            .map_err(|e| Error::Config(format!("invalid RSA public key: {}", e)))?;
        Ok(Self::new().with_key(VerificationKey::new(
            kid.map(str::to_string),
            Algorithm::RS256,
            key,
        )))
    }

    /// ES256 key set from a PEM-encoded P-256 public key
    pub fn from_ec_pem(kid: Option<&str>, pem: &[u8]) -> Result<Self> {
        let key = DecodingKey::from_ec_pem(pem)
            .map_err(|e| Error::Config(format!("invalid EC public key: {}", e)))?;
        Ok(Self::new().with_key(VerificationKey::new(
            kid.map(str::to_string),
            Algorithm::ES256,
            key,
        )))
    }

    /// EdDSA key set from a PEM-encoded Ed25519 public key
    pub fn from_ed_pem(kid: Option<&str>, pem: &[u8]) -> Result<Self> {
        let key = DecodingKey::from_ed_pem(pem)
            .map_err(|e| Error::Config(format!("invalid Ed25519 public key: {}", e)))?;
        Ok(Self::new().with_key(VerificationKey::new(
            kid.map(str::to_string),
            Algorithm::EdDSA,
            key,
        )))
    }

    /// Key set from a JWKS document
    ///
    /// Keys that cannot be used for signature verification are skipped; a
    /// document with no usable key is an error.
    pub fn from_jwks(jwks: &JwkSet) -> Result<Self> {
        let mut keys = Vec::with_capacity(jwks.keys.len());
        for jwk in &jwks.keys {
            match VerificationKey::from_jwk(jwk) {
                Some(key) => keys.push(key),
                None => warn!(kid = ?jwk.common.key_id, "Skipping unusable JWK"),
            }
        }

        if keys.is_empty() {
            return Err(Error::Discovery("JWKS contains no usable keys".to_string()));
        }

        Ok(Self { keys })
    }

    /// Select the key for a token
    ///
    /// With a `kid`, the key carrying that id and algorithm. Without one, the
    /// only key for the algorithm; ambiguity yields no key.
    pub fn find(&self, kid: Option<&str>, algorithm: Algorithm) -> Option<&VerificationKey> {
        match kid {
            Some(kid) => self
                .keys
                .iter()
                .find(|k| k.kid() == Some(kid) && k.algorithm == algorithm),
            None => {
                let mut candidates = self.keys.iter().filter(|k| k.algorithm == algorithm);
                let first = candidates.next()?;
                match candidates.next() {
                    Some(_) => None,
                    None => Some(first),
                }
            }
        }
    }

    /// Key ids in this set
    pub fn key_ids(&self) -> Vec<&str> {
        self.keys.iter().filter_map(|k| k.kid()).collect()
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// An issuer the validator accepts tokens from
pub struct TrustedIssuer {
    issuer: String,
    keys: RwLock<Arc<KeySet>>,
    jwks_uri: Option<String>,
    last_refresh: Mutex<Option<Instant>>,
}

impl TrustedIssuer {
    /// Issuer identifier
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// JWKS endpoint, for issuers whose keys are fetched remotely
    pub fn jwks_uri(&self) -> Option<&str> {
        self.jwks_uri.as_deref()
    }

    /// Snapshot of the current key set
    pub fn keys(&self) -> Arc<KeySet> {
        Arc::clone(&self.keys.read())
    }
}

impl fmt::Debug for TrustedIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustedIssuer")
            .field("issuer", &self.issuer)
            .field("jwks_uri", &self.jwks_uri)
            .field("keys", &self.keys.read().len())
            .finish()
    }
}

/// Registry of trusted issuers and their key sets
pub struct IssuerRegistry {
    issuers: DashMap<String, Arc<TrustedIssuer>>,
    client: reqwest::Client,
    refresh_cooldown: Duration,
}

impl IssuerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    /// Create an empty registry using the given HTTP client for JWKS retrieval
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            issuers: DashMap::new(),
            client,
            refresh_cooldown: Duration::from_secs(60),
        }
    }

    /// Minimum time between two JWKS fetches for the same issuer
    pub fn with_refresh_cooldown(mut self, cooldown: Duration) -> Self {
        self.refresh_cooldown = cooldown;
        self
    }

    /// Trust an issuer with a fixed key set
    pub fn register_static(&self, issuer: impl Into<String>, keys: KeySet) {
        let issuer = issuer.into();
        info!(issuer = %issuer, keys = keys.len(), "Registered static issuer");
        self.issuers.insert(
            issuer.clone(),
            Arc::new(TrustedIssuer {
                issuer,
                keys: RwLock::new(Arc::new(keys)),
                jwks_uri: None,
                last_refresh: Mutex::new(None),
            }),
        );
    }

    /// Trust an issuer whose keys are published at `jwks_uri`
    ///
    /// The key set is fetched immediately.
    pub async fn register_remote(
        &self,
        issuer: impl Into<String>,
        jwks_uri: impl Into<String>,
    ) -> Result<()> {
        let issuer = issuer.into();
        let jwks_uri = jwks_uri.into();

        let jwks = discovery::fetch_jwks(&self.client, &jwks_uri).await?;
        let keys = KeySet::from_jwks(&jwks)?;

        info!(
            issuer = %issuer,
            jwks_uri = %jwks_uri,
            keys = keys.len(),
            "Registered remote issuer"
        );

        self.issuers.insert(
            issuer.clone(),
            Arc::new(TrustedIssuer {
                issuer,
                keys: RwLock::new(Arc::new(keys)),
                jwks_uri: Some(jwks_uri),
                last_refresh: Mutex::new(Some(Instant::now())),
            }),
        );
        Ok(())
    }

    /// Run OIDC discovery for `issuer` and trust it with the published keys
    pub async fn discover(&self, issuer: &str) -> Result<discovery::OidcConfiguration> {
        let config = discovery::fetch_configuration(&self.client, issuer).await?;
        self.register_remote(issuer, config.jwks_uri.clone()).await?;
        Ok(config)
    }

    /// Look up a trusted issuer
    pub fn get(&self, issuer: &str) -> Option<Arc<TrustedIssuer>> {
        self.issuers.get(issuer).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether the issuer is trusted
    pub fn contains(&self, issuer: &str) -> bool {
        self.issuers.contains_key(issuer)
    }

    /// Stop trusting an issuer
    pub fn remove(&self, issuer: &str) -> bool {
        self.issuers.remove(issuer).is_some()
    }

    /// Trusted issuer identifiers
    pub fn issuers(&self) -> Vec<String> {
        self.issuers.iter().map(|e| e.key().clone()).collect()
    }

    /// Re-fetch a remote issuer's key set
    ///
    /// Returns `Ok(false)` without fetching for static issuers and while the
    /// refresh cooldown is running.
    pub(crate) async fn refresh(&self, trusted: &TrustedIssuer) -> Result<bool> {
        let Some(jwks_uri) = trusted.jwks_uri.as_deref() else {
            return Ok(false);
        };

        {
            let mut last = trusted.last_refresh.lock();
            if let Some(at) = *last
                && at.elapsed() < self.refresh_cooldown
            {
                return Ok(false);
            }
            *last = Some(Instant::now());
        }

        debug!(issuer = %trusted.issuer, "Refreshing issuer key set");
        let jwks = discovery::fetch_jwks(&self.client, jwks_uri).await?;
        let keys = KeySet::from_jwks(&jwks)?;
        *trusted.keys.write() = Arc::new(keys);
        Ok(true)
    }
}

impl Default for IssuerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
