//! Identity token validation
//!
//! A token is accepted only when it is well formed, unexpired, issued by the
//! expected trusted issuer, signed by one of that issuer's keys and addressed
//! to the expected audience. Expiry is decided from the claims alone, so an
//! expired token is reported as `expired` whatever its signature.
//!
//! Validation keeps no per-token state and may run concurrently without limit.

pub mod claims;
pub mod discovery;
pub mod keys;

pub use claims::{Audience, Claims};
pub use discovery::OidcConfiguration;
pub use keys::{IssuerRegistry, KeySet, TrustedIssuer, VerificationKey};

use crate::{AccountPath, Error, Result, TokenRejection};
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation};
use std::sync::Arc;
use tracing::debug;

/// A token that passed every check at `validated_at`
#[derive(Debug, Clone)]
pub struct ValidToken {
    claims: Claims,
    algorithm: Algorithm,
    validated_at: DateTime<Utc>,
}

impl ValidToken {
    /// Verified claims
    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn issuer(&self) -> &str {
        &self.claims.iss
    }

    pub fn subject(&self) -> &str {
        &self.claims.sub
    }

    /// Algorithm of the key that verified the signature
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Expiry (Unix seconds)
    pub fn expires_at(&self) -> i64 {
        self.claims.exp
    }

    pub fn validated_at(&self) -> DateTime<Utc> {
        self.validated_at
    }

    /// Account path the token authenticates
    pub fn account_path(&self) -> AccountPath {
        self.claims.account_path()
    }

    /// Whether the token has expired at `now` (Unix seconds)
    pub fn is_expired_at(&self, now: i64) -> bool {
        now >= self.claims.exp
    }

    /// Whether the token has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp())
    }
}

#[cfg(test)]
impl ValidToken {
    pub(crate) fn for_tests(iss: &str, sub: &str, exp: i64) -> Self {
        Self {
            claims: Claims {
                iss: iss.to_string(),
                sub: sub.to_string(),
                aud: Audience::Single("https://api.example".to_string()),
                exp,
                iat: None,
                nbf: None,
                email: None,
                email_verified: None,
            },
            algorithm: Algorithm::HS256,
            validated_at: Utc::now(),
        }
    }
}

/// Validates identity tokens against a trusted issuer registry
#[derive(Clone)]
pub struct TokenValidator {
    registry: Arc<IssuerRegistry>,
    /// Accepted header algorithms; empty accepts whatever the selected key verifies
    allowed_algorithms: Vec<Algorithm>,
    clock_skew_secs: i64,
}

impl TokenValidator {
    /// Create a validator over the given registry
    pub fn new(registry: Arc<IssuerRegistry>) -> Self {
        Self {
            registry,
            allowed_algorithms: Vec::new(),
            clock_skew_secs: 0,
        }
    }

    /// Restrict accepted token signing algorithms
    pub fn with_allowed_algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.allowed_algorithms = algorithms;
        self
    }

    /// Tolerance applied to the expiry and not-before checks
    pub fn with_clock_skew(mut self, seconds: u64) -> Self {
        self.clock_skew_secs = seconds.min(i64::MAX as u64) as i64;
        self
    }

    /// Trusted issuer registry
    pub fn registry(&self) -> &Arc<IssuerRegistry> {
        &self.registry
    }

    /// Validate `token` for the expected issuer and audience
    pub async fn validate(
        &self,
        token: &str,
        expected_issuer: &str,
        expected_audience: &str,
    ) -> Result<ValidToken> {
        self.validate_at(token, expected_issuer, expected_audience, Utc::now().timestamp())
            .await
    }

    /// Validate `token` as of `now` (Unix seconds)
    pub async fn validate_at(
        &self,
        token: &str,
        expected_issuer: &str,
        expected_audience: &str,
        now: i64,
    ) -> Result<ValidToken> {
        let result = self
            .check(token, expected_issuer, expected_audience, now)
            .await;
        if let Err(ref e) = result
            && let Some(reason) = e.token_rejection()
        {
            debug!(issuer = %expected_issuer, reason = %reason, "Token rejected");
        }
        result
    }

    async fn check(
        &self,
        token: &str,
        expected_issuer: &str,
        expected_audience: &str,
        now: i64,
    ) -> Result<ValidToken> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|_| Error::invalid_token(TokenRejection::Malformed))?;
        let peeked = claims::peek_claims(token)?;

        if now >= peeked.exp.saturating_add(self.clock_skew_secs) {
            return Err(Error::invalid_token(TokenRejection::Expired));
        }
        if let Some(nbf) = peeked.nbf
            && now.saturating_add(self.clock_skew_secs) < nbf
        {
            return Err(Error::invalid_token(TokenRejection::NotYetValid));
        }

        if peeked.iss != expected_issuer {
            return Err(Error::invalid_token(TokenRejection::Issuer));
        }
        let trusted = self
            .registry
            .get(expected_issuer)
            .ok_or_else(|| Error::invalid_token(TokenRejection::Issuer))?;

        if !self.allowed_algorithms.is_empty() && !self.allowed_algorithms.contains(&header.alg) {
            return Err(Error::invalid_token(TokenRejection::Signature));
        }

        let key = match trusted.keys().find(header.kid.as_deref(), header.alg).cloned() {
            Some(key) => key,
            None => {
                // Unknown kid may mean the issuer rotated its keys
                let refreshed = self.registry.refresh(&trusted).await.unwrap_or(false);
                let retry = if refreshed {
                    trusted.keys().find(header.kid.as_deref(), header.alg).cloned()
                } else {
                    None
                };
                retry.ok_or_else(|| Error::invalid_token(TokenRejection::Signature))?
            }
        };

        let mut validation = Validation::new(key.algorithm());
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.set_issuer(&[expected_issuer]);
        validation.set_audience(&[expected_audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        let data = jsonwebtoken::decode::<Claims>(token, key.decoding_key(), &validation)
            .map_err(|e| Error::invalid_token(rejection_for(e.kind())))?;

        Ok(ValidToken {
            claims: data.claims,
            algorithm: key.algorithm(),
            validated_at: Utc::now(),
        })
    }
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("issuers", &self.registry.issuers())
            .field("allowed_algorithms", &self.allowed_algorithms)
            .field("clock_skew_secs", &self.clock_skew_secs)
            .finish()
    }
}

fn rejection_for(kind: &ErrorKind) -> TokenRejection {
    match kind {
        ErrorKind::InvalidIssuer => TokenRejection::Issuer,
        ErrorKind::InvalidAudience => TokenRejection::Audience,
        ErrorKind::ExpiredSignature => TokenRejection::Expired,
        ErrorKind::ImmatureSignature => TokenRejection::NotYetValid,
        ErrorKind::MissingRequiredClaim(claim) => match claim.as_str() {
            "aud" => TokenRejection::Audience,
            "iss" => TokenRejection::Issuer,
            "exp" => TokenRejection::Expired,
            _ => TokenRejection::Malformed,
        },
        ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
            TokenRejection::Malformed
        }
        _ => TokenRejection::Signature,
    }
}
