//! Stateless signing path: validate, resolve, build, submit
//!
//! Every call re-validates the bearer token; nothing about a token is cached
//! between calls. Validation, key type and request failures are returned
//! before anything reaches the coordinator's table.

use crate::relay::{CoordinatorConfig, MpcNetwork, RelayCoordinator, SignatureHandle};
use crate::token::{IssuerRegistry, TokenValidator, ValidToken};
use crate::{Error, FastAuthConfig, PayloadKind, Result, SignatureRequest, key_type, request};
use std::sync::Arc;
use tracing::debug;

/// Composes token validation, key type resolution, request building and the
/// relay coordinator
#[derive(Debug, Clone)]
pub struct SigningGateway {
    validator: TokenValidator,
    coordinator: RelayCoordinator,
    issuer: String,
    audience: String,
}

impl SigningGateway {
    pub fn new(
        validator: TokenValidator,
        coordinator: RelayCoordinator,
        issuer: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            validator,
            coordinator,
            issuer: issuer.into(),
            audience: audience.into(),
        }
    }

    /// Build a gateway from configuration and start its coordinator
    ///
    /// Must be called from within a tokio runtime.
    pub fn from_config(
        config: &FastAuthConfig,
        registry: Arc<IssuerRegistry>,
        network: Arc<dyn MpcNetwork>,
    ) -> Self {
        let validator = TokenValidator::new(registry)
            .with_allowed_algorithms(config.token_algorithms.clone())
            .with_clock_skew(config.clock_skew_secs);
        let coordinator = RelayCoordinator::start(
            CoordinatorConfig::default()
                .with_request_timeout(config.request_timeout)
                .with_retention(config.retention),
            network,
        );
        Self::new(validator, coordinator, &config.issuer, &config.audience)
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    pub fn validator(&self) -> &TokenValidator {
        &self.validator
    }

    pub fn coordinator(&self) -> &RelayCoordinator {
        &self.coordinator
    }

    /// Validate a bearer token for the configured issuer and audience
    pub async fn authenticate(&self, bearer: &str) -> Result<ValidToken> {
        self.validator
            .validate(bearer, &self.issuer, &self.audience)
            .await
    }

    /// Validate `bearer` and submit a signature request for its account
    ///
    /// A caller-supplied `account_path` must equal the path the token
    /// authenticates.
    pub async fn request_signature(
        &self,
        bearer: &str,
        account_path: Option<&str>,
        payload: Vec<u8>,
        algorithm: &str,
        kind: PayloadKind,
    ) -> Result<SignatureHandle> {
        let token = self.authenticate(bearer).await?;
        let key_type = key_type::resolve(algorithm)?;

        let path = token.account_path();
        if let Some(requested) = account_path
            && requested != path
        {
            debug!(requested = %requested, authenticated = %path, "Account path mismatch");
            return Err(Error::InvalidRequest(
                "account path does not match the authenticated identity".to_string(),
            ));
        }

        let request = request::build(path, payload, key_type, kind)?;
        self.coordinator.submit(request, &token)
    }

    /// Look up a request owned by the bearer's account
    ///
    /// Requests of other accounts are reported as not found.
    pub async fn get_signature_request(
        &self,
        bearer: &str,
        request_id: &str,
    ) -> Result<SignatureRequest> {
        let token = self.authenticate(bearer).await?;
        self.owned(&token, request_id)
    }

    /// Cancel a pending request owned by the bearer's account
    pub async fn cancel_signature_request(&self, bearer: &str, request_id: &str) -> Result<bool> {
        let token = self.authenticate(bearer).await?;
        self.owned(&token, request_id)?;
        self.coordinator.cancel(request_id)
    }

    /// A status handle on a request owned by the bearer's account
    pub async fn signature_handle(&self, bearer: &str, request_id: &str) -> Result<SignatureHandle> {
        let token = self.authenticate(bearer).await?;
        self.owned(&token, request_id)?;
        self.coordinator.handle(request_id)
    }

    fn owned(&self, token: &ValidToken, request_id: &str) -> Result<SignatureRequest> {
        let request = self.coordinator.get_signature_request(request_id)?;
        if request.account_path() != token.account_path() {
            return Err(Error::NotFound(request_id.to_string()));
        }
        Ok(request)
    }
}
