//! Provider facade
//!
//! [`FastAuthProvider`] is the capability surface calling code uses: log in
//! through the configured identity provider, then request signatures for the
//! logged-in account. The session token is validated again on every signature
//! request.

use crate::identity::IdentityProvider;
use crate::relay::SignatureHandle;
use crate::{
    AccountPath, Error, PayloadKind, Result, Session, SignatureRequest, SigningGateway,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{info, warn};

/// Login state plus the signing gateway
pub struct FastAuthProvider {
    identity: Arc<dyn IdentityProvider>,
    gateway: SigningGateway,
    session: RwLock<Option<Session>>,
}

impl FastAuthProvider {
    pub fn new(identity: Arc<dyn IdentityProvider>, gateway: SigningGateway) -> Self {
        Self {
            identity,
            gateway,
            session: RwLock::new(None),
        }
    }

    /// Signing gateway
    pub fn gateway(&self) -> &SigningGateway {
        &self.gateway
    }

    /// Obtain an identity token and establish a session
    ///
    /// The session is only replaced once the new token validated; dropping
    /// the returned future before then leaves the session untouched. A token
    /// that fails validation clears any existing session.
    pub async fn login(&self) -> Result<AccountPath> {
        let token = self.identity.obtain_token().await?;

        let valid = match self.gateway.authenticate(&token).await {
            Ok(valid) => valid,
            Err(e) => {
                if e.token_rejection().is_some() {
                    self.session.write().take();
                }
                warn!(provider = self.identity.name(), error = %e, "Login failed");
                return Err(e);
            }
        };

        let session = Session::new(token, &valid);
        let account_path = session.account_path().to_string();
        *self.session.write() = Some(session);

        info!(
            provider = self.identity.name(),
            account_path = %account_path,
            "Session established"
        );
        Ok(account_path)
    }

    /// Invalidate the session and cancel its pending requests
    ///
    /// Idempotent.
    pub fn logout(&self) {
        let Some(session) = self.session.write().take() else {
            return;
        };
        let cancelled = self
            .gateway
            .coordinator()
            .cancel_account(session.account_path());
        info!(account_path = %session.account_path(), cancelled, "Session invalidated");
    }

    /// Whether a session exists and its token has not expired
    pub fn is_logged_in(&self) -> bool {
        self.current_session().is_some()
    }

    /// Account path of the logged-in user
    pub fn get_path(&self) -> Result<AccountPath> {
        self.current_session()
            .map(|s| s.account_path().to_string())
            .ok_or(Error::NotLoggedIn)
    }

    /// Request a signature over an encoded transaction
    pub async fn request_transaction_signature(
        &self,
        payload: impl Into<Vec<u8>>,
        algorithm: &str,
    ) -> Result<SignatureHandle> {
        self.request_signature(payload.into(), algorithm, PayloadKind::Transaction)
            .await
    }

    /// Request a signature over an encoded delegate action
    pub async fn request_delegate_action_signature(
        &self,
        payload: impl Into<Vec<u8>>,
        algorithm: &str,
    ) -> Result<SignatureHandle> {
        self.request_signature(payload.into(), algorithm, PayloadKind::DelegateAction)
            .await
    }

    /// Current state of a signature request
    pub fn get_signature_request(&self, request_id: &str) -> Result<SignatureRequest> {
        self.gateway.coordinator().get_signature_request(request_id)
    }

    /// Cancel a pending signature request
    ///
    /// Returns false if it had already settled.
    pub fn cancel_signature_request(&self, request_id: &str) -> Result<bool> {
        self.gateway.coordinator().cancel(request_id)
    }

    async fn request_signature(
        &self,
        payload: Vec<u8>,
        algorithm: &str,
        kind: PayloadKind,
    ) -> Result<SignatureHandle> {
        let session = self.current_session().ok_or(Error::NotLoggedIn)?;

        let result = self
            .gateway
            .request_signature(session.token(), None, payload, algorithm, kind)
            .await;

        if let Err(e) = &result
            && e.token_rejection().is_some()
        {
            self.invalidate(&session, "token no longer valid");
        }
        result
    }

    /// The session, if it exists and has not expired
    fn current_session(&self) -> Option<Session> {
        let session = self.session.read().clone()?;
        if session.is_expired() {
            self.invalidate(&session, "token expired");
            return None;
        }
        Some(session)
    }

    /// Drop `session` unless a newer login replaced it meanwhile
    fn invalidate(&self, session: &Session, why: &str) {
        let mut current = self.session.write();
        if current
            .as_ref()
            .is_some_and(|c| c.token() == session.token())
        {
            *current = None;
            info!(account_path = %session.account_path(), reason = why, "Session invalidated");
        }
    }
}

impl std::fmt::Debug for FastAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastAuthProvider")
            .field("identity", &self.identity.name())
            .field("session", &*self.session.read())
            .finish()
    }
}
