//! Authenticated session state

use crate::{AccountPath, Claims, ValidToken};
use chrono::{DateTime, Utc};
use std::fmt;

/// The identity token a caller logged in with and the account path it grants
#[derive(Clone)]
pub struct Session {
    token: String,
    claims: Claims,
    account_path: AccountPath,
    established_at: DateTime<Utc>,
}

impl Session {
    /// Session for a token that just passed validation
    pub fn new(token: String, valid: &ValidToken) -> Self {
        Self {
            token,
            claims: valid.claims().clone(),
            account_path: valid.account_path(),
            established_at: Utc::now(),
        }
    }

    /// Raw identity token; re-validated on every protected operation
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn claims(&self) -> &Claims {
        &self.claims
    }

    pub fn account_path(&self) -> &str {
        &self.account_path
    }

    pub fn established_at(&self) -> DateTime<Utc> {
        self.established_at
    }

    /// Token expiry (Unix seconds)
    pub fn expires_at(&self) -> i64 {
        self.claims.exp
    }

    /// Whether the session's token has expired
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.claims.exp
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"<redacted>")
            .field("account_path", &self.account_path)
            .field("expires_at", &self.claims.exp)
            .field("established_at", &self.established_at)
            .finish()
    }
}
