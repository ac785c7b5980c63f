//! Error types for the FastAuth signature relay

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for FastAuth operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why an identity token was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenRejection {
    /// Signature did not verify against the issuer's key set
    Signature,
    /// Issuer is not trusted or does not match the expected issuer
    Issuer,
    /// Expected audience is not among the token's audiences
    Audience,
    /// `now >= exp`
    Expired,
    /// `now < nbf`
    NotYetValid,
    /// Token could not be parsed
    Malformed,
}

impl fmt::Display for TokenRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenRejection::Signature => write!(f, "signature"),
            TokenRejection::Issuer => write!(f, "issuer"),
            TokenRejection::Audience => write!(f, "audience"),
            TokenRejection::Expired => write!(f, "expired"),
            TokenRejection::NotYetValid => write!(f, "not yet valid"),
            TokenRejection::Malformed => write!(f, "malformed"),
        }
    }
}

/// Errors that can occur while authenticating and relaying signature requests
#[derive(Debug, Error)]
pub enum Error {
    // ============ Pre-submission validation ============
    /// Identity token failed validation
    #[error("Invalid token: {reason}")]
    InvalidToken { reason: TokenRejection },

    /// Algorithm identifier outside the supported set
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Malformed payload or account path
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No session, or the session's token has expired
    #[error("Not logged in")]
    NotLoggedIn,

    // ============ Request lookup ============
    /// Unknown signature request id
    #[error("Signature request not found: {0}")]
    NotFound(String),

    // ============ Post-submission terminal failures ============
    /// MPC network declined or could not be reached
    #[error("Signature request {request_id} rejected: {reason}")]
    Rejected { request_id: String, reason: String },

    /// No MPC response within the timeout window
    #[error("Signature request expired: {0}")]
    Expired(String),

    /// Request was cancelled before the MPC network answered
    #[error("Signature request cancelled: {0}")]
    Cancelled(String),

    // ============ Collaborators ============
    /// Identity provider could not produce a token
    #[error("Identity provider error: {0}")]
    Provider(String),

    /// OIDC discovery or JWKS retrieval failed
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// MPC network transport error
    #[error("Network error: {0}")]
    Network(String),

    // ============ Internal ============
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for an `InvalidToken` error
    pub fn invalid_token(reason: TokenRejection) -> Self {
        Error::InvalidToken { reason }
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::InvalidToken { .. } => 401,
            Error::NotLoggedIn => 401,
            Error::UnsupportedAlgorithm(_) => 400,
            Error::InvalidRequest(_) => 400,
            Error::Serialization(_) => 400,
            Error::NotFound(_) => 404,
            Error::Rejected { .. } => 409,
            Error::Cancelled(_) => 409,
            Error::Expired(_) => 410,
            Error::Provider(_) => 502,
            Error::Discovery(_) => 502,
            Error::Network(_) => 503,
            Error::Config(_) => 500,
            Error::Internal(_) => 500,
        }
    }

    /// Check if this error is retryable
    ///
    /// Token failures need re-authentication, and a signature request is never
    /// replayed: resubmitting creates a new request id.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Discovery(_) | Error::Provider(_)
        )
    }

    /// The token rejection reason, if this is an `InvalidToken` error
    pub fn token_rejection(&self) -> Option<TokenRejection> {
        match self {
            Error::InvalidToken { reason } => Some(*reason),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(e: base64::DecodeError) -> Self {
        Error::InvalidRequest(format!("invalid base64: {}", e))
    }
}
