//! Error types for the relay service

use thiserror::Error;

/// Relay service errors
#[derive(Debug, Error)]
pub enum RelayError {
    /// Error raised by the signing core
    #[error(transparent)]
    Core(#[from] fastauth_core::Error),

    /// Missing or malformed bearer credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// MPC callback signature missing or wrong
    #[error("Invalid callback signature")]
    InvalidCallbackSignature,

    /// Request body could not be decoded
    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    /// Webhook error
    #[error("Webhook error: {0}")]
    WebhookError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Network error
    #[error("Network error: {0}")]
    Network(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            RelayError::Core(e) => e.status_code(),
            RelayError::Unauthorized(_) => 401,
            RelayError::InvalidCallbackSignature => 401,
            RelayError::InvalidBody(_) => 400,
            RelayError::Serialization(_) => 400,
            RelayError::WebhookError(_) => 502,
            RelayError::Network(_) => 503,
            RelayError::Internal(_) => 500,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            RelayError::Core(e) => e.is_retryable(),
            RelayError::Network(_) | RelayError::WebhookError(_) => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Serialization(err.to_string())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, RelayError>;
