//! Relay to the MPC signing network
//!
//! The [`MpcNetwork`] trait abstracts how a request reaches the signing
//! network, and [`ResponseSink`] is where the network's answers come back in,
//! whatever the transport (in-process, HTTP push callback, polling bridge).

use crate::{AccountPath, KeyType, PayloadKind, RequestId, Result, Signature, SignatureRequest};
use serde::{Deserialize, Serialize};

pub use async_trait::async_trait;

pub mod coordinator;
pub mod memory;

pub use coordinator::{
    CoordinatorConfig, CoordinatorStats, RelayCoordinator, RequestEvent, SignatureHandle,
};
pub use memory::MemoryMpcNetwork;

/// Request sent to the MPC network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MpcSignRequest {
    pub request_id: RequestId,
    pub account_path: AccountPath,
    #[serde(with = "crate::types::base64_bytes")]
    pub payload: Vec<u8>,
    pub key_type: KeyType,
    #[serde(default)]
    pub payload_kind: PayloadKind,
}

impl From<&SignatureRequest> for MpcSignRequest {
    fn from(request: &SignatureRequest) -> Self {
        Self {
            request_id: request.id().to_string(),
            account_path: request.account_path().to_string(),
            payload: request.payload().to_vec(),
            key_type: request.key_type(),
            payload_kind: request.payload_kind(),
        }
    }
}

/// Outcome reported by the MPC network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MpcOutcome {
    Signature { signature: Signature },
    Error { error: String },
}

/// Response from the MPC network: `{ requestId, signature }` or `{ requestId, error }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MpcResponse {
    pub request_id: RequestId,
    #[serde(flatten)]
    pub outcome: MpcOutcome,
}

impl MpcResponse {
    /// Successful response
    pub fn signature(request_id: impl Into<RequestId>, signature: Signature) -> Self {
        Self {
            request_id: request_id.into(),
            outcome: MpcOutcome::Signature { signature },
        }
    }

    /// Error response
    pub fn error(request_id: impl Into<RequestId>, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            outcome: MpcOutcome::Error {
                error: error.into(),
            },
        }
    }
}

/// Transport to the MPC signing network
///
/// `forward` only delivers the request; the answer arrives later through a
/// [`ResponseSink`].
#[async_trait]
pub trait MpcNetwork: Send + Sync {
    /// Deliver a signing request
    async fn forward(&self, request: MpcSignRequest) -> Result<()>;
}

/// Entry point for MPC network answers
pub trait ResponseSink: Send + Sync {
    /// Apply a response
    ///
    /// Returns true if it moved a pending request to a terminal state. Unknown
    /// and already-terminal request ids are ignored.
    fn on_mpc_response(&self, response: MpcResponse) -> bool;
}
