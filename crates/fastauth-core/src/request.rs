//! Signature requests
//!
//! A [`SignatureRequest`] pairs caller-encoded chain data with the account
//! path and key type it must be signed under. Payload bytes are carried
//! verbatim: the relay never decodes, canonicalizes or re-encodes them.

use crate::{AccountPath, Error, KeyType, PayloadKind, RequestId, Result, Signature};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a request ended in `Rejected`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RejectionReason {
    /// The MPC network reported an error
    Declined(String),
    /// The request could not be delivered to the MPC network
    Unreachable(String),
    /// Cancelled by the caller, by logout or by coordinator shutdown
    Cancelled,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::Declined(msg) => write!(f, "declined: {}", msg),
            RejectionReason::Unreachable(msg) => write!(f, "unreachable: {}", msg),
            RejectionReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Lifecycle state of a signature request
///
/// `Pending` is the only non-terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Resolved { signature: Signature },
    Rejected { reason: RejectionReason },
    Expired,
}

impl RequestStatus {
    /// Whether the status is terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RequestStatus::Pending)
    }

    /// Short status name
    pub fn name(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Resolved { .. } => "resolved",
            RequestStatus::Rejected { .. } => "rejected",
            RequestStatus::Expired => "expired",
        }
    }

    /// The signature, once resolved
    pub fn signature(&self) -> Option<&Signature> {
        match self {
            RequestStatus::Resolved { signature } => Some(signature),
            _ => None,
        }
    }

    /// Convert a terminal status into the caller-facing outcome
    ///
    /// Returns `None` while pending.
    pub fn outcome(&self, request_id: &str) -> Option<Result<Signature>> {
        match self {
            RequestStatus::Pending => None,
            RequestStatus::Resolved { signature } => Some(Ok(signature.clone())),
            RequestStatus::Rejected {
                reason: RejectionReason::Cancelled,
            } => Some(Err(Error::Cancelled(request_id.to_string()))),
            RequestStatus::Rejected { reason } => Some(Err(Error::Rejected {
                request_id: request_id.to_string(),
                reason: reason.to_string(),
            })),
            RequestStatus::Expired => Some(Err(Error::Expired(request_id.to_string()))),
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One signing operation tracked by the relay coordinator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureRequest {
    id: RequestId,
    account_path: AccountPath,
    #[serde(with = "crate::types::base64_bytes")]
    payload: Vec<u8>,
    payload_kind: PayloadKind,
    key_type: KeyType,
    created_at: DateTime<Utc>,
    #[serde(flatten)]
    status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

/// Build a pending signature request with a fresh id
pub fn build(
    account_path: impl Into<AccountPath>,
    payload: impl Into<Vec<u8>>,
    key_type: KeyType,
    kind: PayloadKind,
) -> Result<SignatureRequest> {
    let account_path = account_path.into();
    let payload = payload.into();

    if account_path.trim().is_empty() {
        return Err(Error::InvalidRequest("account path is empty".to_string()));
    }
    if payload.is_empty() {
        return Err(Error::InvalidRequest("payload is empty".to_string()));
    }

    Ok(SignatureRequest {
        id: uuid::Uuid::new_v4().to_string(),
        account_path,
        payload,
        payload_kind: kind,
        key_type,
        created_at: Utc::now(),
        status: RequestStatus::Pending,
        completed_at: None,
    })
}

impl SignatureRequest {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn account_path(&self) -> &str {
        &self.account_path
    }

    /// Opaque, caller-encoded payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_kind(&self) -> PayloadKind {
        self.payload_kind
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> &RequestStatus {
        &self.status
    }

    /// When the request reached its terminal state
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn is_pending(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Move a pending request into `status`
    ///
    /// Returns false, leaving the request unchanged, if it is already
    /// terminal or `status` is `Pending`.
    pub(crate) fn transition(&mut self, status: RequestStatus) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
        true
    }
}
