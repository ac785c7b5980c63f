//! # FastAuth Core
//!
//! Relays blockchain signing requests from users authenticated by an OIDC
//! identity provider to an MPC signing network. Users never hold a private
//! key; the network signs on behalf of the account derived from their
//! identity token.
//!
//! ## Architecture
//!
//! - **Token Validator** ([`token`]): signature, issuer, audience and expiry
//!   checks against a trusted issuer registry fed by OIDC discovery
//! - **Key Type Resolver** ([`key_type`]): closed mapping from algorithm
//!   identifier to `secp256k1` / `ed25519`
//! - **Signature Request Builder** ([`request`]): opaque payload plus account
//!   path, key type and a fresh id
//! - **Relay Coordinator** ([`relay`]): `Pending → {Resolved, Rejected, Expired}`
//!   with timeouts, cancellation and an idempotent response sink
//! - **Provider Facade** ([`FastAuthProvider`]): login / logout and signature
//!   requests for the logged-in account
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fastauth_core::{FastAuthConfig, FastAuthProvider, SigningGateway};
//! use fastauth_core::identity::StaticTokenProvider;
//! use fastauth_core::relay::MemoryMpcNetwork;
//! use fastauth_core::token::IssuerRegistry;
//! use std::sync::Arc;
//!
//! let config = FastAuthConfig::new("https://issuer.example", "https://api.example");
//! let registry = Arc::new(IssuerRegistry::new());
//! registry.discover(&config.issuer).await?;
//!
//! let gateway = SigningGateway::from_config(&config, registry, Arc::new(MemoryMpcNetwork::new()));
//! let provider = FastAuthProvider::new(Arc::new(StaticTokenProvider::new(id_token)), gateway);
//!
//! provider.login().await?;
//! let handle = provider.request_transaction_signature(tx_bytes, "secp256k1").await?;
//! let signature = handle.wait().await?;
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod key_type;
pub mod provider;
pub mod relay;
pub mod request;
pub mod session;
pub mod token;
pub mod types;

pub use config::{FastAuthConfig, ProviderConfig};
pub use error::{Error, Result, TokenRejection};
pub use gateway::SigningGateway;
pub use key_type::KeyType;
pub use provider::FastAuthProvider;
pub use relay::{
    MpcNetwork, MpcResponse, MpcSignRequest, RelayCoordinator, ResponseSink, SignatureHandle,
};
pub use request::{RejectionReason, RequestStatus, SignatureRequest};
pub use session::Session;
pub use token::{Claims, TokenValidator, ValidToken};
pub use types::{AccountPath, PayloadKind, RequestId, Signature};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
