//! # FastAuth Relay Service
//!
//! HTTP surface over [`fastauth_core`]: callers holding an OIDC identity token
//! submit signature requests, the relay forwards them to the MPC signing
//! network, and answers come back on a push callback.
//!
//! ## Features
//!
//! - **Signature requests**: bearer-authenticated submit, lookup and cancel
//! - **MPC callback**: `POST /v1/mpc/responses`, optionally HMAC-authenticated
//! - **Webhook Notifications**: terminal transitions pushed to external services
//! - **WebSocket Streaming**: per-request status updates
//! - **MPC client**: [`HttpMpcNetwork`] forwards requests over HTTP
//!
//! ## Request Flow
//!
//! ```text
//! Caller ──► Relay ──► MPC network
//!   │          │            │
//!   │          │         sign / decline
//!   │          │            │
//!   │          ◄────────────┘  (inline reply or callback)
//!   │          │
//!   ◄──────────┘  (poll, WebSocket, webhook)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fastauth_relay::{FastAuthRelayService, HttpMpcNetwork, RelayServerConfig};
//!
//! let network = HttpMpcNetwork::new("https://mpc.example.com");
//! let gateway = SigningGateway::from_config(&config, registry, Arc::new(network.clone()));
//! network.connect(gateway.coordinator().response_sink());
//!
//! let relay = FastAuthRelayService::new(gateway, RelayServerConfig::default());
//! relay.serve("0.0.0.0:8080".parse::<SocketAddr>()?).await?;
//! ```

pub mod error;
pub mod types;
pub mod webhook;

#[cfg(feature = "server")]
pub mod server;

#[cfg(feature = "client")]
pub mod client;

pub use error::{RelayError, Result};
pub use types::*;
pub use webhook::{WebhookConfig, WebhookEvent, WebhookService};

#[cfg(feature = "server")]
pub use server::{FastAuthRelayService, RelayServerConfig};

#[cfg(feature = "client")]
pub use client::{HttpMpcNetwork, RelayClient, RelayClientConfig};

/// Re-export core types for convenience
pub use fastauth_core::{KeyType, PayloadKind, RequestStatus, SignatureRequest, SigningGateway};
