//! Unit tests module
//!
//! This module contains unit tests for individual components:
//! - Token validator and issuer discovery
//! - Identity providers
//! - Relay coordinator

pub mod coordinator_test;
pub mod identity_test;
pub mod validator_test;
