//! Invariant tests module
//!
//! This module contains tests that verify critical invariants:
//! - Exactly one terminal transition per request
//! - Monotonic request status
//! - No request without a valid session
