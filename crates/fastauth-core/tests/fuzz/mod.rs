//! Fuzz tests module
//!
//! Property-based testing using proptest to find edge cases:
//! - Key type resolution
//! - Token expiry and tampering
//! - Signature request building

pub mod key_type_fuzz;
pub mod request_fuzz;
pub mod token_fuzz;
