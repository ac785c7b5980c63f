//! Key type resolution
//!
//! Maps a caller-supplied algorithm identifier onto the key scheme the target
//! chain's account model expects. The mapping is closed: identifiers outside
//! [`SUPPORTED_ALGORITHMS`] fail instead of falling back to a default scheme.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Key scheme used by the MPC network to produce a signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    /// ECDSA over secp256k1
    Secp256k1,
    /// EdDSA over Curve25519
    Ed25519,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Secp256k1 => write!(f, "secp256k1"),
            KeyType::Ed25519 => write!(f, "ed25519"),
        }
    }
}

/// Supported algorithm identifiers and the key type each one selects
pub const SUPPORTED_ALGORITHMS: &[(&str, KeyType)] = &[
    ("secp256k1", KeyType::Secp256k1),
    ("ecdsa", KeyType::Secp256k1),
    ("ed25519", KeyType::Ed25519),
    ("eddsa", KeyType::Ed25519),
];

/// Resolve an algorithm identifier to its key type
///
/// Matching ignores ASCII case and surrounding whitespace.
pub fn resolve(algorithm: &str) -> Result<KeyType> {
    let wanted = algorithm.trim();
    SUPPORTED_ALGORITHMS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
        .map(|(_, key_type)| *key_type)
        .ok_or_else(|| Error::UnsupportedAlgorithm(algorithm.to_string()))
}

impl FromStr for KeyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        resolve(s)
    }
}
