//! Fuzz tests for key type resolution

use fastauth_core::key_type::{SUPPORTED_ALGORITHMS, resolve};
use fastauth_core::{Error, KeyType};
use proptest::prelude::*;

// ============================================================================
// Strategies for generating test data
// ============================================================================

/// A supported identifier with random ASCII casing and padding
fn supported_identifier_strategy() -> impl Strategy<Value = (String, KeyType)> {
    (
        0usize..SUPPORTED_ALGORITHMS.len(),
        prop::collection::vec(any::<bool>(), 16),
        0usize..3,
        0usize..3,
    )
        .prop_map(|(index, upper, left, right)| {
            let (name, key_type) = SUPPORTED_ALGORITHMS[index];
            let cased: String = name
                .chars()
                .zip(upper.iter().cycle())
                .map(|(c, up)| if *up { c.to_ascii_uppercase() } else { c })
                .collect();
            (format!("{}{}{}", " ".repeat(left), cased, "\t".repeat(right)), key_type)
        })
}

proptest! {
    /// Supported identifiers map to their fixed key type regardless of casing
    #[test]
    fn supported_identifiers_resolve((identifier, expected) in supported_identifier_strategy()) {
        prop_assert_eq!(resolve(&identifier).unwrap(), expected);
    }

    /// Anything outside the table fails with UnsupportedAlgorithm
    #[test]
    fn other_identifiers_fail(identifier in "[a-zA-Z0-9_-]{0,16}") {
        let known = SUPPORTED_ALGORITHMS
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case(identifier.trim()));
        prop_assume!(!known);

        match resolve(&identifier) {
            Err(Error::UnsupportedAlgorithm(name)) => prop_assert_eq!(name, identifier),
            other => prop_assert!(false, "unexpected result {:?}", other),
        }
    }

    /// Resolution is deterministic
    #[test]
    fn resolution_is_deterministic(identifier in "\\PC{0,12}") {
        let first = resolve(&identifier).ok();
        let second = resolve(&identifier).ok();
        prop_assert_eq!(first, second);
    }
}
