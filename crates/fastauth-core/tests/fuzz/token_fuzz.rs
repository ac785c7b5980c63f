//! Fuzz tests for token validation

use crate::support::{AUDIENCE, ISSUER, SECRET, mint_with, registry};
use fastauth_core::TokenRejection;
use fastauth_core::token::TokenValidator;
use proptest::prelude::*;

const NOW: i64 = 1_800_000_000;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn claims(exp: i64, sub: &str) -> serde_json::Value {
    serde_json::json!({ "iss": ISSUER, "sub": sub, "aud": AUDIENCE, "exp": exp })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Every token with exp <= now is rejected as expired, whatever key signed it
    #[test]
    fn expired_tokens_always_rejected(
        age in 0i64..10_000_000,
        sign_with_issuer_key in any::<bool>(),
        sub in "[a-z0-9]{1,12}",
    ) {
        let secret: &[u8] = if sign_with_issuer_key { SECRET } else { b"some-other-secret" };
        let token = mint_with(&claims(NOW - age, &sub), secret, None);
        let validator = TokenValidator::new(registry());

        let result = runtime().block_on(validator.validate_at(&token, ISSUER, AUDIENCE, NOW));
        prop_assert_eq!(
            result.unwrap_err().token_rejection(),
            Some(TokenRejection::Expired)
        );
    }

    /// Unexpired tokens from the issuer validate and derive the subject's path
    #[test]
    fn fresh_tokens_accepted(ttl in 1i64..10_000_000, sub in "[a-zA-Z0-9|@.]{1,24}") {
        let token = mint_with(&claims(NOW + ttl, &sub), SECRET, None);
        let validator = TokenValidator::new(registry());

        let valid = runtime()
            .block_on(validator.validate_at(&token, ISSUER, AUDIENCE, NOW))
            .unwrap();
        prop_assert_eq!(valid.account_path(), format!("jwt#{}#{}", ISSUER, sub));
    }

    /// Flipping a character of the signature segment never yields a valid token
    #[test]
    fn tampered_signature_rejected(position in any::<prop::sample::Index>()) {
        let token = mint_with(&claims(NOW + 600, "user"), SECRET, None);
        let signature_start = token.rfind('.').unwrap() + 1;
        let offset = signature_start + position.index(token.len() - signature_start);

        let mut bytes = token.into_bytes();
        bytes[offset] = if bytes[offset] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();

        let validator = TokenValidator::new(registry());
        let result = runtime().block_on(validator.validate_at(&tampered, ISSUER, AUDIENCE, NOW));
        prop_assert!(result.is_err());
    }

    /// Arbitrary strings never validate
    #[test]
    fn garbage_never_validates(token in "\\PC{0,200}") {
        let validator = TokenValidator::new(registry());
        let result = runtime().block_on(validator.validate_at(&token, ISSUER, AUDIENCE, NOW));
        prop_assert!(result.is_err());
    }
}
