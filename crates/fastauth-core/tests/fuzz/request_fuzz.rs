//! Fuzz tests for signature request building and the MPC wire format

use fastauth_core::request::build;
use fastauth_core::{Error, KeyType, MpcSignRequest, PayloadKind};
use proptest::prelude::*;

fn key_type_strategy() -> impl Strategy<Value = KeyType> {
    prop_oneof![Just(KeyType::Secp256k1), Just(KeyType::Ed25519)]
}

fn kind_strategy() -> impl Strategy<Value = PayloadKind> {
    prop_oneof![Just(PayloadKind::Transaction), Just(PayloadKind::DelegateAction)]
}

proptest! {
    /// Payload bytes reach the MPC wire request untouched
    #[test]
    fn payload_carried_verbatim(
        payload in prop::collection::vec(any::<u8>(), 1..512),
        key_type in key_type_strategy(),
        kind in kind_strategy(),
    ) {
        let request = build("jwt#iss#sub", payload.clone(), key_type, kind).unwrap();
        prop_assert_eq!(request.payload(), payload.as_slice());

        let wire = MpcSignRequest::from(&request);
        let json = serde_json::to_string(&wire).unwrap();
        let decoded: MpcSignRequest = serde_json::from_str(&json).unwrap();
        prop_assert_eq!(decoded.payload, payload);
        prop_assert_eq!(decoded.key_type, key_type);
        prop_assert_eq!(decoded.payload_kind, kind);
    }

    /// Whitespace-only paths are refused
    #[test]
    fn blank_paths_refused(path in "[ \t\n]{0,8}", key_type in key_type_strategy()) {
        let result = build(path, vec![1u8], key_type, PayloadKind::Transaction);
        prop_assert!(matches!(result, Err(Error::InvalidRequest(_))));
    }

    /// Fresh requests are pending with distinct ids
    #[test]
    fn fresh_requests_pending(count in 2usize..20) {
        let ids: std::collections::HashSet<String> = (0..count)
            .map(|_| {
                let request = build("p", vec![0u8], KeyType::Secp256k1, PayloadKind::Transaction).unwrap();
                prop_assert!(request.is_pending());
                Ok(request.id().to_string())
            })
            .collect::<Result<_, TestCaseError>>()?;
        prop_assert_eq!(ids.len(), count);
    }
}
