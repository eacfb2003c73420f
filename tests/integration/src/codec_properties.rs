//! Cross-crate codec properties: bearer tokens and command payloads

use commandlink_core::{decode_payload, encode_payload, Command, CodecError};
use commandlink_crypto::{TokenCodec, TokenError, MIN_TOKEN_BYTES};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CanFrame {
    arbitration_id: u32,
    data: Vec<u8>,
    label: Option<String>,
}

fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 16),
        prop::collection::vec(any::<u8>(), 24),
        prop::collection::vec(any::<u8>(), 32),
    ]
}

proptest! {
    #[test]
    fn prop_token_round_trip(
        key in key_strategy(),
        app_id in any::<u128>(),
        api_key in "[A-Za-z0-9+/=]{0,64}",
    ) {
        let codec = TokenCodec::new(&key).unwrap();
        let app_id = Uuid::from_u128(app_id);

        let token = codec.encode(app_id, &api_key).unwrap();
        prop_assert_eq!(codec.decode(&token).unwrap(), (app_id, api_key));
    }

    #[test]
    fn prop_truncated_tokens_are_format_errors(
        bytes in prop::collection::vec(any::<u8>(), 0..MIN_TOKEN_BYTES),
    ) {
        use base64::Engine as _;
        let codec = TokenCodec::new(&[9u8; 32]).unwrap();
        let token = base64::engine::general_purpose::STANDARD.encode(&bytes);

        prop_assert!(matches!(codec.decode(&token), Err(TokenError::Format(_))));
    }

    #[test]
    fn prop_payload_round_trip(
        arbitration_id in any::<u32>(),
        data in prop::collection::vec(any::<u8>(), 0..8),
        label in proptest::option::of("\\PC{0,24}"),
    ) {
        let frame = CanFrame { arbitration_id, data, label };
        let mut command = Command::new("SendCan", "unit-1", "unit-2");

        encode_payload(&frame, &mut command).unwrap();
        let wire = serde_json::to_string(&command).unwrap();
        let received: Command = serde_json::from_str(&wire).unwrap();

        prop_assert_eq!(decode_payload::<CanFrame>(&received).unwrap(), frame);
    }
}

#[test]
fn test_payload_of_wrong_shape_is_type_mismatch() {
    let mut command = Command::new("SendCan", "unit-1", "unit-2");
    encode_payload(&vec!["not", "a", "frame"], &mut command).unwrap();

    assert!(matches!(
        decode_payload::<CanFrame>(&command),
        Err(CodecError::TypeMismatch { .. })
    ));
}
