//! Command payload codec
//!
//! Packs an arbitrary serializable value into [`Command::data`] as
//! base64(UTF-8(JSON)) and unpacks it again. The transports treat `data` as
//! opaque; only the application boundary decodes it.
//!
//! Typed payloads implement [`CommandPayload`], which binds the payload type
//! to its command tag so that a receiver cannot decode a `Restart` command as
//! a log-level change by accident.

use crate::command::Command;
use crate::error::{CodecError, CodecResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::error::Category;

/// A payload type bound to a single command tag.
pub trait CommandPayload: Serialize + DeserializeOwned {
    /// Command tag this payload travels under
    const COMMAND_TYPE: &'static str;
}

/// Serialize `value` into `cmd.data`, replacing any previous payload.
pub fn encode_payload<T: Serialize + ?Sized>(value: &T, cmd: &mut Command) -> CodecResult<()> {
    let json = serde_json::to_vec(value)?;
    cmd.data = Some(STANDARD.encode(json));
    Ok(())
}

/// Deserialize `cmd.data` as `T`.
pub fn decode_payload<T: DeserializeOwned>(cmd: &Command) -> CodecResult<T> {
    let data = cmd
        .data
        .as_deref()
        .filter(|d| !d.is_empty())
        .ok_or_else(|| CodecError::PayloadFormat("command carries no data".to_string()))?;

    let bytes = STANDARD
        .decode(data)
        .map_err(|e| CodecError::PayloadFormat(format!("invalid base64: {e}")))?;

    let json = std::str::from_utf8(&bytes)
        .map_err(|e| CodecError::PayloadFormat(format!("invalid UTF-8: {e}")))?;

    serde_json::from_str(json).map_err(|e| match e.classify() {
        Category::Data => CodecError::TypeMismatch {
            target: std::any::type_name::<T>(),
            reason: e.to_string(),
        },
        Category::Io | Category::Syntax | Category::Eof => {
            CodecError::PayloadFormat(format!("invalid JSON: {e}"))
        }
    })
}

/// Decode a typed payload after checking the command tag.
pub fn decode_typed<P: CommandPayload>(cmd: &Command) -> CodecResult<P> {
    if cmd.command_type != P::COMMAND_TYPE {
        return Err(CodecError::UnexpectedCommandType {
            expected: P::COMMAND_TYPE,
            actual: cmd.command_type.clone(),
        });
    }
    decode_payload(cmd)
}

impl Command {
    /// Build a command tagged and loaded with a typed payload.
    pub fn with_payload<P: CommandPayload>(
        origin_id: impl Into<String>,
        destination_id: impl Into<String>,
        payload: &P,
    ) -> CodecResult<Self> {
        let mut cmd = Command::new(P::COMMAND_TYPE, origin_id, destination_id);
        encode_payload(payload, &mut cmd)?;
        Ok(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::command_types;
    use proptest::prelude::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct LogLevel {
        level: String,
    }

    impl CommandPayload for LogLevel {
        const COMMAND_TYPE: &'static str = command_types::SET_LOG_LEVEL;
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct CanFrame {
        arbitration_id: u32,
        payload: Vec<u8>,
        note: Option<String>,
    }

    fn blank() -> Command {
        Command::new(command_types::SEND_CAN, "origin", "dest")
    }

    #[test]
    fn test_encoding_matches_base64_of_json() {
        let mut cmd = blank();
        encode_payload(&LogLevel { level: "Debug".into() }, &mut cmd).unwrap();

        let expected = STANDARD.encode(r#"{"level":"Debug"}"#);
        assert_eq!(cmd.data.as_deref(), Some(expected.as_str()));
    }

    #[test]
    fn test_missing_data_is_format_error() {
        let result = decode_payload::<LogLevel>(&blank());
        assert!(matches!(result, Err(CodecError::PayloadFormat(_))));
    }

    #[test]
    fn test_invalid_base64_is_format_error() {
        let mut cmd = blank();
        cmd.data = Some("not base64!!".to_string());
        let result = decode_payload::<LogLevel>(&cmd);
        assert!(matches!(result, Err(CodecError::PayloadFormat(_))));
    }

    #[test]
    fn test_invalid_json_is_format_error() {
        let mut cmd = blank();
        cmd.data = Some(STANDARD.encode("{\"level\": "));
        let result = decode_payload::<LogLevel>(&cmd);
        assert!(matches!(result, Err(CodecError::PayloadFormat(_))));
    }

    #[test]
    fn test_wrong_shape_is_type_mismatch() {
        let mut cmd = blank();
        encode_payload(&vec![1, 2, 3], &mut cmd).unwrap();
        let result = decode_payload::<LogLevel>(&cmd);
        assert!(matches!(result, Err(CodecError::TypeMismatch { .. })));
    }

    #[test]
    fn test_typed_payload_checks_tag() {
        let cmd = Command::with_payload("svc-a", "svc-b", &LogLevel { level: "Warn".into() }).unwrap();
        assert_eq!(cmd.command_type, command_types::SET_LOG_LEVEL);
        assert_eq!(decode_typed::<LogLevel>(&cmd).unwrap().level, "Warn");

        let mut restart = cmd.clone();
        restart.command_type = command_types::RESTART.to_string();
        assert!(matches!(
            decode_typed::<LogLevel>(&restart),
            Err(CodecError::UnexpectedCommandType { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_payload_round_trip(
            arbitration_id in any::<u32>(),
            payload in proptest::collection::vec(any::<u8>(), 0..64),
            note in proptest::option::of(".*"),
        ) {
            let frame = CanFrame { arbitration_id, payload, note };
            let mut cmd = blank();
            encode_payload(&frame, &mut cmd).unwrap();
            let decoded: CanFrame = decode_payload(&cmd).unwrap();
            prop_assert_eq!(decoded, frame);
        }
    }
}
