//! Core error types

use thiserror::Error;

/// Errors raised while packing or unpacking a command payload.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Payload is missing, or its base64/UTF-8/JSON layer is malformed
    #[error("Payload format error: {0}")]
    PayloadFormat(String),

    /// Payload is valid JSON but does not have the expected shape
    #[error("Payload type mismatch for {target}: {reason}")]
    TypeMismatch {
        /// Rust type the caller asked for
        target: &'static str,
        /// Deserializer message
        reason: String,
    },

    /// Command carries a different tag than the payload type expects
    #[error("Unexpected command type: expected {expected}, got {actual}")]
    UnexpectedCommandType {
        /// Tag bound to the payload type
        expected: &'static str,
        /// Tag found on the command
        actual: String,
    },

    /// Payload could not be serialized
    #[error("Payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for [`crate::config::Config`]
    #[cfg(feature = "toml")]
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is present but unusable
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for codec operations
pub type CodecResult<T> = Result<T, CodecError>;
