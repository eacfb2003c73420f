//! Cryptographic primitives for the CommandLink transport.
//!
//! # Core Capabilities
//!
//! - **Bearer tokens**: AES-CBC tokens binding an application identity to its
//!   API key, presented during the hub handshake
//! - **API keys**: generation of random alphanumeric API keys
//!
//! # Security Principles
//!
//! - Never roll custom cryptographic primitives
//! - Secrets must never be logged or hardcoded
//! - Key material is zeroized after use

#![warn(missing_docs)]

pub mod keys;
pub mod token;

pub use keys::new_api_key;
pub use token::{KeySize, TokenCodec, TokenError, TokenResult, MIN_TOKEN_BYTES};
