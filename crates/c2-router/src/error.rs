//! Error types for the hub and stream channels.

use commandlink_core::CodecError;
use commandlink_crypto::TokenError;
use commandlink_stream::StreamError;
use thiserror::Error;

/// Errors raised by the hub connection.
#[derive(Debug, Error)]
pub enum HubError {
    /// Could not reach or handshake with the hub
    #[error("Unable to connect to hub: {0}")]
    Connect(String),

    /// A call was made while no connection is established
    #[error("Hub connection is not established")]
    NotConnected,

    /// The channel has been closed
    #[error("Hub channel is closed")]
    Closed,

    /// A handler is already registered for inbound commands
    #[error("A command handler is already registered")]
    AlreadySubscribed,

    /// Bearer token could not be produced
    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    /// Frame could not be encoded or decoded
    #[error("Frame serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the command and configuration channels.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Invalid setup (missing tags, double subscribe, bad settings)
    #[error("Channel configuration error: {0}")]
    Configuration(String),

    /// The channel has been closed
    #[error("Channel is closed")]
    Closed,

    /// Stream transport failure
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Payload encoding or decoding failure
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Hub transport failure
    #[error(transparent)]
    Hub(#[from] HubError),

    /// Body serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;
