//! Hub wire frames and the connector abstraction
//!
//! The hub speaks two RPC methods: `SendCommandV1` (client to server) and
//! `ReceiveCommandV1` (server to client). Each frame is a JSON object of the
//! form `{"target": <method>, "arguments": {...}}`.

use crate::error::HubError;
use async_trait::async_trait;
use commandlink_core::config::Config;
use commandlink_core::Command;
use commandlink_crypto::TokenCodec;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

/// Client-to-server method name
pub const SEND_COMMAND_METHOD: &str = "SendCommandV1";

/// Server-to-client method name
pub const RECEIVE_COMMAND_METHOD: &str = "ReceiveCommandV1";

/// Capacity of the per-connection frame queues
pub const FRAME_QUEUE_CAPACITY: usize = 256;

/// A hub RPC invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "target", content = "arguments")]
pub enum HubFrame {
    /// Forward a command to a destination
    #[serde(rename = "SendCommandV1", rename_all = "camelCase")]
    SendCommand {
        /// Command envelope
        command: Command,
        /// Identity of the recipient
        destination_id: String,
    },

    /// Command pushed to this client
    #[serde(rename = "ReceiveCommandV1")]
    ReceiveCommand {
        /// Command envelope
        command: Command,
    },
}

impl HubFrame {
    /// Method name carried in the `target` field
    pub fn method(&self) -> &'static str {
        match self {
            HubFrame::SendCommand { .. } => SEND_COMMAND_METHOD,
            HubFrame::ReceiveCommand { .. } => RECEIVE_COMMAND_METHOD,
        }
    }
}

/// An established hub connection.
///
/// Frames pushed on `outbound` are written in order. `inbound` yields frames
/// from the server and returns `None` once the transport has closed.
///
/// Transport tasks are spawned on `tasks`. They stop once `outbound` is
/// dropped on every side and `inbound` is dropped, so the owner can wait for
/// them after releasing both queues.
pub struct HubLink {
    /// Frames to the server
    pub outbound: mpsc::Sender<HubFrame>,
    /// Frames from the server
    pub inbound: mpsc::Receiver<HubFrame>,
    /// Tasks pumping the underlying transport
    pub tasks: TaskTracker,
}

impl HubLink {
    /// Build a connected pair of frame queues: the link, plus the server side
    /// (`outbound` receiver, `inbound` sender).
    pub fn pair() -> (Self, mpsc::Receiver<HubFrame>, mpsc::Sender<HubFrame>) {
        let (out_tx, out_rx) = mpsc::channel(FRAME_QUEUE_CAPACITY);
        let (in_tx, in_rx) = mpsc::channel(FRAME_QUEUE_CAPACITY);
        (
            Self {
                outbound: out_tx,
                inbound: in_rx,
                tasks: TaskTracker::new(),
            },
            out_rx,
            in_tx,
        )
    }
}

/// Opens authenticated hub connections.
#[async_trait]
pub trait HubConnector: Send + Sync + 'static {
    /// Connect presenting `access_token` as the bearer credential
    async fn connect(&self, access_token: &str) -> Result<HubLink, HubError>;
}

/// Identity presented to the hub.
#[derive(Clone)]
pub struct HubCredentials {
    app_id: Uuid,
    api_key: String,
    codec: TokenCodec,
}

impl HubCredentials {
    /// Credentials for `app_id` sealed with `codec`
    pub fn new(app_id: Uuid, api_key: impl Into<String>, codec: TokenCodec) -> Self {
        Self {
            app_id,
            api_key: api_key.into(),
            codec,
        }
    }

    /// Credentials from the `[identity]` and `[hub]` sections
    pub fn from_config(config: &Config) -> Result<Self, HubError> {
        let key = config
            .hub
            .token_key
            .as_deref()
            .ok_or_else(|| HubError::Connect("hub.token_key is not configured".to_string()))?;
        let codec = TokenCodec::from_passphrase(key)?;
        Ok(Self::new(
            config.identity.app_id,
            config.identity.api_key.clone(),
            codec,
        ))
    }

    /// Application identity
    pub fn app_id(&self) -> Uuid {
        self.app_id
    }

    /// A fresh bearer token. Every call uses a new IV.
    pub fn access_token(&self) -> Result<String, HubError> {
        Ok(self.codec.encode(self.app_id, &self.api_key)?)
    }
}

impl fmt::Debug for HubCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubCredentials")
            .field("app_id", &self.app_id)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_frame_shape() {
        let frame = HubFrame::SendCommand {
            command: Command::new("RESTART", "origin", "unit-7"),
            destination_id: "unit-7".to_string(),
        };
        let value = serde_json::to_value(&frame).unwrap();

        assert_eq!(value["target"], SEND_COMMAND_METHOD);
        assert_eq!(value["arguments"]["destinationId"], "unit-7");
        assert_eq!(value["arguments"]["command"]["CommandType"], "RESTART");
    }

    #[test]
    fn test_receive_frame_parses() {
        let json = serde_json::json!({
            "target": "ReceiveCommandV1",
            "arguments": {
                "command": {
                    "CommandType": "SET_LOG_LEVEL",
                    "OriginId": "hub",
                    "DestinationId": "unit-1",
                    "Timestamp": "2024-03-01T12:00:00Z",
                    "Data": null
                }
            }
        });

        let frame: HubFrame = serde_json::from_value(json).unwrap();
        assert_eq!(frame.method(), RECEIVE_COMMAND_METHOD);
        match frame {
            HubFrame::ReceiveCommand { command } => {
                assert_eq!(command.command_type, "SET_LOG_LEVEL");
                assert!(!command.has_data());
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_access_tokens_are_fresh_and_decodable() {
        let codec = TokenCodec::new(&[7u8; 32]).unwrap();
        let app_id = Uuid::new_v4();
        let credentials = HubCredentials::new(app_id, "secret-key", codec.clone());

        let first = credentials.access_token().unwrap();
        let second = credentials.access_token().unwrap();
        assert_ne!(first, second);
        assert_eq!(codec.decode(&first).unwrap(), (app_id, "secret-key".to_string()));
        assert!(!format!("{credentials:?}").contains("secret-key"));
    }
}
