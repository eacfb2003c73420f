//! Command envelope and command-type tags
//!
//! A [`Command`] is the routed message exchanged between services. It carries
//! a type tag, the origin and destination identities, a timestamp and an
//! opaque base64 payload. The transport layers never look inside `data`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tags for commands addressed to a single application instance.
pub mod command_types {
    /// Reload configuration
    pub const UPDATE_CONFIG: &str = "UpdateConfig";
    /// Forward a frame onto the CAN bus
    pub const SEND_CAN: &str = "SendCan";
    /// Change the runtime log level
    pub const SET_LOG_LEVEL: &str = "SetLogLevel";
    /// Simulate a keypad button press
    pub const SEND_KEYPAD_BUTTON_PRESS: &str = "SendKeypadButtonPress";
    /// Restart the service
    pub const RESTART: &str = "Restart";
    /// Upgrade the service binary
    pub const SERVICE_UPGRADE: &str = "ServiceUpgrade";
}

/// Tags for fleet-wide configuration notifications.
pub mod configuration_command_types {
    /// A device definition changed
    pub const DEVICE_MODIFIED: &str = "DeviceModified";
    /// A channel mapping changed
    pub const CHANNEL_MODIFIED: &str = "ChannelModified";
    /// An event subscription changed
    pub const EVENT_SUBSCRIPTION_MODIFIED: &str = "EventSubscriptionModified";
    /// The active driver changed
    pub const ACTIVE_DRIVER: &str = "ActiveDriver";
    /// An alarm definition changed
    pub const ALARM_CHANGED: &str = "AlarmChanged";
}

/// Routed command envelope.
///
/// Field names serialize in PascalCase to stay wire compatible with the
/// existing producers in the fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Command {
    /// Command type tag (see [`command_types`])
    pub command_type: String,
    /// Identity of the sender
    pub origin_id: String,
    /// Identity of the intended receiver
    pub destination_id: String,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Base64 of the UTF-8 JSON payload
    #[serde(default)]
    pub data: Option<String>,
}

impl Command {
    /// Create a command with no payload, stamped with the current time.
    pub fn new(
        command_type: impl Into<String>,
        origin_id: impl Into<String>,
        destination_id: impl Into<String>,
    ) -> Self {
        Self {
            command_type: command_type.into(),
            origin_id: origin_id.into(),
            destination_id: destination_id.into(),
            timestamp: Utc::now(),
            data: None,
        }
    }

    /// Whether a payload is attached
    pub fn has_data(&self) -> bool {
        self.data.as_deref().is_some_and(|d| !d.is_empty())
    }
}
