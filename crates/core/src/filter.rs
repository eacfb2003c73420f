//! Destination filter
//!
//! Decides whether an inbound record is relevant to the local subscriber.
//! Matching is exact, case-sensitive string equality on a routing property:
//! `DestId` for direct commands, `cmd` for configuration subscriptions.
//! A dropped record is simply not delivered; stream progress is unaffected.

use crate::command::Command;
use std::collections::{BTreeSet, HashMap};

/// Routing property carrying the destination identity
pub const DEST_ID_PROPERTY: &str = "DestId";

/// Routing property carrying the configuration command tag
pub const COMMAND_TYPE_PROPERTY: &str = "cmd";

/// Routing property identifying the publisher of channel data
pub const DEVICE_APP_ID_PROPERTY: &str = "DeviceAppId";

/// Routing predicate for a single subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationFilter {
    /// Pass records addressed to this identity
    Destination(String),
    /// Pass records tagged with one of these command types
    CommandTypes(BTreeSet<String>),
}

impl DestinationFilter {
    /// Filter for commands addressed to `identity`
    pub fn for_destination(identity: impl Into<String>) -> Self {
        Self::Destination(identity.into())
    }

    /// Filter for a fixed set of configuration command tags
    pub fn for_command_types<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::CommandTypes(tags.into_iter().map(Into::into).collect())
    }

    /// Property name this filter routes on
    pub fn routing_property(&self) -> &'static str {
        match self {
            Self::Destination(_) => DEST_ID_PROPERTY,
            Self::CommandTypes(_) => COMMAND_TYPE_PROPERTY,
        }
    }

    /// Check a record's properties. Returns the matched routing value on pass.
    pub fn route<'a>(&self, properties: &'a HashMap<String, String>) -> Option<&'a str> {
        let value = properties.get(self.routing_property())?;
        self.matches_value(value).then_some(value.as_str())
    }

    /// Check a raw routing value
    pub fn matches_value(&self, value: &str) -> bool {
        match self {
            Self::Destination(identity) => identity == value,
            Self::CommandTypes(tags) => tags.contains(value),
        }
    }

    /// Check a command received over the hub.
    ///
    /// The hub routes on the server side, so a command without a destination
    /// is accepted; a command naming another destination is not.
    pub fn accepts_command(&self, command: &Command) -> bool {
        match self {
            Self::Destination(identity) => {
                command.destination_id.is_empty() || command.destination_id == *identity
            }
            Self::CommandTypes(tags) => tags.contains(&command.command_type),
        }
    }
}
