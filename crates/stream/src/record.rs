//! Stream record types

use commandlink_core::config::StartPositionSetting;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A record read from one partition of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRecord {
    /// Partition the record was read from
    pub partition_id: String,
    /// Position of the record within its partition
    pub sequence: u64,
    /// Routing attributes attached by the publisher
    pub properties: HashMap<String, String>,
    /// UTF-8 body (JSON command or raw value)
    pub body: Vec<u8>,
}

impl StreamRecord {
    /// Routing attribute by name
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    /// Body as UTF-8 text
    pub fn body_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }
}

/// A record to publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundRecord {
    /// Routing attributes
    pub properties: HashMap<String, String>,
    /// Record body
    pub body: Vec<u8>,
    /// Records sharing a key land on the same partition
    pub partition_key: Option<String>,
}

impl OutboundRecord {
    /// Create a record with the given body
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    /// Attach a routing attribute
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Pin the record to the partition owning `key`
    pub fn with_partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }
}

/// Location assigned to a published record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    /// Partition the record was appended to
    pub partition_id: String,
    /// Sequence within that partition
    pub sequence: u64,
}

/// Where a partition reader begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPosition {
    /// Only records published after the reader opens
    #[default]
    Latest,
    /// From the first retained record
    Earliest,
    /// Resume after a previously checkpointed sequence
    After(u64),
}

impl From<StartPositionSetting> for StartPosition {
    fn from(setting: StartPositionSetting) -> Self {
        match setting {
            StartPositionSetting::Latest => StartPosition::Latest,
            StartPositionSetting::Earliest => StartPosition::Earliest,
        }
    }
}

/// A partition together with the position a reader will start from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionCursor {
    /// Partition identifier
    pub partition_id: String,
    /// Starting position
    pub position: StartPosition,
}
