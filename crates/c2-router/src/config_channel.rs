//! Configuration change notifications over a partitioned stream
//!
//! Publishers tag each record with a `cmd` property naming the configuration
//! command type; the body is the raw value. Subscribers name the tags they
//! care about and receive a [`ConfigNotification`] per matching record.

use crate::endpoint::StreamEndpoint;
use crate::error::{ChannelError, ChannelResult};
use async_trait::async_trait;
use commandlink_core::config::{Config, StreamSettings};
use commandlink_core::{DestinationFilter, Handler, SharedHandler, COMMAND_TYPE_PROPERTY};
use commandlink_stream::{CheckpointStore, OutboundRecord, RecordMetadata, StreamBroker, StreamRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// A configuration change delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigNotification {
    /// Configuration command type (the `cmd` tag)
    pub command_type: String,
    /// Raw record body
    pub value: String,
}

struct RecordToNotification {
    inner: SharedHandler<ConfigNotification>,
}

#[async_trait]
impl Handler<StreamRecord> for RecordToNotification {
    async fn handle(&self, record: StreamRecord) -> anyhow::Result<()> {
        let command_type = record
            .property(COMMAND_TYPE_PROPERTY)
            .ok_or_else(|| anyhow::anyhow!("record {} has no cmd property", record.sequence))?
            .to_string();
        let value = record.body_str()?.to_string();
        debug!(command_type = %command_type, partition_id = %record.partition_id, "Received configuration change");
        self.inner
            .handle(ConfigNotification {
                command_type,
                value,
            })
            .await
    }
}

/// Publish/subscribe channel for configuration changes.
pub struct ConfigChannel {
    endpoint: StreamEndpoint,
}

impl ConfigChannel {
    /// Create a channel on `settings.stream_name`
    pub fn new(
        broker: Arc<dyn StreamBroker>,
        checkpoints: Arc<dyn CheckpointStore>,
        settings: StreamSettings,
        max_in_flight: usize,
    ) -> Self {
        Self {
            endpoint: StreamEndpoint::new(
                "config-changes",
                broker,
                checkpoints,
                settings,
                max_in_flight,
            ),
        }
    }

    /// Channel on `broker` configured from the `[stream]` and `[dispatch]`
    /// sections
    pub fn from_config(broker: Arc<dyn StreamBroker>, config: &Config) -> ChannelResult<Self> {
        Ok(Self::new(
            broker,
            StreamEndpoint::checkpoints_for(config)?,
            config.stream.clone(),
            config.dispatch.max_in_flight,
        ))
    }

    /// Whether a subscription is active
    pub fn is_subscribed(&self) -> bool {
        self.endpoint.is_listening()
    }

    /// Deliver changes tagged with any of `command_types` to `handler`.
    ///
    /// At least one tag is required and a channel takes a single
    /// subscription.
    pub fn subscribe<I, S>(
        &self,
        command_types: I,
        handler: SharedHandler<ConfigNotification>,
    ) -> ChannelResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let filter = DestinationFilter::for_command_types(command_types);
        if matches!(&filter, DestinationFilter::CommandTypes(tags) if tags.is_empty()) {
            return Err(ChannelError::Configuration(
                "at least one configuration command type is required".to_string(),
            ));
        }

        let request = self.endpoint.base_request().with_route_filter(filter);
        self.endpoint
            .listen(request, Arc::new(RecordToNotification { inner: handler }))
    }

    /// Publish `value` tagged with `command_type`
    pub async fn send_command(
        &self,
        command_type: &str,
        value: &str,
    ) -> ChannelResult<RecordMetadata> {
        if command_type.is_empty() {
            return Err(ChannelError::Configuration(
                "configuration command type is empty".to_string(),
            ));
        }
        let record = OutboundRecord::new(value).with_property(COMMAND_TYPE_PROPERTY, command_type);
        self.endpoint.publish(record).await
    }

    /// Stop the subscription and wait for in-flight callbacks
    pub async fn close(&self) {
        self.endpoint.close().await;
    }
}
