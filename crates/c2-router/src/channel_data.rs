//! Channel data forwarding
//!
//! Devices forward sampled channel values (CAN bus and similar) as JSON data
//! sets tagged with the publishing device's identity.

use crate::error::{ChannelError, ChannelResult};
use commandlink_core::DEVICE_APP_ID_PROPERTY;
use commandlink_stream::{OutboundRecord, RecordMetadata, StreamBroker};
use serde::Serialize;
use std::sync::Arc;
use tracing::trace;

/// Publishes channel data sets for one device.
pub struct ChannelDataPublisher {
    broker: Arc<dyn StreamBroker>,
    stream: String,
    device_app_id: String,
}

impl ChannelDataPublisher {
    /// Publisher writing to `stream` on behalf of `device_app_id`
    pub fn new(
        broker: Arc<dyn StreamBroker>,
        stream: impl Into<String>,
        device_app_id: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            stream: stream.into(),
            device_app_id: device_app_id.into(),
        }
    }

    /// Serialize `data` to JSON and publish it
    pub async fn send_data<T: Serialize + ?Sized>(&self, data: &T) -> ChannelResult<RecordMetadata> {
        if self.device_app_id.is_empty() {
            return Err(ChannelError::Configuration(
                "device app id is empty".to_string(),
            ));
        }

        let body = serde_json::to_vec(data)?;
        let record = OutboundRecord::new(body)
            .with_property(DEVICE_APP_ID_PROPERTY, self.device_app_id.as_str())
            .with_partition_key(self.device_app_id.as_str());
        let metadata = self.broker.publish(&self.stream, record).await?;
        trace!(
            stream = %self.stream,
            partition_id = %metadata.partition_id,
            sequence = metadata.sequence,
            "Published channel data"
        );
        Ok(metadata)
    }
}
