//! Broker abstraction for partitioned event streams.
//!
//! The fan-out reader and the channels only talk to a broker through these
//! traits, so any partitioned log with per-partition ordering can back them.

use crate::error::StreamResult;
use crate::record::{OutboundRecord, RecordMetadata, StartPosition, StreamRecord};
use async_trait::async_trait;

/// A partitioned, ordered event stream service.
#[async_trait]
pub trait StreamBroker: Send + Sync + 'static {
    /// Identifiers of every partition of `stream`
    async fn partition_ids(&self, stream: &str) -> StreamResult<Vec<String>>;

    /// Open an ordered consumer on one partition
    async fn open_partition(
        &self,
        stream: &str,
        consumer_group: &str,
        partition_id: &str,
        start: StartPosition,
    ) -> StreamResult<Box<dyn PartitionConsumer>>;

    /// Append a record to `stream`
    async fn publish(&self, stream: &str, record: OutboundRecord) -> StreamResult<RecordMetadata>;
}

/// Ordered reader over a single partition.
#[async_trait]
pub trait PartitionConsumer: Send {
    /// Wait for the next record. `Ok(None)` means the partition is closed.
    async fn next_record(&mut self) -> StreamResult<Option<StreamRecord>>;
}
