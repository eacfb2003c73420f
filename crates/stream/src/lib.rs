//! CommandLink Stream
//!
//! Partitioned stream transport: the broker abstraction, an in-process
//! broker, checkpoint stores, and the concurrent partition fan-out reader.

#![warn(missing_docs)]

pub mod broker;
pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod reader;
pub mod record;

pub use broker::{PartitionConsumer, StreamBroker};
pub use checkpoint::{CheckpointKey, CheckpointStore, InMemoryCheckpointStore, SqliteCheckpointStore};
pub use error::{StreamError, StreamResult};
pub use memory::InMemoryBroker;
pub use reader::{FanoutHandle, FanoutSummary, PartitionFanoutReader, ReadRequest};
pub use record::{OutboundRecord, PartitionCursor, RecordMetadata, StartPosition, StreamRecord};
