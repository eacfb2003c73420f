//! In-process broker
//!
//! Keeps every partition log in memory. Used for loopback deployments and
//! tests; it makes no durability claims.

use crate::broker::{PartitionConsumer, StreamBroker};
use crate::error::{StreamError, StreamResult};
use crate::record::{OutboundRecord, RecordMetadata, StartPosition, StreamRecord};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tracing::debug;

struct MemoryPartition {
    id: String,
    log: Mutex<Vec<StreamRecord>>,
    len_tx: watch::Sender<usize>,
}

impl MemoryPartition {
    fn new(id: String) -> Self {
        let (len_tx, _) = watch::channel(0);
        Self {
            id,
            log: Mutex::new(Vec::new()),
            len_tx,
        }
    }

    fn len(&self) -> StreamResult<usize> {
        self.log
            .lock()
            .map(|log| log.len())
            .map_err(|_| StreamError::Broker("partition log lock poisoned".to_string()))
    }

    fn append(&self, record: OutboundRecord) -> StreamResult<u64> {
        let mut log = self
            .log
            .lock()
            .map_err(|_| StreamError::Broker("partition log lock poisoned".to_string()))?;
        let sequence = log.len() as u64;
        log.push(StreamRecord {
            partition_id: self.id.clone(),
            sequence,
            properties: record.properties,
            body: record.body,
        });
        self.len_tx.send_replace(log.len());
        Ok(sequence)
    }

    fn get(&self, index: usize) -> StreamResult<Option<StreamRecord>> {
        self.log
            .lock()
            .map(|log| log.get(index).cloned())
            .map_err(|_| StreamError::Broker("partition log lock poisoned".to_string()))
    }
}

struct MemoryStream {
    partitions: Vec<Arc<MemoryPartition>>,
    round_robin: AtomicUsize,
}

impl MemoryStream {
    fn partition_for(&self, key: Option<&str>) -> &Arc<MemoryPartition> {
        let index = match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % self.partitions.len() as u64) as usize
            }
            None => self.round_robin.fetch_add(1, Ordering::Relaxed) % self.partitions.len(),
        };
        &self.partitions[index]
    }
}

/// In-memory partitioned broker.
pub struct InMemoryBroker {
    streams: RwLock<HashMap<String, Arc<MemoryStream>>>,
    available: AtomicBool,
}

impl InMemoryBroker {
    /// Create an empty broker
    pub fn new() -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Create `stream` with partitions `"0"..partition_count`.
    pub fn create_stream(&self, stream: &str, partition_count: usize) -> StreamResult<()> {
        if partition_count == 0 {
            return Err(StreamError::InvalidConfig(format!(
                "stream {stream} needs at least one partition"
            )));
        }

        let mut streams = self.write_streams()?;
        if streams.contains_key(stream) {
            return Err(StreamError::StreamExists {
                stream_id: stream.to_string(),
            });
        }

        let partitions = (0..partition_count)
            .map(|i| Arc::new(MemoryPartition::new(i.to_string())))
            .collect();
        streams.insert(
            stream.to_string(),
            Arc::new(MemoryStream {
                partitions,
                round_robin: AtomicUsize::new(0),
            }),
        );
        debug!(stream, partition_count, "Created in-memory stream");
        Ok(())
    }

    /// Append directly to a named partition.
    pub fn publish_to_partition(
        &self,
        stream: &str,
        partition_id: &str,
        record: OutboundRecord,
    ) -> StreamResult<RecordMetadata> {
        self.check_available()?;
        let partition = self.partition(stream, partition_id)?;
        let sequence = partition.append(record)?;
        Ok(RecordMetadata {
            partition_id: partition.id.clone(),
            sequence,
        })
    }

    /// Number of records stored in a partition
    pub fn partition_len(&self, stream: &str, partition_id: &str) -> StreamResult<usize> {
        self.partition(stream, partition_id)?.len()
    }

    /// Simulate the broker going away (or coming back)
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> StreamResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StreamError::Broker("in-memory broker is offline".to_string()))
        }
    }

    fn write_streams(
        &self,
    ) -> StreamResult<std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<MemoryStream>>>> {
        self.streams
            .write()
            .map_err(|_| StreamError::Broker("stream table lock poisoned".to_string()))
    }

    fn stream(&self, stream: &str) -> StreamResult<Arc<MemoryStream>> {
        let streams = self
            .streams
            .read()
            .map_err(|_| StreamError::Broker("stream table lock poisoned".to_string()))?;
        streams
            .get(stream)
            .cloned()
            .ok_or_else(|| StreamError::StreamNotFound {
                stream_id: stream.to_string(),
            })
    }

    fn partition(&self, stream: &str, partition_id: &str) -> StreamResult<Arc<MemoryPartition>> {
        self.stream(stream)?
            .partitions
            .iter()
            .find(|p| p.id == partition_id)
            .cloned()
            .ok_or_else(|| StreamError::PartitionNotFound {
                stream_id: stream.to_string(),
                partition_id: partition_id.to_string(),
            })
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamBroker for InMemoryBroker {
    async fn partition_ids(&self, stream: &str) -> StreamResult<Vec<String>> {
        self.check_available()?;
        Ok(self
            .stream(stream)?
            .partitions
            .iter()
            .map(|p| p.id.clone())
            .collect())
    }

    async fn open_partition(
        &self,
        stream: &str,
        _consumer_group: &str,
        partition_id: &str,
        start: StartPosition,
    ) -> StreamResult<Box<dyn PartitionConsumer>> {
        self.check_available()?;
        let partition = self.partition(stream, partition_id)?;
        let next = match start {
            StartPosition::Latest => partition.len()?,
            StartPosition::Earliest => 0,
            // A checkpoint past the addressable range leaves nothing to read.
            StartPosition::After(sequence) => usize::try_from(sequence)
                .ok()
                .and_then(|s| s.checked_add(1))
                .unwrap_or(usize::MAX),
        };
        let len_rx = partition.len_tx.subscribe();

        Ok(Box::new(MemoryConsumer {
            partition,
            next,
            len_rx,
        }))
    }

    async fn publish(&self, stream: &str, record: OutboundRecord) -> StreamResult<RecordMetadata> {
        self.check_available()?;
        let stream = self.stream(stream)?;
        let partition = stream.partition_for(record.partition_key.as_deref());
        let sequence = partition.append(record)?;
        Ok(RecordMetadata {
            partition_id: partition.id.clone(),
            sequence,
        })
    }
}

struct MemoryConsumer {
    partition: Arc<MemoryPartition>,
    next: usize,
    len_rx: watch::Receiver<usize>,
}

#[async_trait]
impl PartitionConsumer for MemoryConsumer {
    async fn next_record(&mut self) -> StreamResult<Option<StreamRecord>> {
        loop {
            if let Some(record) = self.partition.get(self.next)? {
                self.next += 1;
                return Ok(Some(record));
            }
            if self.len_rx.changed().await.is_err() {
                return Ok(None);
            }
        }
    }
}
