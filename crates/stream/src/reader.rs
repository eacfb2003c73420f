//! Partition fan-out reader
//!
//! Opens one ordered consumer per selected partition and runs each on its own
//! task. Every record is optionally routed through a [`DestinationFilter`],
//! handed to the bounded [`DispatchPool`], and then checkpointed. The
//! checkpoint moves on dispatch, not on completion, so delivery is
//! at-least-once across restarts.

use crate::broker::{PartitionConsumer, StreamBroker};
use crate::checkpoint::{CheckpointKey, CheckpointStore};
use crate::error::{StreamError, StreamResult};
use crate::record::{PartitionCursor, StartPosition, StreamRecord};
use commandlink_core::config::StreamSettings;
use commandlink_core::dispatch::DEFAULT_MAX_IN_FLIGHT;
use commandlink_core::{DestinationFilter, DispatchPool, DispatchStats, SharedHandler};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Pause before re-polling a partition after a read error
const READ_RETRY_DELAY: Duration = Duration::from_millis(500);

/// What to read and how to route it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    /// Stream name
    pub stream: String,
    /// Consumer group the checkpoints belong to
    pub consumer_group: String,
    /// Partitions to read. `None` or empty reads every partition.
    pub partition_filter: Option<Vec<String>>,
    /// Position used when a partition has no checkpoint yet
    pub start_position: StartPosition,
    /// Records failing this filter are checkpointed but not delivered
    pub route_filter: Option<DestinationFilter>,
}

impl ReadRequest {
    /// Read every partition of `stream` from the latest position
    pub fn new(stream: impl Into<String>, consumer_group: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            consumer_group: consumer_group.into(),
            partition_filter: None,
            start_position: StartPosition::Latest,
            route_filter: None,
        }
    }

    /// Build a request from the `[stream]` configuration section
    pub fn from_settings(settings: &StreamSettings) -> Self {
        Self {
            stream: settings.stream_name.clone(),
            consumer_group: settings.consumer_group.clone(),
            partition_filter: settings.partition_filter.clone(),
            start_position: settings.start_position.into(),
            route_filter: None,
        }
    }

    /// Restrict reading to the given partition ids
    pub fn with_partitions<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partition_filter = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    /// Position for partitions without a checkpoint
    pub fn with_start_position(mut self, position: StartPosition) -> Self {
        self.start_position = position;
        self
    }

    /// Deliver only records passing `filter`
    pub fn with_route_filter(mut self, filter: DestinationFilter) -> Self {
        self.route_filter = Some(filter);
        self
    }

    /// Split the broker's partitions into (selected, unknown filter ids).
    fn select_partitions(&self, available: &[String]) -> (Vec<String>, Vec<String>) {
        match self.partition_filter.as_deref() {
            None | Some([]) => (available.to_vec(), Vec::new()),
            Some(wanted) => {
                let selected = available
                    .iter()
                    .filter(|id| wanted.contains(*id))
                    .cloned()
                    .collect();
                let skipped = wanted
                    .iter()
                    .filter(|id| !available.contains(*id))
                    .cloned()
                    .collect();
                (selected, skipped)
            }
        }
    }
}

/// Outcome of a completed [`PartitionFanoutReader::start`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutSummary {
    /// Partitions that had a reader
    pub partitions: Vec<String>,
    /// Filter ids the stream does not have
    pub skipped_filter_ids: Vec<String>,
    /// Records pulled from all partitions
    pub records_read: u64,
    /// Records handed to the worker pool
    pub records_dispatched: u64,
    /// Records dropped by the route filter
    pub records_filtered: u64,
}

#[derive(Debug, Default)]
struct ReadCounters {
    read: AtomicU64,
    dispatched: AtomicU64,
    filtered: AtomicU64,
}

/// Decrements the active reader gauge when a partition task ends.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(active))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Concurrent reader over the partitions of one stream.
///
/// Single use: a second `start` returns [`StreamError::AlreadyStarted`].
pub struct PartitionFanoutReader {
    broker: Arc<dyn StreamBroker>,
    checkpoints: Arc<dyn CheckpointStore>,
    cancel: CancellationToken,
    pool: Arc<DispatchPool>,
    started: AtomicBool,
    active: Arc<AtomicUsize>,
}

impl PartitionFanoutReader {
    /// Create a reader with its own cancellation token
    pub fn new(broker: Arc<dyn StreamBroker>, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self::with_cancellation(broker, checkpoints, CancellationToken::new())
    }

    /// Create a reader stopped by `cancel`
    pub fn with_cancellation(
        broker: Arc<dyn StreamBroker>,
        checkpoints: Arc<dyn CheckpointStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            broker,
            checkpoints,
            cancel,
            pool: Arc::new(DispatchPool::new("partition-fanout", DEFAULT_MAX_IN_FLIGHT)),
            started: AtomicBool::new(false),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Bound the number of callbacks running at once
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.pool = Arc::new(DispatchPool::new("partition-fanout", max_in_flight));
        self
    }

    /// Token that stops this reader
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask every partition reader to stop
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Partition readers currently running
    pub fn active_readers(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Worker pool counters
    pub fn dispatch_stats(&self) -> DispatchStats {
        self.pool.stats()
    }

    /// Read the selected partitions until cancelled or every partition closes.
    ///
    /// Partition enumeration and consumer opening happen before any reader
    /// runs; their failures are returned so the caller can retry with a new
    /// reader. A reader that fails while running stops the others and its
    /// error is returned. Returns after all readers exited and the worker pool
    /// drained.
    pub async fn start(
        &self,
        request: ReadRequest,
        handler: SharedHandler<StreamRecord>,
    ) -> StreamResult<FanoutSummary> {
        if self.cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(StreamError::AlreadyStarted);
        }

        let available = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(StreamError::Cancelled),
            ids = self.broker.partition_ids(&request.stream) => ids?,
        };

        let (selected, skipped) = request.select_partitions(&available);
        for partition_id in &skipped {
            warn!(
                stream = %request.stream,
                partition_id = %partition_id,
                "Partition in filter does not exist, skipping"
            );
        }

        let mut consumers = Vec::with_capacity(selected.len());
        for partition_id in &selected {
            let key = CheckpointKey::new(&request.stream, &request.consumer_group, partition_id);
            let cursor = PartitionCursor {
                partition_id: partition_id.clone(),
                position: match self.checkpoints.load(&key).await? {
                    Some(sequence) => StartPosition::After(sequence),
                    None => request.start_position,
                },
            };

            let consumer = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(StreamError::Cancelled),
                consumer = self.broker.open_partition(
                    &request.stream,
                    &request.consumer_group,
                    &cursor.partition_id,
                    cursor.position,
                ) => consumer?,
            };
            debug!(
                stream = %request.stream,
                partition_id = %cursor.partition_id,
                position = ?cursor.position,
                "Opened partition consumer"
            );
            consumers.push((key, consumer));
        }

        // Scoped to this run so a failed reader can stop its siblings without
        // cancelling the owner's token.
        let run = self.cancel.child_token();
        let counters = Arc::new(ReadCounters::default());
        let mut readers = JoinSet::new();
        for (key, consumer) in consumers {
            let worker = PartitionWorker {
                key,
                consumer,
                filter: request.route_filter.clone(),
                handler: Arc::clone(&handler),
                pool: Arc::clone(&self.pool),
                checkpoints: Arc::clone(&self.checkpoints),
                cancel: run.clone(),
                counters: Arc::clone(&counters),
                active: ActiveGuard::enter(&self.active),
            };
            readers.spawn(worker.run());
        }

        info!(
            stream = %request.stream,
            consumer_group = %request.consumer_group,
            partitions = selected.len(),
            "Partition readers started"
        );

        let mut failure = None;
        while let Some(result) = readers.join_next().await {
            let outcome = result
                .map_err(|e| StreamError::Task(e.to_string()))
                .and_then(|read| read);
            if let Err(e) = outcome {
                error!(stream = %request.stream, error = %e, "Partition reader failed");
                run.cancel();
                failure.get_or_insert(e);
            }
        }
        self.pool.drain().await;
        if let Some(e) = failure {
            return Err(e);
        }

        let summary = FanoutSummary {
            partitions: selected,
            skipped_filter_ids: skipped,
            records_read: counters.read.load(Ordering::Relaxed),
            records_dispatched: counters.dispatched.load(Ordering::Relaxed),
            records_filtered: counters.filtered.load(Ordering::Relaxed),
        };
        info!(
            stream = %request.stream,
            records_read = summary.records_read,
            records_dispatched = summary.records_dispatched,
            records_filtered = summary.records_filtered,
            "Partition readers stopped"
        );
        Ok(summary)
    }

    /// Run [`start`](Self::start) on a background task.
    pub fn spawn(
        self: &Arc<Self>,
        request: ReadRequest,
        handler: SharedHandler<StreamRecord>,
    ) -> FanoutHandle {
        let reader = Arc::clone(self);
        FanoutHandle {
            cancel: self.cancel.clone(),
            task: tokio::spawn(async move { reader.start(request, handler).await }),
        }
    }
}

/// Handle to a reader running in the background.
pub struct FanoutHandle {
    cancel: CancellationToken,
    task: JoinHandle<StreamResult<FanoutSummary>>,
}

impl FanoutHandle {
    /// Signal the reader to stop without waiting
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the background task has returned
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel and wait for the reader to finish
    pub async fn shutdown(self) -> StreamResult<FanoutSummary> {
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for the reader to finish on its own
    pub async fn join(self) -> StreamResult<FanoutSummary> {
        self.task
            .await
            .map_err(|e| StreamError::Task(e.to_string()))?
    }
}

struct PartitionWorker {
    key: CheckpointKey,
    consumer: Box<dyn PartitionConsumer>,
    filter: Option<DestinationFilter>,
    handler: SharedHandler<StreamRecord>,
    pool: Arc<DispatchPool>,
    checkpoints: Arc<dyn CheckpointStore>,
    cancel: CancellationToken,
    counters: Arc<ReadCounters>,
    active: ActiveGuard,
}

impl PartitionWorker {
    async fn run(mut self) -> StreamResult<()> {
        let partition_id = self.key.partition_id.clone();
        debug!(partition_id = %partition_id, "Partition reader running");

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = self.consumer.next_record() => next,
            };

            let record = match next {
                Ok(Some(record)) => record,
                Ok(None) => {
                    debug!(partition_id = %partition_id, "Partition closed");
                    break;
                }
                Err(e) => {
                    warn!(partition_id = %partition_id, error = %e, "Unable to read partition, retrying");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(READ_RETRY_DELAY) => continue,
                    }
                }
            };
            self.counters.read.fetch_add(1, Ordering::Relaxed);

            let sequence = record.sequence;
            let accepted = self
                .filter
                .as_ref()
                .map_or(true, |filter| filter.route(&record.properties).is_some());

            if accepted {
                let dispatched = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => break,
                    dispatched = self.pool.dispatch(Arc::clone(&self.handler), record) => dispatched,
                };
                if let Err(e) = dispatched {
                    warn!(partition_id = %partition_id, error = %e, "Worker pool refused record");
                    return Err(e.into());
                }
                self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
            } else {
                self.counters.filtered.fetch_add(1, Ordering::Relaxed);
                trace!(partition_id = %partition_id, sequence, "Record filtered out");
            }

            if let Err(e) = self.checkpoints.advance(&self.key, sequence).await {
                warn!(partition_id = %partition_id, sequence, error = %e, "Unable to advance checkpoint");
            }
        }

        drop(self.active);
        debug!(partition_id = %partition_id, "Partition reader exited");
        Ok(())
    }
}
