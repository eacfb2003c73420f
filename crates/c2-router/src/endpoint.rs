//! Shared plumbing for the stream-backed channels
//!
//! A [`StreamEndpoint`] owns the broker handle, the checkpoint store and the
//! channel's cancellation token. Its listener runs a fresh
//! [`PartitionFanoutReader`] per attempt and retries transient failures at a
//! fixed interval until the channel is closed.

use crate::error::{ChannelError, ChannelResult};
use commandlink_core::config::{Config, StreamSettings};
use commandlink_core::SharedHandler;
use commandlink_stream::{
    CheckpointStore, InMemoryCheckpointStore, OutboundRecord, PartitionFanoutReader, ReadRequest,
    RecordMetadata, SqliteCheckpointStore, StreamBroker, StreamError, StreamRecord,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

pub(crate) struct StreamEndpoint {
    name: &'static str,
    broker: Arc<dyn StreamBroker>,
    checkpoints: Arc<dyn CheckpointStore>,
    settings: StreamSettings,
    max_in_flight: usize,
    cancel: CancellationToken,
    tracker: TaskTracker,
    listening: Arc<AtomicBool>,
}

impl StreamEndpoint {
    pub(crate) fn new(
        name: &'static str,
        broker: Arc<dyn StreamBroker>,
        checkpoints: Arc<dyn CheckpointStore>,
        settings: StreamSettings,
        max_in_flight: usize,
    ) -> Self {
        Self {
            name,
            broker,
            checkpoints,
            settings,
            max_in_flight,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            listening: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Checkpoint store named by `stream.checkpoint_db`, or an in-memory one.
    pub(crate) fn checkpoints_for(config: &Config) -> ChannelResult<Arc<dyn CheckpointStore>> {
        match &config.stream.checkpoint_db {
            Some(path) => Ok(Arc::new(SqliteCheckpointStore::open(path)?)),
            None => Ok(Arc::new(InMemoryCheckpointStore::new())),
        }
    }

    pub(crate) fn settings(&self) -> &StreamSettings {
        &self.settings
    }

    pub(crate) fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn base_request(&self) -> ReadRequest {
        ReadRequest::from_settings(&self.settings)
    }

    pub(crate) async fn publish(&self, record: OutboundRecord) -> ChannelResult<RecordMetadata> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        Ok(self
            .broker
            .publish(&self.settings.stream_name, record)
            .await?)
    }

    /// Start the background listener. Only one listener per endpoint.
    pub(crate) fn listen(
        &self,
        request: ReadRequest,
        handler: SharedHandler<StreamRecord>,
    ) -> ChannelResult<()> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }
        if self.listening.swap(true, Ordering::SeqCst) {
            return Err(ChannelError::Configuration(format!(
                "{} is already listening",
                self.name
            )));
        }

        let attempt = ListenAttempt {
            name: self.name,
            broker: Arc::clone(&self.broker),
            checkpoints: Arc::clone(&self.checkpoints),
            max_in_flight: self.max_in_flight,
            retry_delay: self.settings.start_retry_delay(),
            cancel: self.cancel.clone(),
            listening: Arc::clone(&self.listening),
        };
        self.tracker.spawn(attempt.run(request, handler));
        Ok(())
    }

    /// Cancel the listener and wait for it and its callbacks to finish.
    pub(crate) async fn close(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        debug!(channel = self.name, "Stream endpoint closed");
    }
}

impl Drop for StreamEndpoint {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct ListenAttempt {
    name: &'static str,
    broker: Arc<dyn StreamBroker>,
    checkpoints: Arc<dyn CheckpointStore>,
    max_in_flight: usize,
    retry_delay: Duration,
    cancel: CancellationToken,
    listening: Arc<AtomicBool>,
}

impl ListenAttempt {
    async fn run(self, request: ReadRequest, handler: SharedHandler<StreamRecord>) {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let reader = PartitionFanoutReader::with_cancellation(
                Arc::clone(&self.broker),
                Arc::clone(&self.checkpoints),
                self.cancel.clone(),
            )
            .with_max_in_flight(self.max_in_flight);

            match reader.start(request.clone(), Arc::clone(&handler)).await {
                Ok(summary) => {
                    warn!(
                        channel = self.name,
                        partitions = summary.partitions.len(),
                        records_dispatched = summary.records_dispatched,
                        "Listener stopped with nothing left to read"
                    );
                    self.listening.store(false, Ordering::SeqCst);
                    return;
                }
                Err(StreamError::Cancelled) => return,
                Err(e) if !e.is_transient() => {
                    error!(
                        channel = self.name,
                        attempt,
                        error = %e,
                        "Unable to start listener, giving up"
                    );
                    self.listening.store(false, Ordering::SeqCst);
                    return;
                }
                Err(e) => {
                    warn!(
                        channel = self.name,
                        attempt,
                        error = %e,
                        retry_in_ms = self.retry_delay.as_millis() as u64,
                        "Unable to start listener, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(self.retry_delay) => {}
                    }
                }
            }
        }
    }
}
