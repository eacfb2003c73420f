//! Bounded worker pool for application callbacks
//!
//! Readers hand each accepted item to a [`DispatchPool`] so that a slow
//! callback never stalls the read loop. The pool is owned by the channel that
//! created it: at most `max_in_flight` callbacks run at once, dispatch waits
//! for a free slot, and [`DispatchPool::drain`] waits for every outstanding
//! callback before the owner releases its transport.

use crate::handler::SharedHandler;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error};

/// Default number of callbacks allowed to run concurrently
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

/// Dispatch errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The pool has been drained and accepts no more work
    #[error("Dispatch pool {0} is closed")]
    Closed(String),
}

/// Counters exported by a pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Items handed to a worker
    pub dispatched: u64,
    /// Callbacks that returned `Ok`
    pub completed: u64,
    /// Callbacks that returned `Err`
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    dispatched: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Bounded, drainable callback pool.
#[derive(Debug)]
pub struct DispatchPool {
    name: String,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    counters: Arc<Counters>,
}

impl DispatchPool {
    /// Create a pool running at most `max_in_flight` callbacks concurrently.
    pub fn new(name: impl Into<String>, max_in_flight: usize) -> Self {
        Self {
            name: name.into(),
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            tracker: TaskTracker::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Pool name used in log fields
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hand `item` to `handler` on a worker.
    ///
    /// Waits for a free slot when the pool is saturated. Returns once the
    /// callback has been scheduled, not once it has finished.
    pub async fn dispatch<T: Send + 'static>(
        &self,
        handler: SharedHandler<T>,
        item: T,
    ) -> Result<(), DispatchError> {
        if self.tracker.is_closed() {
            return Err(DispatchError::Closed(self.name.clone()));
        }

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::Closed(self.name.clone()))?;

        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
        let counters = Arc::clone(&self.counters);
        let pool = self.name.clone();

        self.tracker.spawn(async move {
            let _permit = permit;
            match handler.handle(item).await {
                Ok(()) => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    error!(pool = %pool, error = %e, "Unable to complete callback");
                }
            }
        });

        Ok(())
    }

    /// Number of callbacks currently scheduled or running
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Snapshot of the pool counters
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Whether [`drain`](Self::drain) has been called
    pub fn is_closed(&self) -> bool {
        self.tracker.is_closed()
    }

    /// Stop accepting work and wait for every outstanding callback.
    pub async fn drain(&self) {
        self.tracker.close();
        self.permits.close();

        let in_flight = self.tracker.len();
        if in_flight > 0 {
            debug!(pool = %self.name, in_flight, "Waiting for in-flight callbacks");
        }
        self.tracker.wait().await;
        debug!(pool = %self.name, "Dispatch pool drained");
    }
}
