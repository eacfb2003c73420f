//! Self-healing hub connection
//!
//! [`ReconnectingChannel`] keeps one hub connection alive. Connection state is
//! held in a `watch` channel and moves `Disconnected -> Connecting ->
//! Connected`; the `Disconnected -> Connecting` step is an atomic
//! check-and-set so only one caller ever dials at a time. When the transport
//! drops, a single reconnect loop retries at a fixed interval until a
//! connection is back.

use crate::error::HubError;
use crate::hub::{HubConnector, HubCredentials, HubFrame, HubLink};
use commandlink_core::config::Config;
use commandlink_core::dispatch::DEFAULT_MAX_IN_FLIGHT;
use commandlink_core::{Command, DispatchPool, DispatchStats, SharedHandler};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Default pause between reconnect attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Hub connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no attempt in flight
    Disconnected,
    /// A connection attempt is in flight
    Connecting,
    /// Connected; calls are forwarded to the hub
    Connected,
}

/// Tuning for a [`ReconnectingChannel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Pause before every reconnect attempt
    pub reconnect_delay: Duration,
    /// Bound on concurrently running command callbacks
    pub max_in_flight: usize,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl ChannelOptions {
    /// Options from the `[hub]` and `[dispatch]` sections
    pub fn from_config(config: &Config) -> Self {
        Self {
            reconnect_delay: config.hub.reconnect_delay(),
            max_in_flight: config.dispatch.max_in_flight,
        }
    }
}

/// Snapshot of connection counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconnectStats {
    /// Calls to the connector
    pub connect_attempts: u64,
    /// Transitions into `Connecting`
    pub connecting_transitions: u64,
    /// Transitions into `Connected`
    pub connected_transitions: u64,
    /// Reconnect loops started
    pub reconnect_loops_started: u64,
    /// Most reconnect loops ever active at once
    pub peak_concurrent_loops: usize,
}

#[derive(Debug, Default)]
struct StatsCounters {
    connect_attempts: AtomicU64,
    connecting_transitions: AtomicU64,
    connected_transitions: AtomicU64,
    reconnect_loops_started: AtomicU64,
    active_loops: AtomicUsize,
    peak_concurrent_loops: AtomicUsize,
}

struct Inner {
    connector: Arc<dyn HubConnector>,
    credentials: HubCredentials,
    reconnect_delay: Duration,
    state: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::Sender<HubFrame>>>,
    generation: AtomicU64,
    reconnect_active: AtomicBool,
    handler: OnceLock<SharedHandler<Command>>,
    pool: DispatchPool,
    cancel: CancellationToken,
    tasks: TaskTracker,
    closed: AtomicBool,
    counters: StatsCounters,
}

/// Releases the reconnect flag when a loop exits, however it exits.
struct LoopGuard(Arc<Inner>);

impl LoopGuard {
    fn enter(inner: &Arc<Inner>) -> Self {
        let active = inner.counters.active_loops.fetch_add(1, Ordering::SeqCst) + 1;
        inner
            .counters
            .peak_concurrent_loops
            .fetch_max(active, Ordering::SeqCst);
        inner
            .counters
            .reconnect_loops_started
            .fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(inner))
    }
}

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.0.counters.active_loops.fetch_sub(1, Ordering::SeqCst);
        self.0.reconnect_active.store(false, Ordering::SeqCst);
    }
}

impl Inner {
    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn outbound(&self) -> std::sync::MutexGuard<'_, Option<mpsc::Sender<HubFrame>>> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Dial the hub unless a connection exists or another caller is dialing.
    ///
    /// A caller that loses the `Disconnected -> Connecting` race waits for the
    /// winner's outcome instead of dialing again.
    async fn try_connect(self: &Arc<Self>) -> Result<(), HubError> {
        if self.cancel.is_cancelled() {
            return Err(HubError::Closed);
        }

        let claimed = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });

        if !claimed {
            let mut rx = self.state.subscribe();
            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(HubError::Closed),
                state = rx.wait_for(|s| *s != ConnectionState::Connecting) => {
                    *state.map_err(|_| HubError::Closed)?
                }
            };
            return match outcome {
                ConnectionState::Connected => Ok(()),
                _ => Err(HubError::NotConnected),
            };
        }

        self.counters
            .connecting_transitions
            .fetch_add(1, Ordering::Relaxed);
        self.counters.connect_attempts.fetch_add(1, Ordering::Relaxed);

        let dialed = match self.credentials.access_token() {
            Ok(token) => tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(HubError::Closed),
                link = self.connector.connect(&token) => link,
            },
            Err(e) => Err(e),
        };

        match dialed {
            Ok(link) => {
                self.install(link);
                Ok(())
            }
            Err(e) => {
                self.state.send_replace(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    fn install(self: &Arc<Self>, link: HubLink) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.outbound() = Some(link.outbound);
        self.state.send_replace(ConnectionState::Connected);
        self.counters
            .connected_transitions
            .fetch_add(1, Ordering::Relaxed);
        info!(app_id = %self.credentials.app_id(), generation, "Hub connection established");

        let inner = Arc::clone(self);
        self.tasks
            .spawn(inner.drive(generation, link.inbound, link.tasks));
    }

    /// Pump inbound frames until the transport closes, then hand over to the
    /// reconnect loop. Returns only after the transport tasks have stopped.
    async fn drive(
        self: Arc<Self>,
        generation: u64,
        mut inbound: mpsc::Receiver<HubFrame>,
        transport: TaskTracker,
    ) {
        let lost = loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break false,
                frame = inbound.recv() => frame,
            };

            match frame {
                Some(HubFrame::ReceiveCommand { command }) => self.deliver(command).await,
                Some(other) => debug!(method = other.method(), "Ignoring unexpected hub frame"),
                None => break true,
            }
        };
        drop(inbound);

        if lost
            && self.generation.load(Ordering::SeqCst) == generation
            && !self.cancel.is_cancelled()
        {
            self.outbound().take();
            self.state.send_replace(ConnectionState::Disconnected);
            warn!(generation, "Hub connection closed");
            self.start_reconnect_loop();
        }

        transport.close();
        transport.wait().await;
        debug!(generation, "Hub transport stopped");
    }

    async fn deliver(&self, command: Command) {
        let Some(handler) = self.handler.get() else {
            debug!(command_type = %command.command_type, "No command handler registered, dropping");
            return;
        };

        let dispatched = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            dispatched = self.pool.dispatch(Arc::clone(handler), command) => dispatched,
        };
        if let Err(e) = dispatched {
            warn!(error = %e, "Unable to dispatch hub command");
        }
    }

    /// Start the reconnect loop unless one is already running.
    fn start_reconnect_loop(self: &Arc<Self>) {
        if self.cancel.is_cancelled() {
            return;
        }
        if self
            .reconnect_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Reconnect loop already active");
            return;
        }

        let guard = LoopGuard::enter(self);
        let inner = Arc::clone(self);
        self.tasks.spawn(async move {
            inner.reconnect_loop().await;
            drop(guard);
            // A drop observed while the flag was still held found no loop to start.
            if inner.current_state() == ConnectionState::Disconnected {
                inner.start_reconnect_loop();
            }
        });
    }

    async fn reconnect_loop(self: &Arc<Self>) {
        let mut attempt: u32 = 0;
        while self.current_state() == ConnectionState::Disconnected {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }

            attempt += 1;
            match self.try_connect().await {
                Ok(()) => {
                    info!(attempt, "Reconnected to hub");
                    return;
                }
                Err(HubError::Closed) => return,
                Err(e) => warn!(attempt, error = %e, "Reconnect attempt failed"),
            }
        }
    }
}

/// Hub connection with automatic recovery.
///
/// Dropping the channel cancels its background tasks; call
/// [`close`](Self::close) to also wait for them and for in-flight callbacks.
pub struct ReconnectingChannel {
    inner: Arc<Inner>,
}

impl ReconnectingChannel {
    /// Create a disconnected channel
    pub fn new(
        connector: Arc<dyn HubConnector>,
        credentials: HubCredentials,
        options: ChannelOptions,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                connector,
                credentials,
                reconnect_delay: options.reconnect_delay,
                state,
                outbound: Mutex::new(None),
                generation: AtomicU64::new(0),
                reconnect_active: AtomicBool::new(false),
                handler: OnceLock::new(),
                pool: DispatchPool::new("hub-commands", options.max_in_flight),
                cancel: CancellationToken::new(),
                tasks: TaskTracker::new(),
                closed: AtomicBool::new(false),
                counters: StatsCounters::default(),
            }),
        }
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.inner.current_state()
    }

    /// Observe state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Whether a reconnect loop is running
    pub fn is_reconnecting(&self) -> bool {
        self.inner.reconnect_active.load(Ordering::SeqCst)
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Connection counters
    pub fn stats(&self) -> ReconnectStats {
        let c = &self.inner.counters;
        ReconnectStats {
            connect_attempts: c.connect_attempts.load(Ordering::Relaxed),
            connecting_transitions: c.connecting_transitions.load(Ordering::Relaxed),
            connected_transitions: c.connected_transitions.load(Ordering::Relaxed),
            reconnect_loops_started: c.reconnect_loops_started.load(Ordering::Relaxed),
            peak_concurrent_loops: c.peak_concurrent_loops.load(Ordering::SeqCst),
        }
    }

    /// Command callback counters
    pub fn dispatch_stats(&self) -> DispatchStats {
        self.inner.pool.stats()
    }

    /// Connect now. On failure the reconnect loop takes over and the error
    /// is returned.
    pub async fn connect(&self) -> Result<(), HubError> {
        self.ensure_open()?;
        if let Err(e) = self.inner.try_connect().await {
            self.inner.start_reconnect_loop();
            return Err(e);
        }
        Ok(())
    }

    /// Register the inbound command handler and connect.
    ///
    /// Only one handler may be registered. A failed connect is logged and
    /// left to the reconnect loop; the registration stands.
    pub async fn subscribe(&self, handler: SharedHandler<Command>) -> Result<(), HubError> {
        self.ensure_open()?;
        self.inner
            .handler
            .set(handler)
            .map_err(|_| HubError::AlreadySubscribed)?;

        if self.state() != ConnectionState::Connected {
            if let Err(e) = self.connect().await {
                warn!(error = %e, "Unable to connect to hub, reconnecting in background");
            }
        }
        Ok(())
    }

    /// Invoke `SendCommandV1` on the hub.
    ///
    /// Connects first when disconnected. Nothing is queued: if no connection
    /// can be made the call fails.
    pub async fn send(&self, command: Command, destination_id: &str) -> Result<(), HubError> {
        self.ensure_open()?;
        if self.state() != ConnectionState::Connected {
            self.connect().await?;
        }

        let outbound = self.inner.outbound().clone().ok_or(HubError::NotConnected)?;
        let frame = HubFrame::SendCommand {
            command,
            destination_id: destination_id.to_string(),
        };
        outbound
            .send(frame)
            .await
            .map_err(|_| HubError::NotConnected)
    }

    /// Stop reconnecting, drop the connection, and wait for background tasks
    /// and in-flight callbacks.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.cancel.cancel();
        self.inner.outbound().take();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.pool.drain().await;
        self.inner.state.send_replace(ConnectionState::Disconnected);
        info!(app_id = %self.inner.credentials.app_id(), "Hub channel closed");
    }

    fn ensure_open(&self) -> Result<(), HubError> {
        if self.is_closed() {
            Err(HubError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Drop for ReconnectingChannel {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
    }
}
