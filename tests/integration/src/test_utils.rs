//! Test utilities for cross-crate integration tests

use async_trait::async_trait;
use commandlink_c2_router::{ChannelOptions, HubConnector, HubCredentials, HubError, HubFrame, HubLink};
use commandlink_core::config::{StartPositionSetting, StreamSettings};
use commandlink_core::{handler_fn, logging, SharedHandler};
use commandlink_crypto::TokenCodec;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Duration;
use uuid::Uuid;

/// Key shared by the test hub and the test clients
pub const TEST_TOKEN_KEY: [u8; 32] = [0x5A; 32];

/// Install the test log writer once per process
pub fn init_logging() {
    let _ = logging::try_init();
}

/// Token codec keyed with [`TEST_TOKEN_KEY`]
pub fn test_codec() -> TokenCodec {
    TokenCodec::new(&TEST_TOKEN_KEY).unwrap()
}

/// Credentials for `app_id` using the test key
pub fn test_credentials(app_id: Uuid) -> HubCredentials {
    HubCredentials::new(app_id, "integration-api-key", test_codec())
}

/// Fast reconnects for tests
pub fn fast_options() -> ChannelOptions {
    ChannelOptions {
        reconnect_delay: Duration::from_millis(10),
        max_in_flight: 8,
    }
}

/// Stream settings replaying from the start with quick retries
pub fn test_stream_settings(stream: &str) -> StreamSettings {
    StreamSettings {
        stream_name: stream.to_string(),
        consumer_group: "integration".to_string(),
        start_position: StartPositionSetting::Earliest,
        start_retry_delay_ms: 10,
        ..StreamSettings::default()
    }
}

/// Server half of a mock hub connection
pub struct ServerEnd {
    /// Frames the client sent
    pub from_client: mpsc::Receiver<HubFrame>,
    /// Push frames to the client; dropping it closes the connection
    pub to_client: mpsc::Sender<HubFrame>,
}

/// Hub connector that refuses the first `failures` dials.
///
/// Every dial's bearer token is decoded with the test key and recorded.
pub struct FlakyConnector {
    failures_left: AtomicUsize,
    dials: AtomicUsize,
    identities: Mutex<Vec<(Uuid, String)>>,
    tokens: Mutex<Vec<String>>,
    servers: mpsc::UnboundedSender<ServerEnd>,
}

impl FlakyConnector {
    /// Connector failing `failures` times, plus the stream of server ends
    pub fn new(failures: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<ServerEnd>) {
        let (servers, accepted) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            failures_left: AtomicUsize::new(failures),
            dials: AtomicUsize::new(0),
            identities: Mutex::new(Vec::new()),
            tokens: Mutex::new(Vec::new()),
            servers,
        });
        (connector, accepted)
    }

    /// Dials so far, successful or not
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// Identities decoded from presented tokens
    pub fn identities(&self) -> Vec<(Uuid, String)> {
        self.identities.lock().unwrap().clone()
    }

    /// Raw tokens presented
    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl HubConnector for FlakyConnector {
    async fn connect(&self, access_token: &str) -> Result<HubLink, HubError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        self.tokens.lock().unwrap().push(access_token.to_string());
        let identity = test_codec().decode(access_token)?;
        self.identities.lock().unwrap().push(identity);

        let refuse = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refuse {
            return Err(HubError::Connect("hub refused connection".to_string()));
        }

        let (link, from_client, to_client) = HubLink::pair();
        let _ = self.servers.send(ServerEnd {
            from_client,
            to_client,
        });
        Ok(link)
    }
}

/// Handler that records every item it sees
pub fn recording_handler<T: Send + 'static>() -> (SharedHandler<T>, Arc<Mutex<Vec<T>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let handler = handler_fn(move |item: T| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().unwrap().push(item);
            Ok(())
        }
    });
    (handler, seen)
}

/// Poll `condition` until it holds, panicking after five seconds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}
