//! Command channels
//!
//! Two bindings carry the same [`Command`] envelope:
//! - [`HubCommandChannel`] over the real-time hub, via [`ReconnectingChannel`]
//! - [`StreamCommandChannel`] over a partitioned stream, via the fan-out reader
//!
//! Both deliver only commands addressed to the local identity.

use crate::endpoint::StreamEndpoint;
use crate::error::{ChannelError, ChannelResult};
use crate::hub::{HubConnector, HubCredentials};
use crate::reconnect::{ChannelOptions, ReconnectingChannel};
use crate::ws_transport::WsHubConnector;
use async_trait::async_trait;
use commandlink_core::config::{Config, StreamSettings};
use commandlink_core::{
    Command, CommandPayload, DestinationFilter, Handler, SharedHandler, DEST_ID_PROPERTY,
};
use commandlink_stream::{CheckpointStore, OutboundRecord, RecordMetadata, StreamBroker, StreamRecord};
use std::sync::Arc;
use tracing::debug;

/// Drops hub commands addressed elsewhere before they reach the application.
struct AddressedTo {
    filter: DestinationFilter,
    inner: SharedHandler<Command>,
}

#[async_trait]
impl Handler<Command> for AddressedTo {
    async fn handle(&self, command: Command) -> anyhow::Result<()> {
        if !self.filter.accepts_command(&command) {
            debug!(
                command_type = %command.command_type,
                destination_id = %command.destination_id,
                "Dropping command for another destination"
            );
            return Ok(());
        }
        debug!(
            command_type = %command.command_type,
            origin_id = %command.origin_id,
            "Received command"
        );
        self.inner.handle(command).await
    }
}

/// Command channel over the real-time hub.
pub struct HubCommandChannel {
    identity: String,
    filter: DestinationFilter,
    connection: ReconnectingChannel,
}

impl HubCommandChannel {
    /// Create a channel for the identity in `credentials`
    pub fn new(
        connector: Arc<dyn HubConnector>,
        credentials: HubCredentials,
        options: ChannelOptions,
    ) -> Self {
        let identity = credentials.app_id().to_string();
        Self {
            filter: DestinationFilter::for_destination(identity.clone()),
            identity,
            connection: ReconnectingChannel::new(connector, credentials, options),
        }
    }

    /// WebSocket channel built from configuration
    pub fn from_config(config: &Config) -> ChannelResult<Self> {
        let credentials = HubCredentials::from_config(config)?;
        Ok(Self::new(
            Arc::new(WsHubConnector::from_config(&config.hub)),
            credentials,
            ChannelOptions::from_config(config),
        ))
    }

    /// Local identity commands are filtered on
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Underlying connection
    pub fn connection(&self) -> &ReconnectingChannel {
        &self.connection
    }

    /// Deliver commands addressed to this identity to `handler`.
    pub async fn listen_for_commands(&self, handler: SharedHandler<Command>) -> ChannelResult<()> {
        let filtered = Arc::new(AddressedTo {
            filter: self.filter.clone(),
            inner: handler,
        });
        self.connection.subscribe(filtered).await?;
        Ok(())
    }

    /// Send `command` to its `destination_id`
    pub async fn send_command(&self, command: Command) -> ChannelResult<()> {
        let destination_id = command.destination_id.clone();
        self.connection.send(command, &destination_id).await?;
        Ok(())
    }

    /// Encode `payload` into a command from this identity and send it
    pub async fn send_payload<P: CommandPayload>(
        &self,
        destination_id: &str,
        payload: &P,
    ) -> ChannelResult<()> {
        let command = Command::with_payload(self.identity.as_str(), destination_id, payload)?;
        self.send_command(command).await
    }

    /// Stop the connection and wait for in-flight callbacks
    pub async fn close(&self) {
        self.connection.close().await;
    }
}

/// Turns stream records into commands for the application handler.
struct RecordToCommand {
    inner: SharedHandler<Command>,
}

#[async_trait]
impl Handler<StreamRecord> for RecordToCommand {
    async fn handle(&self, record: StreamRecord) -> anyhow::Result<()> {
        let command: Command = serde_json::from_slice(&record.body)?;
        debug!(
            partition_id = %record.partition_id,
            sequence = record.sequence,
            command_type = %command.command_type,
            "Received command"
        );
        self.inner.handle(command).await
    }
}

/// Command channel over a partitioned stream.
///
/// Commands are stored as JSON bodies with a `DestId` routing property; the
/// listener delivers only records whose `DestId` equals the local identity.
pub struct StreamCommandChannel {
    identity: String,
    endpoint: StreamEndpoint,
}

impl StreamCommandChannel {
    /// Create a channel for `identity`
    pub fn new(
        broker: Arc<dyn StreamBroker>,
        checkpoints: Arc<dyn CheckpointStore>,
        identity: impl Into<String>,
        settings: StreamSettings,
        max_in_flight: usize,
    ) -> Self {
        Self {
            identity: identity.into(),
            endpoint: StreamEndpoint::new(
                "stream-commands",
                broker,
                checkpoints,
                settings,
                max_in_flight,
            ),
        }
    }

    /// Channel on `broker` configured from the `[identity]`, `[stream]` and
    /// `[dispatch]` sections
    pub fn from_config(broker: Arc<dyn StreamBroker>, config: &Config) -> ChannelResult<Self> {
        Ok(Self::new(
            broker,
            StreamEndpoint::checkpoints_for(config)?,
            config.identity.app_id.to_string(),
            config.stream.clone(),
            config.dispatch.max_in_flight,
        ))
    }

    /// Local identity
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Stream settings in use
    pub fn settings(&self) -> &StreamSettings {
        self.endpoint.settings()
    }

    /// Whether a listener has been started
    pub fn is_listening(&self) -> bool {
        self.endpoint.is_listening()
    }

    /// Start delivering commands addressed to this identity.
    ///
    /// Returns once the listener is scheduled. A listener that cannot start
    /// retries until [`close`](Self::close).
    pub fn listen_for_commands(&self, handler: SharedHandler<Command>) -> ChannelResult<()> {
        let request = self
            .endpoint
            .base_request()
            .with_route_filter(DestinationFilter::for_destination(self.identity.clone()));
        self.endpoint
            .listen(request, Arc::new(RecordToCommand { inner: handler }))
    }

    /// Publish `command` routed to its `destination_id`
    pub async fn send_command(&self, command: &Command) -> ChannelResult<RecordMetadata> {
        if command.destination_id.is_empty() {
            return Err(ChannelError::Configuration(
                "stream commands need a destination".to_string(),
            ));
        }
        let body = serde_json::to_vec(command)?;
        let record = OutboundRecord::new(body)
            .with_property(DEST_ID_PROPERTY, command.destination_id.as_str())
            .with_partition_key(command.destination_id.as_str());
        self.endpoint.publish(record).await
    }

    /// Encode `payload` into a command from this identity and publish it
    pub async fn send_payload<P: CommandPayload>(
        &self,
        destination_id: &str,
        payload: &P,
    ) -> ChannelResult<RecordMetadata> {
        let command = Command::with_payload(self.identity.as_str(), destination_id, payload)?;
        self.send_command(&command).await
    }

    /// Stop the listener and wait for in-flight callbacks
    pub async fn close(&self) {
        self.endpoint.close().await;
    }
}
