//! C2 Router - command and control channels for CommandLink
//!
//! This crate provides the channels applications use to exchange commands:
//! - A self-healing hub connection ([`ReconnectingChannel`]) with a WebSocket
//!   transport
//! - Command channels over the hub and over a partitioned stream
//! - A configuration change channel
//! - Channel data forwarding
//!
//! # Architecture
//!
//! Commands flow through the following pipeline:
//! 1. The sender builds a [`Command`](commandlink_core::Command), optionally
//!    loading a typed payload
//! 2. The channel forwards it to the hub (`SendCommandV1`) or publishes it to
//!    the stream with a `DestId` routing property
//! 3. The receiving channel filters on its own identity
//! 4. Accepted commands run on the channel's bounded worker pool
//!
//! # Examples
//!
//! ```no_run
//! use commandlink_c2_router::HubCommandChannel;
//! use commandlink_core::{command_types, handler_fn, Command, Config};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::from_file("commandlink.toml")?;
//! let channel = HubCommandChannel::from_config(&config)?;
//!
//! channel
//!     .listen_for_commands(handler_fn(|cmd: Command| async move {
//!         tracing::info!(command_type = %cmd.command_type, "command received");
//!         Ok(())
//!     }))
//!     .await?;
//!
//! channel
//!     .send_command(Command::new(command_types::RESTART, channel.identity(), "unit-7"))
//!     .await?;
//! channel.close().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod channel_data;
pub mod command_channel;
pub mod config_channel;
mod endpoint;
pub mod error;
pub mod hub;
pub mod reconnect;
pub mod ws_transport;

pub use channel_data::ChannelDataPublisher;
pub use command_channel::{HubCommandChannel, StreamCommandChannel};
pub use config_channel::{ConfigChannel, ConfigNotification};
pub use error::{ChannelError, ChannelResult, HubError};
pub use hub::{HubConnector, HubCredentials, HubFrame, HubLink};
pub use reconnect::{ChannelOptions, ConnectionState, ReconnectStats, ReconnectingChannel};
pub use ws_transport::WsHubConnector;
