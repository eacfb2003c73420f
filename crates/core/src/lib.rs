//! Core types for the CommandLink command/control transport.
//!
//! This crate provides the pieces shared by both transport bindings:
//! - the [`Command`] envelope and its command-type tags
//! - the payload codec ([`codec`])
//! - the [`DestinationFilter`] routing predicate
//! - the application [`Handler`] trait and the bounded [`DispatchPool`]
//! - configuration and logging setup

#![warn(missing_docs)]

pub mod codec;
pub mod command;
#[allow(missing_docs)]
pub mod config;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod handler;
pub mod logging;

pub use codec::{decode_payload, decode_typed, encode_payload, CommandPayload};
pub use command::{command_types, configuration_command_types, Command};
pub use config::Config;
pub use dispatch::{DispatchError, DispatchPool, DispatchStats};
pub use error::{CodecError, CodecResult, ConfigError};
pub use filter::{
    DestinationFilter, COMMAND_TYPE_PROPERTY, DEST_ID_PROPERTY, DEVICE_APP_ID_PROPERTY,
};
pub use handler::{handler_fn, Handler, SharedHandler};
