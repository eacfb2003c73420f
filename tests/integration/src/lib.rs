//! Integration tests for the CommandLink transport
//!
//! This test suite validates:
//! - Token and payload codecs across crate boundaries
//! - Hub command channel recovery against a flaky hub
//! - Stream command, configuration and channel data channels end to end

pub mod test_utils;

#[cfg(test)]
mod codec_properties;

#[cfg(test)]
mod hub_channel_tests;

#[cfg(test)]
mod stream_channel_tests;
