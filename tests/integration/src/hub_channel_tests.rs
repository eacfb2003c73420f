//! Hub channel scenarios
//!
//! Drives [`HubCommandChannel`] against a mock hub that refuses a number of
//! dials, drops connections on demand, and records the bearer tokens it is
//! shown.

use crate::test_utils::*;
use commandlink_c2_router::{ConnectionState, HubCommandChannel, HubConnector, HubError, HubFrame};
use commandlink_core::command::command_types;
use commandlink_core::{decode_typed, Command, CommandPayload};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LogLevel {
    level: String,
}

impl CommandPayload for LogLevel {
    const COMMAND_TYPE: &'static str = command_types::SET_LOG_LEVEL;
}

fn hub_channel(connector: &Arc<FlakyConnector>, app_id: Uuid) -> HubCommandChannel {
    HubCommandChannel::new(
        Arc::clone(connector) as Arc<dyn HubConnector>,
        test_credentials(app_id),
        fast_options(),
    )
}

#[tokio::test]
async fn test_reconnects_after_repeated_failures() {
    init_logging();
    let (connector, mut servers) = FlakyConnector::new(5);
    let app_id = Uuid::new_v4();
    let channel = hub_channel(&connector, app_id);

    let mut states = channel.connection().watch_state();
    let observed = tokio::spawn(async move {
        let mut seen = Vec::new();
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            seen.push(state);
            if state == ConnectionState::Connected {
                break;
            }
        }
        seen
    });

    let (handler, _) = recording_handler::<Command>();
    channel.listen_for_commands(handler).await.unwrap();

    let _server = tokio::time::timeout(Duration::from_secs(5), servers.recv())
        .await
        .expect("hub never accepted a connection")
        .unwrap();
    wait_until(|| channel.connection().state() == ConnectionState::Connected).await;

    let stats = channel.connection().stats();
    assert_eq!(stats.connect_attempts, 6);
    assert_eq!(stats.connected_transitions, 1);
    assert_eq!(stats.reconnect_loops_started, 1);
    assert!(stats.peak_concurrent_loops <= 1);

    let seen = observed.await.unwrap();
    assert_eq!(seen.last(), Some(&ConnectionState::Connected));
    assert_eq!(
        seen.iter().filter(|s| **s == ConnectionState::Connected).count(),
        1
    );

    // Every dial presented a fresh token for the same identity.
    let identities = connector.identities();
    assert_eq!(identities.len(), 6);
    assert!(identities
        .iter()
        .all(|(id, key)| *id == app_id && key == "integration-api-key"));
    let mut tokens = connector.tokens();
    tokens.sort();
    tokens.dedup();
    assert_eq!(tokens.len(), 6);

    channel.close().await;
}

#[tokio::test]
async fn test_commands_flow_both_ways() {
    init_logging();
    let (connector, mut servers) = FlakyConnector::new(0);
    let app_id = Uuid::new_v4();
    let channel = hub_channel(&connector, app_id);

    let (handler, received) = recording_handler::<Command>();
    channel.listen_for_commands(handler).await.unwrap();
    let mut server = servers.recv().await.unwrap();

    channel
        .send_payload("unit-9", &LogLevel { level: "debug".into() })
        .await
        .unwrap();
    match server.from_client.recv().await.unwrap() {
        HubFrame::SendCommand {
            command,
            destination_id,
        } => {
            assert_eq!(destination_id, "unit-9");
            assert_eq!(command.origin_id, app_id.to_string());
            assert_eq!(decode_typed::<LogLevel>(&command).unwrap().level, "debug");
        }
        other => panic!("unexpected frame {other:?}"),
    }

    for destination in ["someone-else".to_string(), app_id.to_string()] {
        server
            .to_client
            .send(HubFrame::ReceiveCommand {
                command: Command::new(command_types::RESTART, "hub", destination),
            })
            .await
            .unwrap();
    }

    wait_until(|| !received.lock().unwrap().is_empty()).await;
    channel.close().await;

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].destination_id, app_id.to_string());
}

#[tokio::test]
async fn test_sends_reach_hub_in_call_order() {
    init_logging();
    let (connector, mut servers) = FlakyConnector::new(0);
    let channel = hub_channel(&connector, Uuid::new_v4());

    channel.connection().connect().await.unwrap();
    let mut server = servers.recv().await.unwrap();

    for n in 0..20 {
        channel
            .send_command(Command::new(command_types::SEND_CAN, "me", format!("unit-{n}")))
            .await
            .unwrap();
    }

    let mut destinations = Vec::new();
    for _ in 0..20 {
        match server.from_client.recv().await {
            Some(HubFrame::SendCommand { destination_id, .. }) => destinations.push(destination_id),
            other => panic!("unexpected frame {other:?}"),
        }
    }
    let expected: Vec<String> = (0..20).map(|n| format!("unit-{n}")).collect();
    assert_eq!(destinations, expected);

    channel.close().await;
}

#[tokio::test]
async fn test_lost_connection_is_restored() {
    init_logging();
    let (connector, mut servers) = FlakyConnector::new(0);
    let channel = hub_channel(&connector, Uuid::new_v4());

    channel.connection().connect().await.unwrap();
    let first = servers.recv().await.unwrap();
    drop(first);

    let mut second = tokio::time::timeout(Duration::from_secs(5), servers.recv())
        .await
        .expect("no reconnect")
        .unwrap();
    wait_until(|| channel.connection().state() == ConnectionState::Connected).await;

    channel
        .send_command(Command::new(command_types::SEND_CAN, "me", "unit-3"))
        .await
        .unwrap();
    assert!(matches!(
        second.from_client.recv().await,
        Some(HubFrame::SendCommand { .. })
    ));
    assert_eq!(channel.connection().stats().peak_concurrent_loops, 1);
    channel.close().await;
}

#[tokio::test]
async fn test_send_fails_fast_while_hub_is_down() {
    init_logging();
    let (connector, _servers) = FlakyConnector::new(usize::MAX);
    let channel = hub_channel(&connector, Uuid::new_v4());

    let result = channel
        .send_command(Command::new(command_types::RESTART, "me", "unit-1"))
        .await;
    assert!(result.is_err());
    assert!(channel.connection().is_reconnecting());

    channel.close().await;
    let dials = connector.dials();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(connector.dials(), dials, "no dials after close");

    let closed = channel.connection().send(Command::new("x", "y", "z"), "z").await;
    assert!(matches!(closed, Err(HubError::Closed)));
}
