//! Stream channel scenarios
//!
//! # Test Scenarios
//!
//! 1. **Destination routing**: records for another identity are dropped but
//!    still checkpointed
//! 2. **Partition fan-out**: one reader per partition, unknown filter ids
//!    skipped
//! 3. **Cancellation**: `start` returns promptly and no callback runs after
//! 4. **Fault isolation**: a failing callback does not block later records
//! 5. **Restart**: a new channel resumes from the SQLite checkpoint

use crate::test_utils::*;
use commandlink_c2_router::{
    ChannelDataPublisher, ConfigChannel, ConfigNotification, StreamCommandChannel,
};
use commandlink_core::command::command_types;
use commandlink_core::configuration_command_types::{ACTIVE_DRIVER, ALARM_CHANGED};
use commandlink_core::{handler_fn, Command, DEST_ID_PROPERTY, DEVICE_APP_ID_PROPERTY};
use commandlink_stream::{
    CheckpointKey, CheckpointStore, InMemoryBroker, InMemoryCheckpointStore, OutboundRecord,
    PartitionFanoutReader, ReadRequest, SqliteCheckpointStore, StartPosition, StreamBroker,
    StreamRecord,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Duration;

fn broker_with(stream: &str, partitions: usize) -> Arc<InMemoryBroker> {
    let broker = Arc::new(InMemoryBroker::new());
    broker.create_stream(stream, partitions).unwrap();
    broker
}

fn command_record(destination: &str) -> OutboundRecord {
    let command = Command::new(command_types::SEND_CAN, "operator", destination);
    OutboundRecord::new(serde_json::to_vec(&command).unwrap())
        .with_property(DEST_ID_PROPERTY, destination)
}

#[tokio::test]
async fn test_destination_routing_advances_checkpoint() {
    init_logging();
    let broker = broker_with("commands", 1);
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());

    broker.publish_to_partition("commands", "0", command_record("A")).unwrap();
    broker.publish_to_partition("commands", "0", command_record("B")).unwrap();

    let channel = StreamCommandChannel::new(
        Arc::clone(&broker) as Arc<dyn StreamBroker>,
        Arc::clone(&checkpoints) as Arc<dyn CheckpointStore>,
        "A",
        test_stream_settings("commands"),
        4,
    );
    let (handler, received) = recording_handler::<Command>();
    channel.listen_for_commands(handler).unwrap();

    let key = CheckpointKey::new("commands", "integration", "0");
    wait_until(|| checkpoints.get(&key) == Some(1)).await;
    channel.close().await;

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].destination_id, "A");
}

#[tokio::test]
async fn test_partition_fanout_and_filter() {
    init_logging();
    let broker = broker_with("telemetry", 4);
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());

    let all = Arc::new(PartitionFanoutReader::new(
        Arc::clone(&broker) as Arc<dyn StreamBroker>,
        Arc::clone(&checkpoints),
    ));
    let (handler, _) = recording_handler::<StreamRecord>();
    let handle = all.spawn(ReadRequest::new("telemetry", "all"), Arc::clone(&handler));
    wait_until(|| all.active_readers() == 4).await;
    assert_eq!(handle.shutdown().await.unwrap().partitions.len(), 4);

    let some = Arc::new(PartitionFanoutReader::new(
        Arc::clone(&broker) as Arc<dyn StreamBroker>,
        checkpoints,
    ));
    let handle = some.spawn(
        ReadRequest::new("telemetry", "some").with_partitions(["1", "9"]),
        handler,
    );
    wait_until(|| some.active_readers() == 1).await;
    let summary = handle.shutdown().await.unwrap();
    assert_eq!(summary.partitions, vec!["1"]);
    assert_eq!(summary.skipped_filter_ids, vec!["9"]);
}

#[tokio::test]
async fn test_cancel_stops_callbacks() {
    init_logging();
    let broker = broker_with("commands", 3);
    let reader = Arc::new(
        PartitionFanoutReader::new(
            Arc::clone(&broker) as Arc<dyn StreamBroker>,
            Arc::new(InMemoryCheckpointStore::new()),
        )
        .with_max_in_flight(2),
    );

    let returned = Arc::new(AtomicBool::new(false));
    let late_calls = Arc::new(AtomicUsize::new(0));
    let handler = {
        let returned = Arc::clone(&returned);
        let late_calls = Arc::clone(&late_calls);
        handler_fn(move |_: StreamRecord| {
            let returned = Arc::clone(&returned);
            let late_calls = Arc::clone(&late_calls);
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                if returned.load(Ordering::SeqCst) {
                    late_calls.fetch_add(1, Ordering::SeqCst);
                }
                Ok(())
            }
        })
    };

    let handle = reader.spawn(
        ReadRequest::new("commands", "edge").with_start_position(StartPosition::Earliest),
        handler,
    );
    wait_until(|| reader.active_readers() == 3).await;

    let publisher = {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move {
            for n in 0..200u32 {
                let partition = (n % 3).to_string();
                if broker
                    .publish_to_partition("commands", &partition, OutboundRecord::new(n.to_string()))
                    .is_err()
                {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
    };
    wait_until(|| reader.dispatch_stats().dispatched >= 10).await;

    tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
        .await
        .expect("start did not return after cancel")
        .unwrap();
    returned.store(true, Ordering::SeqCst);

    publisher.await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(late_calls.load(Ordering::SeqCst), 0);
    assert_eq!(reader.active_readers(), 0);
}

#[tokio::test]
async fn test_failing_callback_does_not_block_partition() {
    init_logging();
    let broker = broker_with("commands", 1);
    for destination in ["unit", "unit", "unit"] {
        broker
            .publish_to_partition("commands", "0", command_record(destination))
            .unwrap();
    }

    let calls = Arc::new(AtomicUsize::new(0));
    let handler = {
        let calls = Arc::clone(&calls);
        handler_fn(move |_: Command| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 1 {
                    anyhow::bail!("callback {call} failed");
                }
                Ok(())
            }
        })
    };

    let channel = StreamCommandChannel::new(
        Arc::clone(&broker) as Arc<dyn StreamBroker>,
        Arc::new(InMemoryCheckpointStore::new()),
        "unit",
        test_stream_settings("commands"),
        1,
    );
    channel.listen_for_commands(handler).unwrap();

    wait_until(|| calls.load(Ordering::SeqCst) == 3).await;
    channel.close().await;
}

#[tokio::test]
async fn test_restart_resumes_from_sqlite_checkpoint() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("checkpoints.db");
    let broker = broker_with("commands", 1);
    let key = CheckpointKey::new("commands", "integration", "0");

    for _ in 0..3 {
        broker
            .publish_to_partition("commands", "0", command_record("unit"))
            .unwrap();
    }

    {
        let store = Arc::new(SqliteCheckpointStore::open(&db).unwrap());
        let channel = StreamCommandChannel::new(
            Arc::clone(&broker) as Arc<dyn StreamBroker>,
            Arc::clone(&store) as Arc<dyn CheckpointStore>,
            "unit",
            test_stream_settings("commands"),
            4,
        );
        let (handler, received) = recording_handler::<Command>();
        channel.listen_for_commands(handler).unwrap();
        wait_until(|| received.lock().unwrap().len() == 3).await;
        channel.close().await;
        assert_eq!(store.load(&key).await.unwrap(), Some(2));
    }

    broker
        .publish_to_partition("commands", "0", command_record("unit"))
        .unwrap();

    let store = Arc::new(SqliteCheckpointStore::open(&db).unwrap());
    let channel = StreamCommandChannel::new(
        Arc::clone(&broker) as Arc<dyn StreamBroker>,
        store,
        "unit",
        test_stream_settings("commands"),
        4,
    );
    let (handler, received) = recording_handler::<Command>();
    channel.listen_for_commands(handler).unwrap();
    wait_until(|| !received.lock().unwrap().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    channel.close().await;

    assert_eq!(received.lock().unwrap().len(), 1, "only the new record is replayed");
}

#[tokio::test]
async fn test_config_changes_and_channel_data() {
    init_logging();
    let broker = broker_with("config", 2);
    broker.create_stream("channel-data", 2).unwrap();

    let config = ConfigChannel::new(
        Arc::clone(&broker) as Arc<dyn StreamBroker>,
        Arc::new(InMemoryCheckpointStore::new()),
        test_stream_settings("config"),
        4,
    );
    let (handler, received) = recording_handler::<ConfigNotification>();
    config.subscribe([ALARM_CHANGED], handler).unwrap();

    config.send_command(ACTIVE_DRIVER, "driver-3").await.unwrap();
    config.send_command(ALARM_CHANGED, "{\"alarm\":7}").await.unwrap();
    wait_until(|| received.lock().unwrap().len() == 1).await;
    config.close().await;
    assert_eq!(received.lock().unwrap()[0].value, "{\"alarm\":7}");

    let publisher = ChannelDataPublisher::new(
        Arc::clone(&broker) as Arc<dyn StreamBroker>,
        "channel-data",
        "device-1",
    );
    publisher
        .send_data(&serde_json::json!({"channel": 4, "value": 1.5}))
        .await
        .unwrap();

    let (records, seen) = recording_handler::<StreamRecord>();
    let reader = Arc::new(PartitionFanoutReader::new(
        Arc::clone(&broker) as Arc<dyn StreamBroker>,
        Arc::new(InMemoryCheckpointStore::new()),
    ));
    let handle = reader.spawn(
        ReadRequest::new("channel-data", "dashboard").with_start_position(StartPosition::Earliest),
        records,
    );
    wait_until(|| seen.lock().unwrap().len() == 1).await;
    handle.shutdown().await.unwrap();
    assert_eq!(
        seen.lock().unwrap()[0].property(DEVICE_APP_ID_PROPERTY),
        Some("device-1")
    );
}
