//! Partition checkpoint stores
//!
//! A checkpoint is the last sequence of a partition that has been handed off
//! for processing by a consumer group. Readers call [`CheckpointStore::load`]
//! before opening a partition and [`CheckpointStore::advance`] after every
//! record. Advancing never moves a checkpoint backwards.

use crate::error::{StreamError, StreamResult};
use async_trait::async_trait;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// Identity of a checkpoint: (stream, consumer group, partition)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CheckpointKey {
    /// Stream name
    pub stream: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Partition identifier
    pub partition_id: String,
}

impl CheckpointKey {
    /// Build a key
    pub fn new(
        stream: impl Into<String>,
        consumer_group: impl Into<String>,
        partition_id: impl Into<String>,
    ) -> Self {
        Self {
            stream: stream.into(),
            consumer_group: consumer_group.into(),
            partition_id: partition_id.into(),
        }
    }
}

/// External store of per-partition read positions.
#[async_trait]
pub trait CheckpointStore: Send + Sync + 'static {
    /// Last checkpointed sequence, if any
    async fn load(&self, key: &CheckpointKey) -> StreamResult<Option<u64>>;

    /// Record `sequence` as handed off. Lower sequences are ignored.
    async fn advance(&self, key: &CheckpointKey, sequence: u64) -> StreamResult<()>;
}

/// Process-local checkpoint store.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    positions: Mutex<HashMap<CheckpointKey, u64>>,
}

impl InMemoryCheckpointStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Current checkpoint without going through the async trait
    pub fn get(&self, key: &CheckpointKey) -> Option<u64> {
        self.positions
            .lock()
            .ok()
            .and_then(|positions| positions.get(key).copied())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, key: &CheckpointKey) -> StreamResult<Option<u64>> {
        let positions = self
            .positions
            .lock()
            .map_err(|_| StreamError::Checkpoint("checkpoint lock poisoned".to_string()))?;
        Ok(positions.get(key).copied())
    }

    async fn advance(&self, key: &CheckpointKey, sequence: u64) -> StreamResult<()> {
        let mut positions = self
            .positions
            .lock()
            .map_err(|_| StreamError::Checkpoint("checkpoint lock poisoned".to_string()))?;
        let entry = positions.entry(key.clone()).or_insert(sequence);
        if sequence > *entry {
            *entry = sequence;
        }
        Ok(())
    }
}

/// SQLite-backed checkpoint store.
///
/// The connection is not `Sync`; every operation is serialized through the
/// mutex.
pub struct SqliteCheckpointStore {
    conn: Mutex<Connection>,
}

impl SqliteCheckpointStore {
    /// Open (or create) a checkpoint database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> StreamResult<Self> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        Self::init(conn, &path.as_ref().display().to_string())
    }

    /// Open a throwaway in-memory database
    pub fn open_in_memory() -> StreamResult<Self> {
        Self::init(Connection::open_in_memory()?, ":memory:")
    }

    fn init(conn: Connection, location: &str) -> StreamResult<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS partition_checkpoints (
                stream TEXT NOT NULL,
                consumer_group TEXT NOT NULL,
                partition_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (stream, consumer_group, partition_id)
            )",
            [],
        )?;

        info!(location, "Checkpoint store initialized");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> StreamResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StreamError::Checkpoint("checkpoint connection lock poisoned".to_string()))
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn load(&self, key: &CheckpointKey) -> StreamResult<Option<u64>> {
        let conn = self.lock()?;
        let sequence: Option<i64> = conn
            .query_row(
                "SELECT sequence FROM partition_checkpoints
                 WHERE stream = ?1 AND consumer_group = ?2 AND partition_id = ?3",
                params![key.stream, key.consumer_group, key.partition_id],
                |row| row.get(0),
            )
            .optional()?;

        sequence
            .map(|s| {
                u64::try_from(s)
                    .map_err(|_| StreamError::Checkpoint(format!("negative sequence {s} stored")))
            })
            .transpose()
    }

    async fn advance(&self, key: &CheckpointKey, sequence: u64) -> StreamResult<()> {
        let stored = i64::try_from(sequence)
            .map_err(|_| StreamError::Checkpoint(format!("sequence {sequence} out of range")))?;
        let now = chrono::Utc::now().timestamp_millis();

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO partition_checkpoints
                 (stream, consumer_group, partition_id, sequence, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (stream, consumer_group, partition_id) DO UPDATE
             SET sequence = excluded.sequence, updated_at = excluded.updated_at
             WHERE excluded.sequence > partition_checkpoints.sequence",
            params![key.stream, key.consumer_group, key.partition_id, stored, now],
        )?;
        Ok(())
    }
}
