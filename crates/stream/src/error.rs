//! Error types for stream consumption and publishing.

use commandlink_core::DispatchError;
use thiserror::Error;

/// Errors that can occur in stream operations.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Stream not found
    #[error("Stream not found: {stream_id}")]
    StreamNotFound {
        /// Stream name
        stream_id: String,
    },

    /// Stream already exists
    #[error("Stream already exists: {stream_id}")]
    StreamExists {
        /// Stream name
        stream_id: String,
    },

    /// Partition not found on an existing stream
    #[error("Partition {partition_id} not found on stream {stream_id}")]
    PartitionNotFound {
        /// Stream name
        stream_id: String,
        /// Partition identifier
        partition_id: String,
    },

    /// Broker could not be reached or refused the operation
    #[error("Broker unavailable: {0}")]
    Broker(String),

    /// Checkpoint store failure
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// SQLite checkpoint database error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Worker pool refused a record; the reader stopped early
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Reader was already started once
    #[error("Reader already started")]
    AlreadyStarted,

    /// Cancellation was requested
    #[error("Operation cancelled")]
    Cancelled,

    /// A background task panicked or was aborted
    #[error("Task failed: {0}")]
    Task(String),

    /// Invalid stream configuration
    #[error("Invalid stream configuration: {0}")]
    InvalidConfig(String),
}

impl StreamError {
    /// Whether retrying with a fresh reader may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StreamError::Broker(_)
                | StreamError::StreamNotFound { .. }
                | StreamError::PartitionNotFound { .. }
                | StreamError::Checkpoint(_)
                | StreamError::Database(_)
                | StreamError::Dispatch(_)
                | StreamError::Task(_)
        )
    }
}

/// Result type for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;
