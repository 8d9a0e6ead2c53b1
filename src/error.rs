//! Errors raised by the pipeline.

use std::num::TryFromIntError;

use thiserror::Error;

/// Result alias used throughout the pipeline.
pub type SluiceResult<T> = Result<T, SluiceError>;

/// Errors surfaced by the sink pipeline.
///
/// Everything except [`SluiceError::UnassignedPartition`] is fatal at the
/// connector level: the host is expected to stop and restart, relying on
/// recovery to resume from the last durable object.
#[derive(Error, Debug)]
pub enum SluiceError {
    /// Generic Error for arbitrary errors that are generally not classified but should still convey information.
    #[error("{0}")]
    Generic(String),

    // Pipeline errors.
    /// A record arrived out of offset order for its partition.
    #[error(
        "Ordering violation on {topic}-{partition}: offset {offset} received, expected {expected}"
    )]
    OrderingViolation {
        /// Topic of the offending record.
        topic: String,
        /// Partition of the offending record.
        partition: i32,
        /// Offset of the offending record.
        offset: i64,
        /// The next offset the partition expected.
        expected: i64,
    },
    /// An object name does not match the configured naming template.
    #[error("Malformed object name {name:?}: {reason}")]
    MalformedName {
        /// The name that failed to parse.
        name: String,
        /// Why it failed.
        reason: String,
    },
    /// An upload could not be completed within the retry ceiling.
    #[error("Upload of {name} failed after {attempts} attempt(s): {message}")]
    UploadFailed {
        /// Object name of the upload.
        name: String,
        /// Number of attempts made.
        attempts: u32,
        /// Last error seen.
        message: String,
    },
    /// An object already exists under the name with different content.
    #[error("Object {name} already exists with different content")]
    NameCollision {
        /// Object name that collided.
        name: String,
    },
    /// A record arrived for a partition this coordinator does not own.
    #[error("Partition {topic}-{partition} is not assigned to this coordinator")]
    UnassignedPartition {
        /// Topic of the record.
        topic: String,
        /// Partition of the record.
        partition: i32,
    },
    /// The configuration is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// A batch could not be encoded or an encoded object could not be read back.
    #[error("Encoding Error: {0}")]
    Encoding(String),
    /// The offset committer rejected a commit.
    #[error("Offset commit Error: {0}")]
    OffsetCommit(String),

    // Inferred
    /// Blob Store Error
    #[error("Blob Store Error: {0}")]
    BlobStoreError(#[from] crate::blob_store::BlobStoreError),
    /// ObjectStore Error
    #[error("ObjectStore Error")]
    ObjectStoreError(#[from] object_store::Error),
    /// IO Error
    #[error("IO Error")]
    IoError(#[from] std::io::Error),
    /// Serde Json Error
    #[error("Serde Json Error")]
    JsonError(#[from] serde_json::Error),
    /// TryFromInt Conversion Error
    #[error("TryFromInt Conversion Error")]
    TryFromIntConversionError(#[from] TryFromIntError),
    /// Tokio Join Error
    #[error("Tokio Join Error")]
    TokioJoinError(#[from] tokio::task::JoinError),
    /// Tokio Semaphore Acquire Error
    #[error("Tokio Semaphore Acquire Error")]
    TokioSemaphoreAcquireError(#[from] tokio::sync::AcquireError),
}

impl SluiceError {
    /// Whether this error should stop the connector.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SluiceError::UnassignedPartition { .. })
    }
}
