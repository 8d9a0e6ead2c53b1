//! The blob store seam.
//!
//! The pipeline only needs three operations from the store: a create-only
//! put, a whole-object read and a prefix listing. [`ObjectStoreBackend`]
//! provides them over any `object_store` implementation (GCS, S3, Azure,
//! local filesystem, in-memory).

mod backend;

use std::io::ErrorKind;

use bytes::Bytes;
use thiserror::Error;

pub use backend::ObjectStoreBackend;

/// Blob store failures, classified by how the writer should react.
#[derive(Error, Debug, Clone)]
pub enum BlobStoreError {
    /// An object already exists under the name (already-exists or failed precondition).
    #[error("Object already exists: {0}")]
    AlreadyExists(String),
    /// No object exists under the name.
    #[error("Object not found: {0}")]
    NotFound(String),
    /// Network, throttling or server-side failure worth retrying.
    #[error("Transient blob store error: {0}")]
    Transient(String),
    /// A failure that will not go away by retrying.
    #[error("Permanent blob store error: {0}")]
    Permanent(String),
}

impl BlobStoreError {
    /// Whether the operation may succeed if retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, BlobStoreError::Transient(_))
    }
}

impl From<object_store::Error> for BlobStoreError {
    fn from(value: object_store::Error) -> Self {
        match value {
            object_store::Error::AlreadyExists { path, .. }
            | object_store::Error::Precondition { path, .. } => {
                BlobStoreError::AlreadyExists(path)
            }
            object_store::Error::NotFound { path, .. } => BlobStoreError::NotFound(path),
            err @ object_store::Error::Generic { .. } if !retryable_cause(&err) => {
                BlobStoreError::Permanent(err.to_string())
            }
            err @ (object_store::Error::Generic { .. } | object_store::Error::JoinError { .. }) => {
                BlobStoreError::Transient(err.to_string())
            }
            err => BlobStoreError::Permanent(err.to_string()),
        }
    }
}

/// Prefix of the HTTP client's message for a non-2xx response.
const STATUS_ERROR: &str = "Server returned non-2xx status code: ";

/// Looks through the causes of a generic store error for one that will not go
/// away by retrying: a local I/O failure other than an interrupted connection,
/// or a 4xx response other than a timeout or throttling.
///
/// Causes that are not recognized are retryable.
fn retryable_cause(err: &object_store::Error) -> bool {
    let mut cause = std::error::Error::source(err);

    while let Some(current) = cause {
        if let Some(io) = current.downcast_ref::<std::io::Error>() {
            return matches!(
                io.kind(),
                ErrorKind::TimedOut
                    | ErrorKind::Interrupted
                    | ErrorKind::WouldBlock
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::ConnectionRefused
                    | ErrorKind::NotConnected
                    | ErrorKind::BrokenPipe
                    | ErrorKind::UnexpectedEof
            );
        }

        let message = current.to_string();

        if let Some(status) = message
            .strip_prefix(STATUS_ERROR)
            .and_then(|rest| rest.get(..3))
            .and_then(|code| code.parse::<u16>().ok())
        {
            return !(400..500).contains(&status) || status == 408 || status == 429;
        }

        cause = current.source();
    }

    true
}


/// Confirmation of a durable put.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutAck {
    /// Entity tag reported by the store, if any.
    pub e_tag: Option<String>,
    /// Object version reported by the store, if any.
    pub version: Option<String>,
}

/// Operations the pipeline needs from a blob store.
#[async_trait::async_trait]
pub trait BlobStore
where
    Self: Send + Sync + std::fmt::Debug,
{
    /// Stores `payload` under `name` unless an object already exists there.
    ///
    /// # Errors
    /// Returns [`BlobStoreError::AlreadyExists`] when the name is taken.
    async fn put_if_absent(&self, name: &str, payload: Bytes) -> Result<PutAck, BlobStoreError>;

    /// Reads a whole object.
    async fn get(&self, name: &str) -> Result<Bytes, BlobStoreError>;

    /// Names of every object whose name starts with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobStoreError>;
}
