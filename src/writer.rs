//! Whole-object uploads with bounded retries.

use std::sync::Arc;

use bytes::Bytes;

use crate::{
    backoff::ExponentialBackoff,
    blob_store::{BlobStore, BlobStoreError},
    config::RetryConfiguration,
    error::{SluiceError, SluiceResult},
    naming::ObjectName,
};

/// Confirmation that an object is durably stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    /// Name of the stored object.
    pub name: ObjectName,
    /// Size of the stored payload in bytes.
    pub size: usize,
    /// Number of put attempts made.
    pub attempts: u32,
    /// Whether an identical object was already present.
    pub already_existed: bool,
    /// Entity tag of the new object, when the store reports one.
    pub e_tag: Option<String>,
}

/// Uploads encoded batches, retrying transient failures with backoff.
#[derive(Debug, Clone)]
pub struct ObjectWriter {
    store: Arc<dyn BlobStore>,
    retry: RetryConfiguration,
}

impl ObjectWriter {
    /// Creates a writer over the given store.
    pub fn new(store: Arc<dyn BlobStore>, retry: RetryConfiguration) -> Self {
        Self { store, retry }
    }

    /// Stores `payload` under `name`.
    ///
    /// An object already present under the name counts as success when its
    /// content is identical, and as [`SluiceError::NameCollision`] otherwise.
    ///
    /// # Errors
    /// [`SluiceError::UploadFailed`] on a permanent store error or once the
    /// retry ceiling is reached.
    #[tracing::instrument(skip_all, name = "write_object", fields(name = %name))]
    pub async fn write(&self, name: &ObjectName, payload: Bytes) -> SluiceResult<Ack> {
        let mut backoff = ExponentialBackoff::new(&self.retry);
        let mut attempts = 0;

        loop {
            attempts += 1;

            let error = match self.store.put_if_absent(name.as_str(), payload.clone()).await {
                Ok(put) => {
                    tracing::debug!("Stored {} bytes in {} attempt(s).", payload.len(), attempts);

                    return Ok(Ack {
                        name: name.clone(),
                        size: payload.len(),
                        attempts,
                        already_existed: false,
                        e_tag: put.e_tag,
                    });
                }
                Err(BlobStoreError::AlreadyExists(_)) => {
                    return self.verify_existing(name, payload, attempts).await;
                }
                Err(err) => err,
            };

            let delay = match backoff.next() {
                Some(delay) if error.is_transient() => delay,
                _ => {
                    tracing::error!("Giving up on upload after {} attempt(s): {}", attempts, error);

                    return Err(SluiceError::UploadFailed {
                        name: name.to_string(),
                        attempts,
                        message: error.to_string(),
                    });
                }
            };

            tracing::warn!(
                "Upload attempt {} failed, retrying in {:?}: {}",
                attempts,
                delay,
                error
            );

            tokio::time::sleep(delay).await;
        }
    }

    /// Resolves a create conflict by comparing the stored content with ours.
    async fn verify_existing(
        &self,
        name: &ObjectName,
        payload: Bytes,
        attempts: u32,
    ) -> SluiceResult<Ack> {
        let existing = self
            .store
            .get(name.as_str())
            .await
            .map_err(|err| SluiceError::UploadFailed {
                name: name.to_string(),
                attempts,
                message: format!("failed to read back existing object: {err}"),
            })?;

        if existing != payload {
            tracing::error!("Existing object differs from the batch being flushed.");

            return Err(SluiceError::NameCollision {
                name: name.to_string(),
            });
        }

        tracing::info!("Identical object already stored, treating as flushed.");

        Ok(Ack {
            name: name.clone(),
            size: payload.len(),
            attempts,
            already_existed: true,
            e_tag: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::{
        blob_store::{ObjectStoreBackend, PutAck},
        encoder::CompressionType,
        naming::{NameTemplate, NamingPolicy},
    };
    use tracing_test::traced_test;

    /// Fails the first `failures` puts with the given error, then delegates.
    #[derive(Debug)]
    struct FailingStore {
        inner: ObjectStoreBackend,
        failures: u32,
        error: BlobStoreError,
        puts: AtomicU32,
    }

    #[async_trait::async_trait]
    impl BlobStore for FailingStore {
        async fn put_if_absent(
            &self,
            name: &str,
            payload: Bytes,
        ) -> Result<PutAck, BlobStoreError> {
            let attempt = self.puts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= self.failures {
                return Err(self.error.clone());
            }
            self.inner.put_if_absent(name, payload).await
        }

        async fn get(&self, name: &str) -> Result<Bytes, BlobStoreError> {
            self.inner.get(name).await
        }

        async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobStoreError> {
            self.inner.list(prefix).await
        }
    }

    fn retry(max_attempts: u32) -> RetryConfiguration {
        RetryConfiguration {
            max_attempts,
            base_interval_in_ms: 1,
            max_interval_in_ms: 5,
            factor: 2.0,
            jitter: 0.5,
        }
    }

    fn name() -> ObjectName {
        NamingPolicy::new("", NameTemplate::Flat, CompressionType::None).name_for("t", 0, 10, 0)
    }

    fn failing(failures: u32, error: BlobStoreError) -> Arc<FailingStore> {
        Arc::new(FailingStore {
            inner: ObjectStoreBackend::in_memory(),
            failures,
            error,
            puts: AtomicU32::new(0),
        })
    }

    #[tokio::test]
    #[traced_test]
    async fn test_retries_transient_failures() -> Result<(), Box<dyn std::error::Error>> {
        let store = failing(3, BlobStoreError::Transient("503 Service Unavailable".into()));
        let writer = ObjectWriter::new(store.clone(), retry(5));

        let ack = writer.write(&name(), Bytes::from_static(b"data")).await?;

        assert_eq!(ack.attempts, 4);
        assert!(!ack.already_existed);
        assert_eq!(store.puts.load(Ordering::SeqCst), 4);
        assert_eq!(store.list("").await?, vec!["t-0-10"]);
        assert!(logs_contain("retrying"));

        Ok(())
    }

    #[tokio::test]
    async fn test_gives_up_at_ceiling() {
        let store = failing(10, BlobStoreError::Transient("throttled".into()));
        let writer = ObjectWriter::new(store.clone(), retry(3));

        let result = writer.write(&name(), Bytes::from_static(b"data")).await;

        assert!(matches!(
            result,
            Err(SluiceError::UploadFailed { attempts: 3, .. })
        ));
        assert_eq!(store.puts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let store = failing(1, BlobStoreError::Permanent("access denied".into()));
        let writer = ObjectWriter::new(store.clone(), retry(5));

        let result = writer.write(&name(), Bytes::from_static(b"data")).await;

        assert!(matches!(
            result,
            Err(SluiceError::UploadFailed { attempts: 1, .. })
        ));
        assert_eq!(store.puts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_identical_rewrite_is_success() -> Result<(), Box<dyn std::error::Error>> {
        let store = Arc::new(ObjectStoreBackend::in_memory());
        let writer = ObjectWriter::new(store.clone(), retry(3));

        let first = writer.write(&name(), Bytes::from_static(b"data")).await?;
        let second = writer.write(&name(), Bytes::from_static(b"data")).await?;

        assert!(!first.already_existed);
        assert!(second.already_existed);
        assert_eq!(store.list("").await?.len(), 1);
        assert_eq!(store.get("t-0-10").await?, Bytes::from_static(b"data"));

        Ok(())
    }

    #[tokio::test]
    async fn test_divergent_rewrite_is_collision() -> Result<(), Box<dyn std::error::Error>> {
        let store = Arc::new(ObjectStoreBackend::in_memory());
        let writer = ObjectWriter::new(store.clone(), retry(3));

        writer.write(&name(), Bytes::from_static(b"data")).await?;
        let result = writer.write(&name(), Bytes::from_static(b"other")).await;

        assert!(matches!(result, Err(SluiceError::NameCollision { .. })));
        assert_eq!(store.get("t-0-10").await?, Bytes::from_static(b"data"));

        Ok(())
    }
}
