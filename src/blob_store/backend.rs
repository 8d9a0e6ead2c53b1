use std::sync::Arc;

use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{ObjectMeta, ObjectStore, PutMode, PutOptions, PutPayload, path::Path};

use super::{BlobStore, BlobStoreError, PutAck};

/// [`BlobStore`] over an `object_store` implementation.
#[derive(Debug, Clone)]
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreBackend {
    /// Wraps an object store.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// An in-memory store, mostly useful for tests and demos.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(object_store::memory::InMemory::new()))
    }
}

/// Directory part of a name prefix: listing is segment based, prefix matching is not.
fn listing_root(prefix: &str) -> Option<Path> {
    match prefix.rfind('/') {
        Some(index) if index > 0 => Some(Path::from(&prefix[..index])),
        _ => None,
    }
}

#[async_trait::async_trait]
impl BlobStore for ObjectStoreBackend {
    async fn put_if_absent(&self, name: &str, payload: Bytes) -> Result<PutAck, BlobStoreError> {
        let result = self
            .store
            .put_opts(
                &Path::from(name),
                PutPayload::from_bytes(payload),
                PutOptions {
                    mode: PutMode::Create,
                    ..Default::default()
                },
            )
            .await?;

        Ok(PutAck {
            e_tag: result.e_tag,
            version: result.version,
        })
    }

    async fn get(&self, name: &str) -> Result<Bytes, BlobStoreError> {
        let result = self.store.get(&Path::from(name)).await?;

        Ok(result.bytes().await?)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobStoreError> {
        let root = listing_root(prefix);

        let objects: Vec<ObjectMeta> = self.store.list(root.as_ref()).try_collect().await?;

        let mut names = objects
            .into_iter()
            .map(|meta| meta.location.to_string())
            .filter(|name| name.starts_with(prefix))
            .collect::<Vec<_>>();

        names.sort();

        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_root() {
        assert_eq!(listing_root(""), None);
        assert_eq!(listing_root("topic-"), None);
        assert_eq!(listing_root("a/b/topic-"), Some(Path::from("a/b")));
        assert_eq!(listing_root("a/"), Some(Path::from("a")));
    }

    #[tokio::test]
    async fn test_put_if_absent_refuses_overwrite() -> Result<(), Box<dyn std::error::Error>> {
        let store = ObjectStoreBackend::in_memory();

        store
            .put_if_absent("out/t-0-0", Bytes::from_static(b"first"))
            .await?;
        let second = store
            .put_if_absent("out/t-0-0", Bytes::from_static(b"second"))
            .await;

        assert!(matches!(second, Err(BlobStoreError::AlreadyExists(_))));
        assert_eq!(store.get("out/t-0-0").await?, Bytes::from_static(b"first"));

        Ok(())
    }

    #[tokio::test]
    async fn test_get_missing_object() {
        let store = ObjectStoreBackend::in_memory();

        assert!(matches!(
            store.get("missing").await,
            Err(BlobStoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_matches_string_prefix() -> Result<(), Box<dyn std::error::Error>> {
        let store = ObjectStoreBackend::in_memory();

        for name in ["out/a-0-0", "out/a-0-5", "out/ab-0-0", "out/b-0-0", "other/a-0-0"] {
            store.put_if_absent(name, Bytes::from_static(b"x")).await?;
        }

        assert_eq!(store.list("out/a-").await?, vec!["out/a-0-0", "out/a-0-5"]);
        assert_eq!(store.list("out/").await?.len(), 4);
        assert_eq!(store.list("").await?.len(), 5);

        Ok(())
    }
}
