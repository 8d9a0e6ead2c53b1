//! Startup scan of previously flushed objects.
//!
//! An upload can be acknowledged by the store without its watermark ever
//! reaching the offset committer (the process died in between). The scan finds
//! the newest object of a partition, counts the records it holds and reports
//! where it ends, so the coordinator can resume after it instead of
//! re-uploading it.

use std::sync::Arc;

use crate::{
    blob_store::BlobStore,
    encoder::Encoder,
    error::SluiceResult,
    messages::TopicPartition,
    naming::{NamingPolicy, ParsedObjectName},
};

/// The newest durable object found for a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurableObject {
    /// Name of the object.
    pub name: String,
    /// Offset of its first record.
    pub base_offset: i64,
    /// Number of records it holds.
    pub record_count: usize,
    /// One past its last record.
    pub end_offset: i64,
}

/// Lists and inspects the objects of a partition.
#[derive(Debug, Clone)]
pub struct RecoveryScanner {
    store: Arc<dyn BlobStore>,
    naming: NamingPolicy,
    encoder: Encoder,
}

impl RecoveryScanner {
    /// Creates a scanner reading objects written with `naming` and `encoder`.
    pub fn new(store: Arc<dyn BlobStore>, naming: NamingPolicy, encoder: Encoder) -> Self {
        Self {
            store,
            naming,
            encoder,
        }
    }

    /// Finds the object with the highest base offset for the partition.
    ///
    /// # Errors
    /// [`crate::error::SluiceError::MalformedName`] if any name under the scanned
    /// prefix does not match the naming template, which means the template or
    /// prefix changed since those objects were written.
    #[tracing::instrument(skip_all, name = "recovery_scan", fields(partition = %partition))]
    pub async fn last_durable(
        &self,
        partition: &TopicPartition,
    ) -> SluiceResult<Option<DurableObject>> {
        let names = self
            .store
            .list(&self.naming.scan_prefix(partition))
            .await?;

        let mut newest: Option<(String, ParsedObjectName)> = None;

        for name in names {
            let parsed = self.naming.parse(&name)?;

            if parsed.topic_partition() != *partition {
                continue;
            }

            if newest
                .as_ref()
                .is_none_or(|(_, best)| parsed.base_offset > best.base_offset)
            {
                newest = Some((name, parsed));
            }
        }

        let Some((name, parsed)) = newest else {
            tracing::debug!("No objects found.");
            return Ok(None);
        };

        let payload = self.store.get(&name).await?;
        let record_count = self.encoder.count_records(&payload)?;
        let end_offset = parsed.base_offset + i64::try_from(record_count)?;

        tracing::info!(
            "Found {} holding {} record(s), resuming at {}.",
            name,
            record_count,
            end_offset
        );

        Ok(Some(DurableObject {
            name,
            base_offset: parsed.base_offset,
            record_count,
            end_offset,
        }))
    }
}

/// The offset a partition resumes at: the higher of the scanned end offset and
/// the committed watermark. `None` when neither exists.
pub fn resume_offset(durable: Option<&DurableObject>, committed: Option<i64>) -> Option<i64> {
    match (durable.map(|object| object.end_offset), committed) {
        (Some(scanned), Some(committed)) => Some(scanned.max(committed)),
        (scanned, committed) => scanned.or(committed),
    }
}
